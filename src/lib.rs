//! A minimal WSGI-style HTTP/1.x server.
//!
//! The server bridges raw TCP connections to a pluggable [`Application`]:
//! it parses the request line, builds a normalized [`RequestContext`],
//! invokes the application with a response-starting handle, and writes the
//! assembled response back as a single byte string. Connections are never
//! reused (no keep-alive) and exactly one response is produced per accepted
//! connection.
//!
//! Two mutually exclusive concurrency models are available behind
//! [`DispatchMode`]:
//!
//! * [`DispatchMode::Readiness`]: a single-threaded poll(2) event loop
//!   with a per-connection read/write state machine;
//! * [`DispatchMode::Forking`]: one worker process per connection, with
//!   asynchronous SIGCHLD reaping of terminated workers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsgid::{Application, DispatchMode, RequestContext, Server, ServerError, StartResponse};
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     fn call(
//!         &self,
//!         _ctx: &mut RequestContext,
//!         start: &mut StartResponse,
//!     ) -> Result<Vec<Vec<u8>>, ServerError> {
//!         start.start("200 OK", vec![("Content-Type".into(), "text/plain".into())])?;
//!         Ok(vec![b"hi".to_vec()])
//!     }
//! }
//!
//! fn main() -> Result<(), ServerError> {
//!     let mut server = Server::bind("0.0.0.0:8888")?;
//!     server.set_app(Arc::new(Hello));
//!     server.serve_forever(DispatchMode::Readiness)
//! }
//! ```

mod app;
mod error;
mod fork;
mod framer;
mod readiness;
mod registry;
mod server;

pub use crate::app::{
    invoke, Application, PendingResponse, RequestContext, ResponseDraft, StartResponse,
    GATEWAY_VERSION, URL_SCHEME,
};
pub use crate::error::ServerError;
pub use crate::framer::{assemble_response, parse_request_line, RequestLine, SERVER_SOFTWARE};
pub use crate::server::{DispatchMode, Server, ServerIdentity};

//! Server construction and the shared request pipeline.
//!
//! [`Server::bind`] resolves the server identity once at listen time;
//! [`Server::serve_forever`] hands the listener to one of the two
//! dispatchers. The pipeline in [`process_request`] is the piece both
//! dispatchers share: parse, invoke the application, and downgrade any
//! failure to a generated error response instead of letting it kill the
//! dispatch loop.

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;

use nix::unistd::gethostname;
use tracing::{debug, error, info, warn};

use crate::app::{invoke, Application, PendingResponse, RequestContext, ResponseDraft};
use crate::error::ServerError;
use crate::framer::parse_request_line;
use crate::{fork, readiness};

/// How much of a request is read in one pass. Everything past the request
/// line is ignored anyway, so one chunk is all a request ever gets.
pub(crate) const RECV_CHUNK: usize = 1024;

/// Which concurrency strategy `serve_forever` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Single-threaded poll loop over all registered fds.
    Readiness,
    /// One forked worker process per accepted connection.
    Forking,
}

/// Resolved hostname and bound port, fixed at listen time and read by every
/// request's context.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub port: u16,
}

/// A bound listener plus the registered application.
pub struct Server {
    listener: TcpListener,
    identity: ServerIdentity,
    app: Option<Arc<dyn Application>>,
}

impl Server {
    /// Binds the listening socket and resolves the server identity.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Server, ServerError> {
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        let name = gethostname()
            .map(|host| host.to_string_lossy().into_owned())
            .unwrap_or_else(|_| local.ip().to_string());
        info!("listening on {}", local);
        Ok(Server {
            listener,
            identity: ServerIdentity {
                name,
                port: local.port(),
            },
            app: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Registers the application every request is dispatched to.
    pub fn set_app(&mut self, app: Arc<dyn Application>) {
        self.app = Some(app);
    }

    /// Runs the chosen dispatch loop. Blocks indefinitely under normal
    /// operation; returns only if the listener itself fails.
    pub fn serve_forever(&mut self, mode: DispatchMode) -> Result<(), ServerError> {
        let app = self.app.clone().ok_or(ServerError::NoApplication)?;
        info!(?mode, port = self.identity.port, "serving HTTP");
        match mode {
            DispatchMode::Readiness => readiness::serve(&self.listener, &self.identity, &app),
            DispatchMode::Forking => fork::serve(&self.listener, &self.identity, &app),
        }
    }
}

/// Parse, build the context, invoke the application.
///
/// Never fails: a malformed request line becomes a 400-class response and a
/// protocol violation inside the application becomes a 500-class one, so the
/// caller always has something well-formed to put on the wire.
pub(crate) fn process_request(
    raw: &[u8],
    identity: &ServerIdentity,
    app: &dyn Application,
) -> PendingResponse {
    let line = match parse_request_line(raw) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "rejecting request");
            return error_response("400 Bad Request", "malformed request line\n");
        }
    };
    debug!(method = %line.method, path = %line.path, version = %line.version, "request");

    let mut ctx = RequestContext::new(line, raw.to_vec(), identity);
    match invoke(app, &mut ctx) {
        Ok(pending) => pending,
        Err(err) => {
            error!(error = %err, "application failed");
            error_response("500 Internal Server Error", "internal server error\n")
        }
    }
}

fn error_response(status: &str, body: &str) -> PendingResponse {
    PendingResponse {
        draft: ResponseDraft {
            status: status.to_owned(),
            headers: vec![("Content-Type".to_owned(), "text/plain".to_owned())],
        },
        body: vec![body.as_bytes().to_vec()],
    }
}

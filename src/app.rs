//! The application boundary.
//!
//! An [`Application`] is the WSGI-style callable behind the server: it
//! receives a [`RequestContext`] plus a [`StartResponse`] handle and returns
//! a finite sequence of body chunks. The server invokes it exactly once per
//! request and never retries.

use std::io::{self, Cursor};

use tracing::debug;

use crate::error::ServerError;
use crate::framer::RequestLine;
use crate::server::ServerIdentity;

/// Gateway revision marker exposed to applications (the `wsgi.version` key).
pub const GATEWAY_VERSION: (u8, u8) = (1, 0);

/// The only scheme this server speaks.
pub const URL_SCHEME: &str = "http";

/// The callable side of the app boundary.
///
/// Implementations must record a status and header list through `start`
/// before returning; the returned chunks are concatenated verbatim into the
/// response body and consumed once.
pub trait Application: Send + Sync {
    fn call(
        &self,
        ctx: &mut RequestContext,
        start: &mut StartResponse,
    ) -> Result<Vec<Vec<u8>>, ServerError>;
}

/// The normalized per-request environment handed to the application.
///
/// Built fresh for every request from the parsed request line and the
/// accept-time server identity; owned by the invocation that created it.
#[derive(Debug)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub version: String,
    pub scheme: &'static str,
    pub gateway_version: (u8, u8),
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    pub server_name: String,
    pub server_port: u16,
    input: Cursor<Vec<u8>>,
}

impl RequestContext {
    /// Pure construction, no I/O.
    pub fn new(line: RequestLine, raw: Vec<u8>, identity: &ServerIdentity) -> RequestContext {
        RequestContext {
            method: line.method,
            path: line.path,
            version: line.version,
            scheme: URL_SCHEME,
            gateway_version: GATEWAY_VERSION,
            multithread: false,
            multiprocess: false,
            run_once: false,
            server_name: identity.name.clone(),
            server_port: identity.port,
            input: Cursor::new(raw),
        }
    }

    /// Input stream over the bytes received on the connection.
    pub fn input(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.input
    }

    /// Error output sink for the application.
    pub fn errors(&self) -> impl io::Write {
        io::stderr()
    }
}

/// Status line and header list chosen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDraft {
    pub status: String,
    pub headers: Vec<(String, String)>,
}

/// A finalized draft paired with the not-yet-drained body chunks.
#[derive(Debug)]
pub struct PendingResponse {
    pub draft: ResponseDraft,
    pub body: Vec<Vec<u8>>,
}

/// The response-starting callback handed to the application.
///
/// At most one draft may be recorded per request; `start` a second time is a
/// protocol violation. The error-context path ([`start_after_error`]) may
/// replace an existing draft so an application can report a failure after it
/// already chose headers.
///
/// [`start_after_error`]: StartResponse::start_after_error
#[derive(Debug, Default)]
pub struct StartResponse {
    draft: Option<ResponseDraft>,
}

impl StartResponse {
    pub fn new() -> StartResponse {
        StartResponse { draft: None }
    }

    /// Records the response draft. Fails with
    /// [`ServerError::ResponseRestarted`] if a draft was already recorded.
    pub fn start(
        &mut self,
        status: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), ServerError> {
        if self.draft.is_some() {
            return Err(ServerError::ResponseRestarted);
        }
        self.draft = Some(ResponseDraft {
            status: status.to_owned(),
            headers,
        });
        Ok(())
    }

    /// Replaces any recorded draft. This is the `exc_info`-bearing variant
    /// of the calling convention: only legitimate while reporting an error.
    pub fn start_after_error(&mut self, status: &str, headers: Vec<(String, String)>) {
        self.draft = Some(ResponseDraft {
            status: status.to_owned(),
            headers,
        });
    }

    pub fn started(&self) -> bool {
        self.draft.is_some()
    }

    fn into_draft(self) -> Result<ResponseDraft, ServerError> {
        self.draft.ok_or(ServerError::ResponseNotStarted)
    }
}

/// Calls the application strictly once and pairs its body with the recorded
/// draft. An application that never started a response yields
/// [`ServerError::ResponseNotStarted`]; the body is discarded rather than
/// sent with an unset status.
pub fn invoke(
    app: &dyn Application,
    ctx: &mut RequestContext,
) -> Result<PendingResponse, ServerError> {
    let mut start = StartResponse::new();
    let body = app.call(ctx, &mut start)?;
    let draft = start.into_draft()?;
    debug!(status = %draft.status, chunks = body.len(), "application produced a response");
    Ok(PendingResponse { draft, body })
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            name: "testhost".to_owned(),
            port: 8888,
        }
    }

    fn context(raw: &[u8]) -> RequestContext {
        let line = crate::framer::parse_request_line(raw).unwrap();
        RequestContext::new(line, raw.to_vec(), &identity())
    }

    struct Hello;

    impl Application for Hello {
        fn call(
            &self,
            _ctx: &mut RequestContext,
            start: &mut StartResponse,
        ) -> Result<Vec<Vec<u8>>, ServerError> {
            start.start("200 OK", vec![("Content-Type".into(), "text/plain".into())])?;
            Ok(vec![b"hi".to_vec()])
        }
    }

    struct NeverStarts;

    impl Application for NeverStarts {
        fn call(
            &self,
            _ctx: &mut RequestContext,
            _start: &mut StartResponse,
        ) -> Result<Vec<Vec<u8>>, ServerError> {
            Ok(vec![b"orphaned body".to_vec()])
        }
    }

    struct StartsTwice;

    impl Application for StartsTwice {
        fn call(
            &self,
            _ctx: &mut RequestContext,
            start: &mut StartResponse,
        ) -> Result<Vec<Vec<u8>>, ServerError> {
            start.start("200 OK", vec![])?;
            start.start("500 Internal Server Error", vec![])?;
            Ok(vec![])
        }
    }

    #[test]
    fn context_carries_the_required_fields() {
        let mut ctx = context(b"GET /hello HTTP/1.1\r\n\r\n");
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.path, "/hello");
        assert_eq!(ctx.version, "HTTP/1.1");
        assert_eq!(ctx.scheme, "http");
        assert_eq!(ctx.gateway_version, (1, 0));
        assert!(!ctx.multithread && !ctx.multiprocess && !ctx.run_once);
        assert_eq!(ctx.server_name, "testhost");
        assert_eq!(ctx.server_port, 8888);

        let mut received = Vec::new();
        ctx.input().read_to_end(&mut received).unwrap();
        assert_eq!(received, b"GET /hello HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn start_records_exactly_one_draft() {
        let mut start = StartResponse::new();
        start.start("200 OK", vec![]).unwrap();
        assert!(start.started());
        let err = start.start("200 OK", vec![]).unwrap_err();
        assert!(matches!(err, ServerError::ResponseRestarted));
    }

    #[test]
    fn start_after_error_replaces_the_draft() {
        let mut start = StartResponse::new();
        start.start("200 OK", vec![]).unwrap();
        start.start_after_error("500 Internal Server Error", vec![]);
        let draft = start.into_draft().unwrap();
        assert_eq!(draft.status, "500 Internal Server Error");
    }

    #[test]
    fn invoke_pairs_draft_and_body() {
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        let pending = invoke(&Hello, &mut ctx).unwrap();
        assert_eq!(pending.draft.status, "200 OK");
        assert_eq!(pending.body, vec![b"hi".to_vec()]);
    }

    #[test]
    fn invoke_rejects_an_unstarted_response() {
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        let err = invoke(&NeverStarts, &mut ctx).unwrap_err();
        assert!(matches!(err, ServerError::ResponseNotStarted));
    }

    #[test]
    fn invoke_surfaces_a_restarted_response() {
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        let err = invoke(&StartsTwice, &mut ctx).unwrap_err();
        assert!(matches!(err, ServerError::ResponseRestarted));
    }
}

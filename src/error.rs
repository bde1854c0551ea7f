use std::io;

use thiserror::Error;

/// Everything that can go wrong between accepting a connection and putting a
/// response on the wire.
///
/// A malformed request line or a misbehaving application is downgraded to a
/// generated error response by the dispatchers; only listener-level failures
/// propagate out of the serve loops.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("malformed request line {0:?}")]
    MalformedRequest(String),
    #[error("start_response called again without error context")]
    ResponseRestarted,
    #[error("application returned a body without calling start_response")]
    ResponseNotStarted,
    #[error("no application registered, call set_app before serve_forever")]
    NoApplication,
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("OS Error: {0}")]
    Sys(#[from] nix::Error),
}

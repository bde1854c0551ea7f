//! The process-isolation dispatcher: one forked worker per connection.
//!
//! The parent does nothing but accept and fork; every accepted connection is
//! handled start to finish inside its own child process, so connections
//! share no mutable state by construction. Terminated workers are reaped
//! asynchronously by a SIGCHLD handler so zombies never accumulate, and the
//! interruptions that handler causes (EINTR out of accept) are retried.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::process;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{close, fork, ForkResult};
use tracing::{debug, error};

use crate::app::Application;
use crate::error::ServerError;
use crate::framer::assemble_response;
use crate::server::{process_request, ServerIdentity, RECV_CHUNK};

/// Drains every currently-terminated child without blocking.
///
/// Runs in signal context, so only async-signal-safe calls are allowed
/// here. `waitpid` returning 0 (children alive, none exited) or -1 (no
/// children left) both end the drain silently.
extern "C" fn reap_children(_signo: libc::c_int) {
    let mut status: libc::c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            return;
        }
    }
}

fn install_reaper() -> Result<(), ServerError> {
    // No SA_RESTART: a blocked accept must surface EINTR so the loop can
    // observe and retry it.
    let action = SigAction::new(
        SigHandler::Handler(reap_children),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

pub(crate) fn serve(
    listener: &TcpListener,
    identity: &ServerIdentity,
    app: &Arc<dyn Application>,
) -> Result<(), ServerError> {
    listener.set_nonblocking(false)?;
    install_reaper()?;

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                // The reaper fired mid-accept.
                continue;
            }
            Err(err) => {
                // Fatal to this iteration only, the listener lives on.
                error!(error = %err, "accept failed");
                continue;
            }
        };
        debug!(%peer, "accepted connection");

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // The child owns only the accepted connection; its copy of
                // the listening fd goes away immediately.
                let _ = close(listener.as_raw_fd());
                handle_connection(stream, identity, app.as_ref());
                process::exit(0);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), "forked worker");
                // The parent's copy of the connection closes here; the
                // child holds the only remaining reference.
                drop(stream);
            }
            Err(Errno::EINTR) => debug!("fork interrupted, connection dropped"),
            Err(err) => error!(error = %err, "fork failed"),
        }
    }
}

/// The full synchronous pipeline a worker runs on its one connection:
/// read once, parse, invoke the application, assemble, send.
fn handle_connection(mut stream: TcpStream, identity: &ServerIdentity, app: &dyn Application) {
    let mut buf = [0u8; RECV_CHUNK];
    let n = match stream.read(&mut buf) {
        Ok(0) => {
            debug!("peer closed the connection");
            return;
        }
        Ok(n) => n,
        Err(err) => {
            error!(error = %err, "read failed");
            return;
        }
    };
    debug!(bytes = n, request = %String::from_utf8_lossy(&buf[..n]), "read");

    let pending = process_request(&buf[..n], identity, app);
    let bytes = assemble_response(&pending.draft.status, &pending.draft.headers, pending.body);
    debug!(bytes = bytes.len(), "sending response");
    if let Err(err) = stream.write_all(&bytes) {
        error!(error = %err, "send failed");
    }
    // stream drops here, closing the socket before the worker exits.
}

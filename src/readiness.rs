//! The readiness dispatcher: a single-threaded poll(2) event loop.
//!
//! One thread owns the listener, the registry and all per-connection work.
//! The only suspension point is the poll call itself (bounded at one
//! second); parsing, application invocation, assembly and the send all run
//! to completion without yielding. A slow or blocking application therefore
//! stalls every other connection; that is the model's inherent scalability
//! ceiling, not something this module works around.

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error};

use crate::app::Application;
use crate::error::ServerError;
use crate::framer::assemble_response;
use crate::registry::{Interest, Registry};
use crate::server::{process_request, ServerIdentity, RECV_CHUNK};

const POLL_TIMEOUT_MS: u16 = 1000;

pub(crate) fn serve(
    listener: &TcpListener,
    identity: &ServerIdentity,
    app: &Arc<dyn Application>,
) -> Result<(), ServerError> {
    listener.set_nonblocking(true)?;
    Dispatcher {
        listener,
        identity,
        app: app.as_ref(),
        registry: Registry::new(),
    }
    .run()
}

struct Dispatcher<'a> {
    listener: &'a TcpListener,
    identity: &'a ServerIdentity,
    app: &'a dyn Application,
    registry: Registry,
}

impl Dispatcher<'_> {
    fn run(&mut self) -> Result<(), ServerError> {
        let listener_fd = self.listener.as_raw_fd();
        loop {
            for fd in self.poll_once()? {
                if fd == listener_fd {
                    self.accept_ready();
                    continue;
                }
                // A batch may still name an fd that was torn down earlier
                // in the same batch.
                let Some(interest) = self.registry.interest(fd) else {
                    debug!(fd, "event for a deregistered connection, dropping");
                    continue;
                };
                match interest {
                    Interest::Read => self.read_ready(fd),
                    Interest::Write => self.write_ready(fd),
                }
            }
        }
    }

    /// One bounded poll over the listener plus every registered connection,
    /// returning the fds that reported activity in poll order.
    fn poll_once(&self) -> Result<Vec<RawFd>, ServerError> {
        let mut fds = Vec::with_capacity(1 + self.registry.len());
        let mut pollfds = Vec::with_capacity(1 + self.registry.len());
        fds.push(self.listener.as_raw_fd());
        pollfds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for (fd, conn) in self.registry.iter() {
            let flags = match conn.interest {
                Interest::Read => PollFlags::POLLIN,
                Interest::Write => PollFlags::POLLOUT,
            };
            fds.push(fd);
            pollfds.push(PollFd::new(conn.stream.as_fd(), flags));
        }

        match poll(&mut pollfds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        }

        // Hangups and errors are dispatched like readiness: the read or
        // write path observes the failure and tears the connection down.
        let ready = fds
            .into_iter()
            .zip(&pollfds)
            .filter(|(_, pollfd)| pollfd.revents().is_some_and(|r| !r.is_empty()))
            .map(|(fd, _)| fd)
            .collect();
        Ok(ready)
    }

    fn accept_ready(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                if let Err(err) = stream.set_nonblocking(true) {
                    error!(error = %err, "could not make connection non-blocking");
                    return;
                }
                self.registry.insert(stream);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => error!(error = %err, "accept failed"),
        }
    }

    fn read_ready(&mut self, fd: RawFd) {
        let Some(conn) = self.registry.get_mut(fd) else {
            return;
        };
        let mut buf = [0u8; RECV_CHUNK];
        match conn.stream.read(&mut buf) {
            Ok(0) => {
                // Peer half-closed before sending anything: deregister and
                // close exactly once, the application never runs.
                debug!(fd, "peer closed the connection");
                self.registry.remove(fd);
            }
            Ok(n) => {
                debug!(fd, bytes = n, request = %String::from_utf8_lossy(&buf[..n]), "read");
                conn.pending = Some(process_request(&buf[..n], self.identity, self.app));
                conn.interest = Interest::Write;
            }
            Err(ref err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                // Spurious wakeup, the read interest stays registered.
            }
            Err(err) => {
                error!(fd, error = %err, "read failed");
                self.registry.remove(fd);
            }
        }
    }

    fn write_ready(&mut self, fd: RawFd) {
        // Removing the entry first guarantees deregistration and close on
        // every exit path, a failed send included.
        let Some(mut conn) = self.registry.remove(fd) else {
            return;
        };
        let Some(pending) = conn.pending.take() else {
            error!(fd, "connection writable with no pending response");
            return;
        };
        let bytes = assemble_response(&pending.draft.status, &pending.draft.headers, pending.body);
        debug!(fd, bytes = bytes.len(), "sending response");
        let sent = conn
            .stream
            .set_nonblocking(false)
            .and_then(|()| conn.stream.write_all(&bytes));
        if let Err(err) = sent {
            error!(fd, error = %err, "send failed");
        }
        // conn drops here, closing the socket.
    }
}

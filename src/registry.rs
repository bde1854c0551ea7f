//! Connection registry for the readiness dispatcher.
//!
//! An owned table mapping each connection's fd to its state machine entry.
//! Only the dispatcher thread touches it, so mutual exclusion is structural
//! rather than lock-based.

use std::collections::HashMap;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::app::PendingResponse;

/// The single readiness interest a connection holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Read,
    Write,
}

/// Per-connection state: the socket, its registered interest, and once the
/// application has run, the response waiting to be written.
#[derive(Debug)]
pub(crate) struct Connection {
    pub stream: TcpStream,
    pub interest: Interest,
    pub pending: Option<PendingResponse>,
}

impl Connection {
    fn new(stream: TcpStream) -> Connection {
        Connection {
            stream,
            interest: Interest::Read,
            pending: None,
        }
    }
}

/// Fd-indexed connection table. Removing an entry drops the stream, which
/// closes the fd; that is the registry's only teardown path, so a
/// connection can never be closed twice through it.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    conns: HashMap<RawFd, Connection>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            conns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn insert(&mut self, stream: TcpStream) -> RawFd {
        let fd = stream.as_raw_fd();
        self.conns.insert(fd, Connection::new(stream));
        fd
    }

    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.conns.get(&fd).map(|conn| conn.interest)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.conns.get_mut(&fd)
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Connection> {
        self.conns.remove(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawFd, &Connection)> {
        self.conns.iter().map(|(fd, conn)| (*fd, conn))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    #[test]
    fn insert_registers_read_interest() {
        let (_client, stream) = connected_pair();
        let mut registry = Registry::new();
        let fd = registry.insert(stream);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.interest(fd), Some(Interest::Read));
    }

    #[test]
    fn remove_clears_the_entry() {
        let (_client, stream) = connected_pair();
        let mut registry = Registry::new();
        let fd = registry.insert(stream);
        assert!(registry.remove(fd).is_some());
        assert_eq!(registry.len(), 0);
        assert!(registry.interest(fd).is_none());
        assert!(registry.remove(fd).is_none());
    }

    #[test]
    fn interest_can_flip_to_write() {
        let (_client, stream) = connected_pair();
        let mut registry = Registry::new();
        let fd = registry.insert(stream);
        registry.get_mut(fd).unwrap().interest = Interest::Write;
        assert_eq!(registry.interest(fd), Some(Interest::Write));
    }
}

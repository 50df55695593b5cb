//! Socket-side domain types.

use std::net::SocketAddrV4;
use std::os::fd::RawFd;

use uproar_core::{Result, UringError};

/// What kind of thing a descriptor refers to. Operations that only make
/// sense on sockets check this before touching the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    File,
    Socket,
    Socket6,
}

/// An open descriptor plus its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    raw: RawFd,
    kind: FdKind,
}

impl FileDescriptor {
    pub fn file(raw: RawFd) -> Self {
        Self { raw, kind: FdKind::File }
    }

    pub fn socket(raw: RawFd) -> Self {
        Self { raw, kind: FdKind::Socket }
    }

    pub fn socket6(raw: RawFd) -> Self {
        Self { raw, kind: FdKind::Socket6 }
    }

    pub fn raw(&self) -> RawFd {
        self.raw
    }

    pub fn kind(&self) -> FdKind {
        self.kind
    }

    pub fn is_socket(&self) -> bool {
        matches!(self.kind, FdKind::Socket | FdKind::Socket6)
    }

    /// Gate for socket-only operations.
    pub fn require_socket(&self) -> Result<RawFd> {
        if self.is_socket() {
            Ok(self.raw)
        } else {
            Err(UringError::NotSocket)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn to_raw(self) -> i32 {
        match self {
            AddressFamily::Inet => libc::AF_INET,
            AddressFamily::Inet6 => libc::AF_INET6,
        }
    }

    pub fn try_from_raw(af: u16) -> Result<Self> {
        match af as i32 {
            libc::AF_INET => Ok(AddressFamily::Inet),
            libc::AF_INET6 => Ok(AddressFamily::Inet6),
            _ => Err(UringError::AddressFamilyNotSupported(af)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Datagram,
}

impl SocketType {
    pub fn to_raw(self) -> i32 {
        match self {
            SocketType::Stream => libc::SOCK_STREAM,
            SocketType::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// A listening socket bound to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConnector {
    pub fd: FileDescriptor,
    pub addr: SocketAddrV4,
}

/// An accepted or connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConnection {
    pub fd: FileDescriptor,
    pub peer: SocketAddrV4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_gate() {
        assert!(FileDescriptor::file(3).require_socket().is_err());
        assert_eq!(FileDescriptor::socket(4).require_socket(), Ok(4));
        assert_eq!(FileDescriptor::socket6(5).require_socket(), Ok(5));
    }

    #[test]
    fn family_round_trip() {
        let v4 = AddressFamily::Inet;
        assert_eq!(AddressFamily::try_from_raw(v4.to_raw() as u16), Ok(v4));
        let v6 = AddressFamily::Inet6;
        assert_eq!(AddressFamily::try_from_raw(v6.to_raw() as u16), Ok(v6));
        assert_eq!(
            AddressFamily::try_from_raw(libc::AF_UNIX as u16),
            Err(UringError::AddressFamilyNotSupported(libc::AF_UNIX as u16))
        );
    }
}

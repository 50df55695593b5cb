//! Runtime error types.

use std::fmt;

use nix::errno::Errno;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UringError {
    /// io_uring_setup or the ring mmaps failed.
    Setup(Errno),
    /// A kernel operation completed with a negative result.
    Os(Errno),
    /// The ring was closed while operations were still possible.
    RingClosed,
    /// The scheduler no longer accepts tasks.
    SchedulerShutdown,
    /// Worker thread failed to come up.
    WorkerStartup,
    /// Address family other than IPv4 where only IPv4 is handled.
    AddressFamilyNotSupported(u16),
    /// Operation needs a socket fd but was given something else.
    NotSocket,
    /// Path contains an interior NUL byte.
    InvalidPath,
    /// Blocking wait on a promise ran out of time.
    TimedOut,
}

impl UringError {
    /// Decode a negative kernel result (`-errno`) into an `Os` error.
    pub fn from_raw_os(res: i32) -> Self {
        Self::Os(Errno::from_raw(-res))
    }
}

impl fmt::Display for UringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "io_uring setup: {}", e),
            Self::Os(e) => write!(f, "OS error: {}", e),
            Self::RingClosed => write!(f, "ring is closed"),
            Self::SchedulerShutdown => write!(f, "scheduler is shut down"),
            Self::WorkerStartup => write!(f, "worker thread failed to start"),
            Self::AddressFamilyNotSupported(af) => {
                write!(f, "address family {} not supported", af)
            }
            Self::NotSocket => write!(f, "file descriptor is not a socket"),
            Self::InvalidPath => write!(f, "path contains an interior NUL"),
            Self::TimedOut => write!(f, "wait timed out"),
        }
    }
}

impl std::error::Error for UringError {}

pub type Result<T> = std::result::Result<T, UringError>;

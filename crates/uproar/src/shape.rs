//! Fixed layouts of the kernel structures, as offset tables.
//!
//! One `mod` per structure, one `RawField` const per field, in the
//! style of a C header. The views in `structs` pair these with the
//! accessors in `raw`; nothing else in the crate hardcodes an offset.

/// An (offset, size) pair naming one field of a fixed native layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField {
    pub offset: usize,
    pub size: usize,
}

impl RawField {
    pub const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Submission queue entry, `struct io_uring_sqe`.
pub mod sqe {
    use super::RawField;

    pub const SIZE: usize = 64;

    pub const OPCODE: RawField = RawField::new(0, 1);
    pub const FLAGS: RawField = RawField::new(1, 1);
    pub const IOPRIO: RawField = RawField::new(2, 2);
    pub const FD: RawField = RawField::new(4, 4);
    /// Also `addr2` for operations that take a second pointer.
    pub const OFF: RawField = RawField::new(8, 8);
    pub const ADDR: RawField = RawField::new(16, 8);
    pub const LEN: RawField = RawField::new(24, 4);
    /// Union of the per-op 32-bit flag words.
    pub const OP_FLAGS: RawField = RawField::new(28, 4);
    pub const POLL_EVENTS: RawField = RawField::new(28, 2);
    pub const USER_DATA: RawField = RawField::new(32, 8);
    pub const BUF_INDEX: RawField = RawField::new(40, 2);
    pub const PERSONALITY: RawField = RawField::new(42, 2);
    pub const SPLICE_FD_IN: RawField = RawField::new(44, 4);
}

/// Completion queue entry, `struct io_uring_cqe`.
pub mod cqe {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const USER_DATA: RawField = RawField::new(0, 8);
    pub const RES: RawField = RawField::new(8, 4);
    pub const FLAGS: RawField = RawField::new(12, 4);
}

/// IPv4 socket address, `struct sockaddr_in`. Port and address are
/// stored in network byte order; the family is host order.
pub mod sockaddr_in {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const FAMILY: RawField = RawField::new(0, 2);
    pub const PORT: RawField = RawField::new(2, 2);
    pub const ADDR: RawField = RawField::new(4, 4);
    pub const ZERO: RawField = RawField::new(8, 8);
}

/// IPv6 socket address, `struct sockaddr_in6`.
pub mod sockaddr_in6 {
    use super::RawField;

    pub const SIZE: usize = 28;

    pub const FAMILY: RawField = RawField::new(0, 2);
    pub const PORT: RawField = RawField::new(2, 2);
    pub const FLOWINFO: RawField = RawField::new(4, 4);
    pub const ADDR: RawField = RawField::new(8, 16);
    pub const SCOPE_ID: RawField = RawField::new(24, 4);
}

/// `struct __kernel_timespec`.
pub mod timespec {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const TV_SEC: RawField = RawField::new(0, 8);
    pub const TV_NSEC: RawField = RawField::new(8, 8);
}

/// `struct iovec` (64-bit).
pub mod iovec {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const IOV_BASE: RawField = RawField::new(0, 8);
    pub const IOV_LEN: RawField = RawField::new(8, 8);
}

/// `struct statx`. 256 bytes; the tail past the device numbers is
/// reserved and stays zero.
pub mod statx {
    use super::RawField;

    pub const SIZE: usize = 256;

    pub const MASK: RawField = RawField::new(0, 4);
    pub const BLKSIZE: RawField = RawField::new(4, 4);
    pub const ATTRIBUTES: RawField = RawField::new(8, 8);
    pub const NLINK: RawField = RawField::new(16, 4);
    pub const UID: RawField = RawField::new(20, 4);
    pub const GID: RawField = RawField::new(24, 4);
    pub const MODE: RawField = RawField::new(28, 2);
    pub const INO: RawField = RawField::new(32, 8);
    pub const FILE_SIZE: RawField = RawField::new(40, 8);
    pub const BLOCKS: RawField = RawField::new(48, 8);
    pub const ATTRIBUTES_MASK: RawField = RawField::new(56, 8);
    pub const ATIME: RawField = RawField::new(64, 16);
    pub const BTIME: RawField = RawField::new(80, 16);
    pub const CTIME: RawField = RawField::new(96, 16);
    pub const MTIME: RawField = RawField::new(112, 16);
    pub const RDEV_MAJOR: RawField = RawField::new(128, 4);
    pub const RDEV_MINOR: RawField = RawField::new(132, 4);
    pub const DEV_MAJOR: RawField = RawField::new(136, 4);
    pub const DEV_MINOR: RawField = RawField::new(140, 4);
}

/// `struct statx_timestamp`, embedded in the four statx time fields.
pub mod statx_timestamp {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const TV_SEC: RawField = RawField::new(0, 8);
    pub const TV_NSEC: RawField = RawField::new(8, 4);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_stay_inside_their_structure() {
        let sqe_fields = [
            sqe::OPCODE, sqe::FLAGS, sqe::IOPRIO, sqe::FD, sqe::OFF,
            sqe::ADDR, sqe::LEN, sqe::OP_FLAGS, sqe::POLL_EVENTS,
            sqe::USER_DATA, sqe::BUF_INDEX, sqe::PERSONALITY, sqe::SPLICE_FD_IN,
        ];
        for f in sqe_fields {
            assert!(f.end() <= sqe::SIZE);
        }
        assert!(cqe::FLAGS.end() <= cqe::SIZE);
        assert!(sockaddr_in::ZERO.end() == sockaddr_in::SIZE);
        assert!(sockaddr_in6::SCOPE_ID.end() == sockaddr_in6::SIZE);
        assert!(timespec::TV_NSEC.end() == timespec::SIZE);
        assert!(iovec::IOV_LEN.end() == iovec::SIZE);
        assert!(statx::DEV_MINOR.end() <= statx::SIZE);
    }

    #[test]
    fn layouts_match_the_kernel_headers() {
        assert_eq!(sqe::SIZE, 64);
        assert_eq!(cqe::SIZE, 16);
        assert_eq!(sqe::USER_DATA.offset, 32);
        assert_eq!(cqe::RES.offset, 8);
        assert_eq!(sockaddr_in::SIZE, std::mem::size_of::<libc::sockaddr_in>());
        assert_eq!(sockaddr_in6::SIZE, std::mem::size_of::<libc::sockaddr_in6>());
        assert_eq!(statx::SIZE, std::mem::size_of::<libc::statx>());
        assert_eq!(iovec::SIZE, std::mem::size_of::<libc::iovec>());
    }
}

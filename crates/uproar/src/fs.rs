//! File-side domain types: open flags, statx masks, decoded stat results.

/// `openat` flag bits. Combined by OR, passed straight through to the SQE.
pub mod open_flags {
    pub const READ_ONLY: i32 = libc::O_RDONLY;
    pub const WRITE_ONLY: i32 = libc::O_WRONLY;
    pub const READ_WRITE: i32 = libc::O_RDWR;
    pub const CREATE: i32 = libc::O_CREAT;
    pub const TRUNCATE: i32 = libc::O_TRUNC;
    pub const APPEND: i32 = libc::O_APPEND;
    pub const EXCLUSIVE: i32 = libc::O_EXCL;
}

/// Mode bits for newly created files.
pub mod file_mode {
    pub const OWNER_READ_WRITE: u32 = 0o600;
    pub const DEFAULT_FILE: u32 = 0o644;
    pub const DEFAULT_DIR: u32 = 0o755;
}

/// `statx` request masks.
pub mod stat_mask {
    pub const BASIC: u32 = libc::STATX_BASIC_STATS;
    pub const SIZE: u32 = libc::STATX_SIZE;
    pub const MODE: u32 = libc::STATX_MODE;
    pub const ALL: u32 = libc::STATX_ALL;
}

/// `statx` lookup flags.
pub mod stat_flag {
    pub const EMPTY_PATH: i32 = libc::AT_EMPTY_PATH;
    pub const NO_FOLLOW: i32 = libc::AT_SYMLINK_NOFOLLOW;
}

/// One of the four statx timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatTimestamp {
    pub secs: i64,
    pub nanos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

impl FileType {
    pub fn from_mode(mode: u16) -> Self {
        match u32::from(mode) & libc::S_IFMT {
            libc::S_IFREG => FileType::Regular,
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            libc::S_IFCHR => FileType::CharDevice,
            libc::S_IFBLK => FileType::BlockDevice,
            libc::S_IFIFO => FileType::Fifo,
            libc::S_IFSOCK => FileType::Socket,
            _ => FileType::Unknown,
        }
    }
}

/// Decoded result of a statx operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mask: u32,
    pub mode: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
    pub atime: StatTimestamp,
    pub btime: StatTimestamp,
    pub ctime: StatTimestamp,
    pub mtime: StatTimestamp,
}

impl FileStat {
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    pub fn permissions(&self) -> u32 {
        u32::from(self.mode) & 0o7777
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type() == FileType::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == FileType::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_mode_bits() {
        assert_eq!(FileType::from_mode(0o100644), FileType::Regular);
        assert_eq!(FileType::from_mode(0o040755), FileType::Directory);
        assert_eq!(FileType::from_mode(0o120777), FileType::Symlink);
        assert_eq!(FileType::from_mode(0o140000), FileType::Socket);
        assert_eq!(FileType::from_mode(0), FileType::Unknown);
    }

    #[test]
    fn permissions_strip_the_type() {
        let ts = StatTimestamp { secs: 0, nanos: 0 };
        let st = FileStat {
            mask: 0,
            mode: 0o100640,
            nlink: 1,
            uid: 0,
            gid: 0,
            ino: 1,
            size: 0,
            blocks: 0,
            blksize: 4096,
            atime: ts,
            btime: ts,
            ctime: ts,
            mtime: ts,
        };
        assert_eq!(st.permissions(), 0o640);
        assert!(st.is_regular_file());
        assert!(!st.is_directory());
    }
}

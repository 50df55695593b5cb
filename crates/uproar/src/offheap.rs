//! Owned native buffers handed to the kernel.
//!
//! Every operation that gives the kernel a pointer pins the pointee
//! here: a heap allocation owned by a move-only wrapper. The wrapper
//! moves into the operation's completion handler, so the memory lives
//! exactly as long as the kernel may touch it and is freed exactly once
//! when the handler runs (or is torn down). There is no manual dispose;
//! `Drop` is the release path.

use std::ffi::CString;
use std::net::SocketAddrV4;

use uproar_core::{Result, Timeout, UringError};

use crate::fs::{FileStat, StatTimestamp};
use crate::shape;
use crate::structs::{RawIoVector, RawSocketAddrIn, RawStatx, RawTimeSpec};

/// A byte buffer with a used-bytes watermark.
///
/// `capacity` is what the kernel may fill; `used` is what a completed
/// read produced or what a write should send.
#[derive(Debug, PartialEq)]
pub struct OffHeapBuffer {
    bytes: Box<[u8]>,
    used: usize,
}

impl OffHeapBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: vec![0u8; capacity].into_boxed_slice(), used: 0 }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self { bytes: data.to_vec().into_boxed_slice(), used: data.len() }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Move the watermark; clamped to capacity.
    pub fn set_used(&mut self, used: usize) {
        self.used = used.min(self.bytes.len());
    }

    /// Address for a kernel write (read-like operations).
    pub fn addr_mut(&mut self) -> u64 {
        self.bytes.as_mut_ptr() as u64
    }

    /// Address for a kernel read (write-like operations).
    pub fn addr(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.used]
    }

    /// Copy out the used prefix.
    pub fn export(&self) -> Vec<u8> {
        self.bytes[..self.used].to_vec()
    }
}

/// A NUL-terminated path the kernel can read. `CString` keeps the bytes
/// on the heap at a stable address for as long as we own it.
pub struct OffHeapCString {
    inner: CString,
}

impl OffHeapCString {
    pub fn new(s: &str) -> Result<Self> {
        let inner = CString::new(s).map_err(|_| UringError::InvalidPath)?;
        Ok(Self { inner })
    }

    /// An empty string, for `AT_EMPTY_PATH` lookups.
    pub fn empty() -> Self {
        Self { inner: CString::default() }
    }

    pub fn addr(&self) -> u64 {
        self.inner.as_ptr() as u64
    }
}

/// A `__kernel_timespec` the kernel reads for timeout operations.
pub struct OffHeapTimeSpec {
    bytes: Box<[u8]>,
}

impl OffHeapTimeSpec {
    pub fn from_timeout(timeout: Timeout) -> Self {
        let mut bytes = vec![0u8; shape::timespec::SIZE].into_boxed_slice();
        let (sec, nsec) = timeout.as_secs_nanos();
        let mut view = unsafe { RawTimeSpec::at(bytes.as_mut_ptr()) };
        view.set(sec, nsec);
        Self { bytes }
    }

    pub fn addr(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }

    pub fn secs_nanos(&self) -> (i64, i64) {
        let view = unsafe { RawTimeSpec::at(self.bytes.as_ptr() as *mut u8) };
        (view.tv_sec(), view.tv_nsec())
    }
}

/// Scratch big enough for any socket address, plus the address-length
/// cell accept wants a pointer to.
pub struct OffHeapSocketAddress {
    bytes: Box<[u8]>,
}

const STORAGE_SIZE: usize = 128;
const SOCKLEN_OFFSET: usize = STORAGE_SIZE;

impl OffHeapSocketAddress {
    /// Zeroed storage with the length cell primed to the full capacity,
    /// ready to be filled by accept.
    pub fn for_accept() -> Self {
        let mut this = Self {
            bytes: vec![0u8; STORAGE_SIZE + 4].into_boxed_slice(),
        };
        this.set_socklen(STORAGE_SIZE as u32);
        this
    }

    /// Storage holding `addr`, ready to be read by connect.
    pub fn from_v4(addr: &SocketAddrV4) -> Self {
        let mut this = Self {
            bytes: vec![0u8; STORAGE_SIZE + 4].into_boxed_slice(),
        };
        let mut view = unsafe { RawSocketAddrIn::at(this.bytes.as_mut_ptr()) };
        view.assign(addr);
        this.set_socklen(shape::sockaddr_in::SIZE as u32);
        this
    }

    pub fn addr_ptr(&mut self) -> u64 {
        self.bytes.as_mut_ptr() as u64
    }

    pub fn socklen_ptr(&mut self) -> u64 {
        unsafe { self.bytes.as_mut_ptr().add(SOCKLEN_OFFSET) as u64 }
    }

    pub fn socklen(&self) -> u32 {
        let mut cell = [0u8; 4];
        cell.copy_from_slice(&self.bytes[SOCKLEN_OFFSET..SOCKLEN_OFFSET + 4]);
        u32::from_ne_bytes(cell)
    }

    fn set_socklen(&mut self, len: u32) {
        self.bytes[SOCKLEN_OFFSET..SOCKLEN_OFFSET + 4].copy_from_slice(&len.to_ne_bytes());
    }

    /// Decode the stored address as IPv4.
    pub fn extract_v4(&self) -> Result<SocketAddrV4> {
        let view = unsafe { RawSocketAddrIn::at(self.bytes.as_ptr() as *mut u8) };
        view.extract()
    }
}

/// A contiguous iovec array plus the buffers it points into.
pub struct OffHeapIoVector {
    table: Box<[u8]>,
    buffers: Vec<OffHeapBuffer>,
}

impl OffHeapIoVector {
    /// Vector for a read: each iovec spans a buffer's full capacity.
    pub fn for_read(mut buffers: Vec<OffHeapBuffer>) -> Self {
        let mut table = vec![0u8; buffers.len() * shape::iovec::SIZE].into_boxed_slice();
        for (i, buf) in buffers.iter_mut().enumerate() {
            let mut view =
                unsafe { RawIoVector::at(table.as_mut_ptr().add(i * shape::iovec::SIZE)) };
            view.set(buf.addr_mut(), buf.capacity() as u64);
        }
        Self { table, buffers }
    }

    /// Vector for a write: each iovec spans a buffer's used prefix.
    pub fn for_write(buffers: Vec<OffHeapBuffer>) -> Self {
        let mut table = vec![0u8; buffers.len() * shape::iovec::SIZE].into_boxed_slice();
        for (i, buf) in buffers.iter().enumerate() {
            let mut view =
                unsafe { RawIoVector::at(table.as_mut_ptr().add(i * shape::iovec::SIZE)) };
            view.set(buf.addr(), buf.used() as u64);
        }
        Self { table, buffers }
    }

    pub fn addr(&self) -> u64 {
        self.table.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// After a read of `total` bytes, walk the watermarks forward: the
    /// kernel fills vectors in order.
    pub fn distribute_read(&mut self, total: usize) {
        let mut remaining = total;
        for buf in &mut self.buffers {
            let take = remaining.min(buf.capacity());
            buf.set_used(take);
            remaining -= take;
        }
    }

    pub fn into_buffers(self) -> Vec<OffHeapBuffer> {
        self.buffers
    }
}

/// Landing zone for a statx result.
pub struct OffHeapFileStat {
    bytes: Box<[u8]>,
}

impl OffHeapFileStat {
    pub fn new() -> Self {
        Self { bytes: vec![0u8; shape::statx::SIZE].into_boxed_slice() }
    }

    pub fn addr_mut(&mut self) -> u64 {
        self.bytes.as_mut_ptr() as u64
    }

    /// Decode what the kernel wrote.
    pub fn extract(&self) -> FileStat {
        let view = unsafe { RawStatx::at(self.bytes.as_ptr()) };
        let ts = |field| {
            let (secs, nanos) = view.timestamp(field);
            StatTimestamp { secs, nanos }
        };
        FileStat {
            mask: view.mask(),
            mode: view.mode(),
            nlink: view.nlink(),
            uid: view.uid(),
            gid: view.gid(),
            ino: view.ino(),
            size: view.file_size(),
            blocks: view.blocks(),
            blksize: view.blksize(),
            atime: ts(shape::statx::ATIME),
            btime: ts(shape::statx::BTIME),
            ctime: ts(shape::statx::CTIME),
            mtime: ts(shape::statx::MTIME),
        }
    }
}

impl Default for OffHeapFileStat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn buffer_watermark_clamps() {
        let mut buf = OffHeapBuffer::new(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.used(), 0);
        buf.set_used(5);
        assert_eq!(buf.used(), 5);
        buf.set_used(100);
        assert_eq!(buf.used(), 8);
    }

    #[test]
    fn buffer_from_bytes_exports_itself() {
        let buf = OffHeapBuffer::from_bytes(b"uproar");
        assert_eq!(buf.used(), 6);
        assert_eq!(buf.export(), b"uproar");
        assert_eq!(buf.as_slice(), b"uproar");
    }

    #[test]
    fn cstring_rejects_interior_nul() {
        assert!(OffHeapCString::new("/tmp/ok").is_ok());
        assert_eq!(
            OffHeapCString::new("bad\0path").err(),
            Some(UringError::InvalidPath)
        );
        // Empty string still has its terminator.
        let empty = OffHeapCString::empty();
        assert_ne!(empty.addr(), 0);
    }

    #[test]
    fn timespec_splits_on_the_way_in() {
        let ts = OffHeapTimeSpec::from_timeout(Timeout::from_millis(1_500));
        assert_eq!(ts.secs_nanos(), (1, 500_000_000));
        let zero = OffHeapTimeSpec::from_timeout(Timeout::from_nanos(0));
        assert_eq!(zero.secs_nanos(), (0, 0));
    }

    #[test]
    fn socket_address_assign_extract() {
        let sa = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 8080);
        let stored = OffHeapSocketAddress::from_v4(&sa);
        assert_eq!(stored.extract_v4(), Ok(sa));
        assert_eq!(stored.socklen() as usize, shape::sockaddr_in::SIZE);

        let fresh = OffHeapSocketAddress::for_accept();
        assert_eq!(fresh.socklen() as usize, STORAGE_SIZE);
        assert!(fresh.extract_v4().is_err());
    }

    #[test]
    fn iovec_tables_point_at_their_buffers() {
        let a = OffHeapBuffer::from_bytes(b"abc");
        let b = OffHeapBuffer::from_bytes(b"defgh");
        let vec = OffHeapIoVector::for_write(vec![a, b]);
        assert_eq!(vec.len(), 2);
        let v0 = unsafe { RawIoVector::at(vec.table.as_ptr() as *mut u8) };
        assert_eq!(v0.iov_len(), 3);
        assert_eq!(v0.iov_base(), vec.buffers[0].addr());
        let v1 = unsafe {
            RawIoVector::at(vec.table.as_ptr().add(shape::iovec::SIZE) as *mut u8)
        };
        assert_eq!(v1.iov_len(), 5);
    }

    #[test]
    fn read_distribution_walks_in_order() {
        let bufs = vec![OffHeapBuffer::new(4), OffHeapBuffer::new(4), OffHeapBuffer::new(4)];
        let mut vec = OffHeapIoVector::for_read(bufs);
        vec.distribute_read(6);
        let bufs = vec.into_buffers();
        assert_eq!(bufs[0].used(), 4);
        assert_eq!(bufs[1].used(), 2);
        assert_eq!(bufs[2].used(), 0);
    }

    #[test]
    fn statx_landing_zone_decodes() {
        let mut stat = OffHeapFileStat::new();
        unsafe {
            let base = stat.bytes.as_mut_ptr();
            crate::raw::put_u32(base, shape::statx::MASK.offset, crate::fs::stat_mask::BASIC);
            crate::raw::put_u16(base, shape::statx::MODE.offset, 0o100644);
            crate::raw::put_u64(base, shape::statx::FILE_SIZE.offset, 12345);
            crate::raw::put_u32(base, shape::statx::NLINK.offset, 2);
        }
        let decoded = stat.extract();
        assert_eq!(decoded.size, 12345);
        assert_eq!(decoded.nlink, 2);
        assert!(decoded.is_regular_file());
    }
}

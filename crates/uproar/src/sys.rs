//! The audited unsafe boundary: io_uring syscalls, ring mmaps, and the
//! two plain socket syscalls the proactor runs on ring threads.
//!
//! Layout knowledge lives in `shape`; this module owns the syscall
//! numbers, the setup parameter block, the three mmap regions and the
//! head/tail atomics. Nothing above `ring` touches any of it.

use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::errno::Errno;
use uproar_core::{Result, UringError};

use crate::net::{AddressFamily, SocketType};
use crate::offheap::OffHeapSocketAddress;
use crate::shape;

/// io_uring operation codes.
pub mod opcode {
    pub const NOP: u8 = 0;
    pub const READV: u8 = 1;
    pub const WRITEV: u8 = 2;
    pub const TIMEOUT: u8 = 11;
    pub const ACCEPT: u8 = 13;
    pub const LINK_TIMEOUT: u8 = 15;
    pub const CONNECT: u8 = 16;
    pub const OPENAT: u8 = 18;
    pub const CLOSE: u8 = 19;
    pub const STATX: u8 = 21;
    pub const READ: u8 = 22;
    pub const WRITE: u8 = 23;
}

/// SQE flag bits.
pub mod sqe_flag {
    /// Chain this entry to the next one in the same submission.
    pub const IO_LINK: u8 = 1 << 2;
}

/// `io_uring_enter` flag bits.
pub mod enter_flag {
    pub const GETEVENTS: u32 = 1;
}

/// Feature bits reported by setup.
pub mod feature {
    pub const SINGLE_MMAP: u32 = 1;
}

/// mmap offsets selecting which ring region a map refers to.
mod mmap_off {
    pub const SQ_RING: i64 = 0;
    pub const CQ_RING: i64 = 0x0800_0000;
    pub const SQES: i64 = 0x1000_0000;
}

pub const AT_FDCWD: i32 = libc::AT_FDCWD;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct CqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// `struct io_uring_params`, filled in by the kernel on setup.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UringParams {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: SqRingOffsets,
    pub cq_off: CqRingOffsets,
}

unsafe fn io_uring_setup(entries: u32, params: *mut UringParams) -> i32 {
    libc::syscall(libc::SYS_io_uring_setup, entries as libc::c_long, params as usize) as i32
}

unsafe fn io_uring_enter(fd: RawFd, to_submit: u32, min_complete: u32, flags: u32) -> i32 {
    libc::syscall(
        libc::SYS_io_uring_enter,
        fd as libc::c_long,
        to_submit as libc::c_long,
        min_complete as libc::c_long,
        flags as libc::c_long,
        0usize, // no signal mask
        0usize,
    ) as i32
}

struct MmapRegion {
    ptr: *mut u8,
    len: usize,
}

impl MmapRegion {
    unsafe fn map(fd: RawFd, len: usize, offset: i64) -> Result<Self> {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd,
            offset,
        );
        if ptr == libc::MAP_FAILED {
            return Err(UringError::Setup(Errno::last()));
        }
        Ok(Self { ptr: ptr as *mut u8, len })
    }

    unsafe fn unmap(&mut self) {
        if !self.ptr.is_null() {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// One io_uring instance: fd, the mapped regions, and resolved pointers
/// to the head/tail atomics and entry arrays. Owned by exactly one
/// thread; only the kernel shares the maps, hence the Acquire/Release
/// pairs on the ring indices.
pub struct RawRing {
    fd: RawFd,
    sq_map: MmapRegion,
    cq_map: Option<MmapRegion>,
    sqes_map: MmapRegion,

    sq_head: *const AtomicU32,
    sq_tail: *const AtomicU32,
    sq_mask: u32,
    sq_entries: u32,
    sq_array: *mut u32,
    /// Local tail: slots claimed but not yet published to the kernel.
    sqe_tail: u32,
    /// Tail value last published via the atomic.
    sq_published: u32,

    cq_head: *const AtomicU32,
    cq_tail: *const AtomicU32,
    cq_mask: u32,
    cq_entries: u32,
    cqes: *const u8,
}

impl RawRing {
    pub fn setup(entries: u32) -> Result<Self> {
        let mut params = UringParams::default();
        let fd = unsafe { io_uring_setup(entries, &mut params) };
        if fd < 0 {
            return Err(UringError::Setup(Errno::last()));
        }

        let sq_len = params.sq_off.array as usize + params.sq_entries as usize * 4;
        let cq_len = params.cq_off.cqes as usize + params.cq_entries as usize * shape::cqe::SIZE;
        let single = params.features & feature::SINGLE_MMAP != 0;

        let result = unsafe { Self::map_rings(fd, &params, sq_len, cq_len, single) };
        match result {
            Ok(ring) => Ok(ring),
            Err(e) => {
                unsafe { libc::close(fd) };
                Err(e)
            }
        }
    }

    unsafe fn map_rings(
        fd: RawFd,
        params: &UringParams,
        sq_len: usize,
        cq_len: usize,
        single: bool,
    ) -> Result<Self> {
        let mut sq_map = MmapRegion::map(
            fd,
            if single { sq_len.max(cq_len) } else { sq_len },
            mmap_off::SQ_RING,
        )?;

        let cq_map = if single {
            None
        } else {
            match MmapRegion::map(fd, cq_len, mmap_off::CQ_RING) {
                Ok(m) => Some(m),
                Err(e) => {
                    sq_map.unmap();
                    return Err(e);
                }
            }
        };
        let cq_base = match &cq_map {
            Some(m) => m.ptr,
            None => sq_map.ptr,
        };

        let sqes_len = params.sq_entries as usize * shape::sqe::SIZE;
        let sqes_map = match MmapRegion::map(fd, sqes_len, mmap_off::SQES) {
            Ok(m) => m,
            Err(e) => {
                sq_map.unmap();
                if let Some(mut m) = cq_map {
                    m.unmap();
                }
                return Err(e);
            }
        };

        let sq = sq_map.ptr;
        let so = &params.sq_off;
        let co = &params.cq_off;
        Ok(Self {
            fd,
            sq_head: sq.add(so.head as usize) as *const AtomicU32,
            sq_tail: sq.add(so.tail as usize) as *const AtomicU32,
            sq_mask: *(sq.add(so.ring_mask as usize) as *const u32),
            sq_entries: *(sq.add(so.ring_entries as usize) as *const u32),
            sq_array: sq.add(so.array as usize) as *mut u32,
            sqe_tail: (*(sq.add(so.tail as usize) as *const AtomicU32)).load(Ordering::Acquire),
            sq_published: (*(sq.add(so.tail as usize) as *const AtomicU32))
                .load(Ordering::Acquire),
            cq_head: cq_base.add(co.head as usize) as *const AtomicU32,
            cq_tail: cq_base.add(co.tail as usize) as *const AtomicU32,
            cq_mask: *(cq_base.add(co.ring_mask as usize) as *const u32),
            cq_entries: *(cq_base.add(co.ring_entries as usize) as *const u32),
            cqes: cq_base.add(co.cqes as usize) as *const u8,
            sq_map,
            cq_map,
            sqes_map,
        })
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn sq_entries(&self) -> u32 {
        self.sq_entries
    }

    pub fn cq_entries(&self) -> u32 {
        self.cq_entries
    }

    /// Free submission slots, counting claimed-but-unpublished ones.
    pub fn sq_space_left(&self) -> u32 {
        let head = unsafe { &*self.sq_head }.load(Ordering::Acquire);
        self.sq_entries - self.sqe_tail.wrapping_sub(head)
    }

    /// Claim the next submission slot. Returns the raw 64-byte entry;
    /// the slot is not visible to the kernel until `flush`.
    pub fn next_sqe(&mut self) -> Option<*mut u8> {
        if self.sq_space_left() == 0 {
            return None;
        }
        let idx = self.sqe_tail & self.sq_mask;
        unsafe {
            *self.sq_array.add(idx as usize) = idx;
            let ptr = self.sqes_map.ptr.add(idx as usize * shape::sqe::SIZE);
            self.sqe_tail = self.sqe_tail.wrapping_add(1);
            Some(ptr)
        }
    }

    /// Publish claimed slots and enter the kernel. `min_complete` of 0
    /// means submit-only (plus a completion sweep, GETEVENTS is always
    /// set so already-posted completions are reaped in the same trip).
    pub fn flush(&mut self, min_complete: u32) -> Result<u32> {
        let to_submit = self.sqe_tail.wrapping_sub(self.sq_published);
        if to_submit > 0 {
            unsafe { &*self.sq_tail }.store(self.sqe_tail, Ordering::Release);
            self.sq_published = self.sqe_tail;
        }
        if to_submit == 0 && min_complete == 0 {
            return Ok(0);
        }
        let res = unsafe {
            io_uring_enter(self.fd, to_submit, min_complete, enter_flag::GETEVENTS)
        };
        if res < 0 {
            return Err(UringError::Os(Errno::last()));
        }
        Ok(res as u32)
    }

    /// Completions posted and not yet consumed.
    pub fn cq_ready(&self) -> u32 {
        let tail = unsafe { &*self.cq_tail }.load(Ordering::Acquire);
        let head = unsafe { &*self.cq_head }.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// Fill `out` with pointers to ready completion entries, oldest
    /// first, without consuming them. Returns how many were written.
    pub fn peek_batch_cqe(&self, out: &mut [*const u8]) -> usize {
        let ready = (self.cq_ready() as usize).min(out.len());
        let head = unsafe { &*self.cq_head }.load(Ordering::Relaxed);
        for (i, slot) in out.iter_mut().take(ready).enumerate() {
            let idx = head.wrapping_add(i as u32) & self.cq_mask;
            *slot = unsafe { self.cqes.add(idx as usize * shape::cqe::SIZE) };
        }
        ready
    }

    /// Hand `n` consumed entries back to the kernel.
    pub fn cq_advance(&mut self, n: u32) {
        if n > 0 {
            let head = unsafe { &*self.cq_head };
            head.store(head.load(Ordering::Relaxed).wrapping_add(n), Ordering::Release);
        }
    }

    /// Unmap and close. Safe to call more than once.
    pub fn close(&mut self) {
        if self.fd < 0 {
            return;
        }
        unsafe {
            self.sqes_map.unmap();
            if let Some(m) = &mut self.cq_map {
                m.unmap();
            }
            self.sq_map.unmap();
            libc::close(self.fd);
        }
        self.fd = -1;
    }
}

impl Drop for RawRing {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open a socket. SO_REUSEADDR is set before the fd is handed out so a
/// listener can rebind a recently closed address.
pub fn socket(family: AddressFamily, stype: SocketType, reuse_addr: bool) -> Result<RawFd> {
    let fd = unsafe { libc::socket(family.to_raw(), stype.to_raw(), 0) };
    if fd < 0 {
        return Err(UringError::Os(Errno::last()));
    }
    if reuse_addr {
        let one: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = UringError::Os(Errno::last());
            unsafe { libc::close(fd) };
            return Err(err);
        }
    }
    Ok(fd)
}

/// The locally bound IPv4 address of `fd`. Needed after binding to
/// port 0, where the kernel picks the port.
pub fn local_addr_v4(fd: RawFd) -> Result<SocketAddrV4> {
    let mut stored = OffHeapSocketAddress::for_accept();
    let rc = unsafe {
        libc::getsockname(
            fd,
            stored.addr_ptr() as *mut libc::sockaddr,
            stored.socklen_ptr() as *mut libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(UringError::Os(Errno::last()));
    }
    stored.extract_v4()
}

/// Bind `fd` to `addr` and start listening.
pub fn listen_on(fd: RawFd, addr: &SocketAddrV4, backlog: i32) -> Result<()> {
    let mut stored = OffHeapSocketAddress::from_v4(addr);
    let rc = unsafe {
        libc::bind(
            fd,
            stored.addr_ptr() as *const libc::sockaddr,
            shape::sockaddr_in::SIZE as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(UringError::Os(Errno::last()));
    }
    let rc = unsafe { libc::listen(fd, backlog) };
    if rc < 0 {
        return Err(UringError::Os(Errno::last()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rings cannot always be created in sandboxes; tests that need one
    // bail out quietly when setup fails.
    fn try_ring(entries: u32) -> Option<RawRing> {
        RawRing::setup(entries).ok()
    }

    #[test]
    fn setup_reports_geometry() {
        let Some(ring) = try_ring(8) else { return };
        assert!(ring.sq_entries() >= 8);
        assert!(ring.sq_entries().is_power_of_two());
        assert!(ring.cq_entries() >= ring.sq_entries());
        assert_eq!(ring.sq_space_left(), ring.sq_entries());
        assert_eq!(ring.cq_ready(), 0);
    }

    #[test]
    fn claim_shrinks_space() {
        let Some(mut ring) = try_ring(8) else { return };
        let n = ring.sq_entries();
        for i in 0..n {
            assert!(ring.next_sqe().is_some());
            assert_eq!(ring.sq_space_left(), n - i - 1);
        }
        assert!(ring.next_sqe().is_none());
    }

    #[test]
    fn nop_round_trip() {
        use crate::structs::{CompletionEntry, SubmissionEntry};

        let Some(mut ring) = try_ring(4) else { return };
        let sqe_ptr = ring.next_sqe().unwrap();
        let mut sqe = unsafe { SubmissionEntry::at(sqe_ptr) };
        sqe.prepare(opcode::NOP, -1, 0, 0, 0);
        sqe.set_user_data(0xC0FFEE);

        ring.flush(1).unwrap();
        let mut slots = [std::ptr::null::<u8>(); 4];
        let got = ring.peek_batch_cqe(&mut slots);
        assert_eq!(got, 1);
        let cqe = unsafe { CompletionEntry::at(slots[0]) };
        assert_eq!(cqe.user_data(), 0xC0FFEE);
        assert_eq!(cqe.res(), 0);
        ring.cq_advance(1);
        assert_eq!(ring.cq_ready(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let Some(mut ring) = try_ring(4) else { return };
        assert!(ring.is_open());
        ring.close();
        assert!(!ring.is_open());
        ring.close();
    }

    #[test]
    fn socket_and_listen() {
        use std::net::Ipv4Addr;

        let fd = match socket(AddressFamily::Inet, SocketType::Stream, true) {
            Ok(fd) => fd,
            // No network in some sandboxes.
            Err(_) => return,
        };
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        assert!(listen_on(fd, &addr, 16).is_ok());
        let bound = local_addr_v4(fd).unwrap();
        assert_eq!(bound.ip(), addr.ip());
        assert_ne!(bound.port(), 0);
        unsafe { libc::close(fd) };
    }
}

//! Typed views over the fixed kernel layouts.
//!
//! A view wraps a base pointer and reads or writes fields through the
//! offset tables in `shape` and the primitives in `raw`. Views do not
//! own memory; the caller keeps the backing bytes alive and is free to
//! `reposition` one view over many instances (the drain loop does this
//! for every completion entry). Construction is the unsafe step; field
//! access after that is safe.

use std::net::{Ipv4Addr, SocketAddrV4};

use uproar_core::{Result, UringError};

use crate::raw;
use crate::shape::{cqe, iovec, sockaddr_in, sockaddr_in6, sqe, statx, statx_timestamp, timespec};

/// Mutable view of one submission queue entry.
pub struct SubmissionEntry {
    base: *mut u8,
}

impl SubmissionEntry {
    /// # Safety
    /// `base` must point to at least `shape::sqe::SIZE` writable bytes,
    /// valid for the lifetime of the view.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn reposition(&mut self, base: *mut u8) {
        self.base = base;
    }

    /// Zero the whole entry. Ring slots are recycled; stale fields from
    /// the previous occupant must never leak into a new operation.
    pub fn clear(&mut self) {
        unsafe { raw::clear(self.base, 0, sqe::SIZE) }
    }

    pub fn set_opcode(&mut self, op: u8) {
        unsafe { raw::put_u8(self.base, sqe::OPCODE.offset, op) }
    }

    pub fn opcode(&self) -> u8 {
        unsafe { raw::get_u8(self.base, sqe::OPCODE.offset) }
    }

    pub fn set_flags(&mut self, flags: u8) {
        unsafe { raw::put_u8(self.base, sqe::FLAGS.offset, flags) }
    }

    pub fn flags(&self) -> u8 {
        unsafe { raw::get_u8(self.base, sqe::FLAGS.offset) }
    }

    pub fn set_fd(&mut self, fd: i32) {
        unsafe { raw::put_i32(self.base, sqe::FD.offset, fd) }
    }

    pub fn fd(&self) -> i32 {
        unsafe { raw::get_i32(self.base, sqe::FD.offset) }
    }

    /// File offset, or the second pointer (`addr2`) of two-pointer ops.
    pub fn set_off(&mut self, off: u64) {
        unsafe { raw::put_u64(self.base, sqe::OFF.offset, off) }
    }

    pub fn off(&self) -> u64 {
        unsafe { raw::get_u64(self.base, sqe::OFF.offset) }
    }

    pub fn set_addr(&mut self, addr: u64) {
        unsafe { raw::put_u64(self.base, sqe::ADDR.offset, addr) }
    }

    pub fn addr(&self) -> u64 {
        unsafe { raw::get_u64(self.base, sqe::ADDR.offset) }
    }

    pub fn set_len(&mut self, len: u32) {
        unsafe { raw::put_u32(self.base, sqe::LEN.offset, len) }
    }

    pub fn len(&self) -> u32 {
        unsafe { raw::get_u32(self.base, sqe::LEN.offset) }
    }

    /// The per-op flag word (rw_flags, open_flags, accept_flags, ...).
    pub fn set_op_flags(&mut self, flags: u32) {
        unsafe { raw::put_u32(self.base, sqe::OP_FLAGS.offset, flags) }
    }

    pub fn op_flags(&self) -> u32 {
        unsafe { raw::get_u32(self.base, sqe::OP_FLAGS.offset) }
    }

    pub fn set_user_data(&mut self, data: u64) {
        unsafe { raw::put_u64(self.base, sqe::USER_DATA.offset, data) }
    }

    pub fn user_data(&self) -> u64 {
        unsafe { raw::get_u64(self.base, sqe::USER_DATA.offset) }
    }

    /// Clear and fill the fields every operation shares.
    pub fn prepare(&mut self, opcode: u8, fd: i32, addr: u64, len: u32, off: u64) {
        self.clear();
        self.set_opcode(opcode);
        self.set_fd(fd);
        self.set_addr(addr);
        self.set_len(len);
        self.set_off(off);
    }
}

/// Read-only view of one completion queue entry.
pub struct CompletionEntry {
    base: *const u8,
}

impl CompletionEntry {
    /// # Safety
    /// `base` must point to at least `shape::cqe::SIZE` readable bytes.
    pub unsafe fn at(base: *const u8) -> Self {
        Self { base }
    }

    pub fn reposition(&mut self, base: *const u8) {
        self.base = base;
    }

    pub fn user_data(&self) -> u64 {
        unsafe { raw::get_u64(self.base, cqe::USER_DATA.offset) }
    }

    /// Result code: byte count or fd on success, `-errno` on failure.
    pub fn res(&self) -> i32 {
        unsafe { raw::get_i32(self.base, cqe::RES.offset) }
    }

    pub fn flags(&self) -> u32 {
        unsafe { raw::get_u32(self.base, cqe::FLAGS.offset) }
    }
}

/// Mutable view of a `sockaddr_in`.
pub struct RawSocketAddrIn {
    base: *mut u8,
}

impl RawSocketAddrIn {
    /// # Safety
    /// `base` must point to at least `shape::sockaddr_in::SIZE` writable bytes.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn clear(&mut self) {
        unsafe { raw::clear(self.base, 0, sockaddr_in::SIZE) }
    }

    pub fn family(&self) -> u16 {
        unsafe { raw::get_u16(self.base, sockaddr_in::FAMILY.offset) }
    }

    pub fn set_family(&mut self, family: u16) {
        unsafe { raw::put_u16(self.base, sockaddr_in::FAMILY.offset, family) }
    }

    pub fn port(&self) -> u16 {
        unsafe { raw::get_u16_net(self.base, sockaddr_in::PORT.offset) }
    }

    pub fn set_port(&mut self, port: u16) {
        unsafe { raw::put_u16_net(self.base, sockaddr_in::PORT.offset, port) }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(unsafe { raw::get_u32_net(self.base, sockaddr_in::ADDR.offset) })
    }

    pub fn set_addr(&mut self, addr: Ipv4Addr) {
        unsafe { raw::put_u32_net(self.base, sockaddr_in::ADDR.offset, u32::from(addr)) }
    }

    /// Write a complete address: family, port, addr, zero padding.
    pub fn assign(&mut self, sa: &SocketAddrV4) {
        self.clear();
        self.set_family(libc::AF_INET as u16);
        self.set_port(sa.port());
        self.set_addr(*sa.ip());
    }

    /// Read back a complete address, verifying the family first.
    pub fn extract(&self) -> Result<SocketAddrV4> {
        let family = self.family();
        if family != libc::AF_INET as u16 {
            return Err(UringError::AddressFamilyNotSupported(family));
        }
        Ok(SocketAddrV4::new(self.addr(), self.port()))
    }
}

/// Field-level view of a `sockaddr_in6`. Whole-address assign/extract is
/// not offered yet; the proactor speaks IPv4 endpoints only.
pub struct RawSocketAddrIn6 {
    base: *mut u8,
}

impl RawSocketAddrIn6 {
    /// # Safety
    /// `base` must point to at least `shape::sockaddr_in6::SIZE` writable bytes.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn clear(&mut self) {
        unsafe { raw::clear(self.base, 0, sockaddr_in6::SIZE) }
    }

    pub fn family(&self) -> u16 {
        unsafe { raw::get_u16(self.base, sockaddr_in6::FAMILY.offset) }
    }

    pub fn set_family(&mut self, family: u16) {
        unsafe { raw::put_u16(self.base, sockaddr_in6::FAMILY.offset, family) }
    }

    pub fn port(&self) -> u16 {
        unsafe { raw::get_u16_net(self.base, sockaddr_in6::PORT.offset) }
    }

    pub fn set_port(&mut self, port: u16) {
        unsafe { raw::put_u16_net(self.base, sockaddr_in6::PORT.offset, port) }
    }

    pub fn flowinfo(&self) -> u32 {
        unsafe { raw::get_u32(self.base, sockaddr_in6::FLOWINFO.offset) }
    }

    pub fn scope_id(&self) -> u32 {
        unsafe { raw::get_u32(self.base, sockaddr_in6::SCOPE_ID.offset) }
    }

    pub fn addr_octets(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        unsafe { raw::copy_out(self.base, sockaddr_in6::ADDR.offset, &mut out) }
        out
    }

    pub fn set_addr_octets(&mut self, octets: &[u8; 16]) {
        unsafe { raw::copy_in(self.base, sockaddr_in6::ADDR.offset, octets) }
    }
}

/// Mutable view of a `__kernel_timespec`.
pub struct RawTimeSpec {
    base: *mut u8,
}

impl RawTimeSpec {
    /// # Safety
    /// `base` must point to at least `shape::timespec::SIZE` writable bytes.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn tv_sec(&self) -> i64 {
        unsafe { raw::get_i64(self.base, timespec::TV_SEC.offset) }
    }

    pub fn tv_nsec(&self) -> i64 {
        unsafe { raw::get_i64(self.base, timespec::TV_NSEC.offset) }
    }

    pub fn set(&mut self, sec: i64, nsec: i64) {
        unsafe {
            raw::put_i64(self.base, timespec::TV_SEC.offset, sec);
            raw::put_i64(self.base, timespec::TV_NSEC.offset, nsec);
        }
    }
}

/// Mutable view of one `iovec` in an array of them.
pub struct RawIoVector {
    base: *mut u8,
}

impl RawIoVector {
    /// # Safety
    /// `base` must point to at least `shape::iovec::SIZE` writable bytes.
    pub unsafe fn at(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn reposition(&mut self, base: *mut u8) {
        self.base = base;
    }

    pub fn set(&mut self, iov_base: u64, iov_len: u64) {
        unsafe {
            raw::put_u64(self.base, iovec::IOV_BASE.offset, iov_base);
            raw::put_u64(self.base, iovec::IOV_LEN.offset, iov_len);
        }
    }

    pub fn iov_base(&self) -> u64 {
        unsafe { raw::get_u64(self.base, iovec::IOV_BASE.offset) }
    }

    pub fn iov_len(&self) -> u64 {
        unsafe { raw::get_u64(self.base, iovec::IOV_LEN.offset) }
    }
}

/// Read-only view of a `struct statx` the kernel has filled in.
pub struct RawStatx {
    base: *const u8,
}

impl RawStatx {
    /// # Safety
    /// `base` must point to at least `shape::statx::SIZE` readable bytes.
    pub unsafe fn at(base: *const u8) -> Self {
        Self { base }
    }

    pub fn mask(&self) -> u32 {
        unsafe { raw::get_u32(self.base, statx::MASK.offset) }
    }

    pub fn blksize(&self) -> u32 {
        unsafe { raw::get_u32(self.base, statx::BLKSIZE.offset) }
    }

    pub fn nlink(&self) -> u32 {
        unsafe { raw::get_u32(self.base, statx::NLINK.offset) }
    }

    pub fn uid(&self) -> u32 {
        unsafe { raw::get_u32(self.base, statx::UID.offset) }
    }

    pub fn gid(&self) -> u32 {
        unsafe { raw::get_u32(self.base, statx::GID.offset) }
    }

    pub fn mode(&self) -> u16 {
        unsafe { raw::get_u16(self.base, statx::MODE.offset) }
    }

    pub fn ino(&self) -> u64 {
        unsafe { raw::get_u64(self.base, statx::INO.offset) }
    }

    pub fn file_size(&self) -> u64 {
        unsafe { raw::get_u64(self.base, statx::FILE_SIZE.offset) }
    }

    pub fn blocks(&self) -> u64 {
        unsafe { raw::get_u64(self.base, statx::BLOCKS.offset) }
    }

    /// One of the four embedded timestamps, as (seconds, nanoseconds).
    pub fn timestamp(&self, field: crate::shape::RawField) -> (i64, u32) {
        debug_assert_eq!(field.size, statx_timestamp::SIZE);
        unsafe {
            (
                raw::get_i64(self.base, field.offset + statx_timestamp::TV_SEC.offset),
                raw::get_u32(self.base, field.offset + statx_timestamp::TV_NSEC.offset),
            )
        }
    }
}

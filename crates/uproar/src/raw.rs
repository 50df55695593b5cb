//! Unaligned load/store primitives.
//!
//! The only place in the crate that dereferences raw memory directly.
//! Everything above goes through these helpers plus the offset tables
//! in `shape`, so an audit of the unsafe surface starts and mostly ends
//! here. All accesses are unaligned-safe; the kernel structures are
//! packed at fixed offsets that do not always respect field alignment.
//!
//! `_net` variants read and write big-endian (network byte order), used
//! by the sockaddr port and address fields.

use std::ptr;

#[inline(always)]
pub unsafe fn get_u8(base: *const u8, off: usize) -> u8 {
    ptr::read_unaligned(base.add(off))
}

#[inline(always)]
pub unsafe fn put_u8(base: *mut u8, off: usize, v: u8) {
    ptr::write_unaligned(base.add(off), v);
}

#[inline(always)]
pub unsafe fn get_u16(base: *const u8, off: usize) -> u16 {
    ptr::read_unaligned(base.add(off) as *const u16)
}

#[inline(always)]
pub unsafe fn put_u16(base: *mut u8, off: usize, v: u16) {
    ptr::write_unaligned(base.add(off) as *mut u16, v);
}

#[inline(always)]
pub unsafe fn get_u32(base: *const u8, off: usize) -> u32 {
    ptr::read_unaligned(base.add(off) as *const u32)
}

#[inline(always)]
pub unsafe fn put_u32(base: *mut u8, off: usize, v: u32) {
    ptr::write_unaligned(base.add(off) as *mut u32, v);
}

#[inline(always)]
pub unsafe fn get_u64(base: *const u8, off: usize) -> u64 {
    ptr::read_unaligned(base.add(off) as *const u64)
}

#[inline(always)]
pub unsafe fn put_u64(base: *mut u8, off: usize, v: u64) {
    ptr::write_unaligned(base.add(off) as *mut u64, v);
}

#[inline(always)]
pub unsafe fn get_i32(base: *const u8, off: usize) -> i32 {
    get_u32(base, off) as i32
}

#[inline(always)]
pub unsafe fn put_i32(base: *mut u8, off: usize, v: i32) {
    put_u32(base, off, v as u32);
}

#[inline(always)]
pub unsafe fn get_i64(base: *const u8, off: usize) -> i64 {
    get_u64(base, off) as i64
}

#[inline(always)]
pub unsafe fn put_i64(base: *mut u8, off: usize, v: i64) {
    put_u64(base, off, v as u64);
}

#[inline(always)]
pub unsafe fn get_u16_net(base: *const u8, off: usize) -> u16 {
    u16::from_be(get_u16(base, off))
}

#[inline(always)]
pub unsafe fn put_u16_net(base: *mut u8, off: usize, v: u16) {
    put_u16(base, off, v.to_be());
}

#[inline(always)]
pub unsafe fn get_u32_net(base: *const u8, off: usize) -> u32 {
    u32::from_be(get_u32(base, off))
}

#[inline(always)]
pub unsafe fn put_u32_net(base: *mut u8, off: usize, v: u32) {
    put_u32(base, off, v.to_be());
}

#[inline(always)]
pub unsafe fn copy_in(base: *mut u8, off: usize, src: &[u8]) {
    ptr::copy_nonoverlapping(src.as_ptr(), base.add(off), src.len());
}

#[inline(always)]
pub unsafe fn copy_out(base: *const u8, off: usize, dst: &mut [u8]) {
    ptr::copy_nonoverlapping(base.add(off), dst.as_mut_ptr(), dst.len());
}

#[inline(always)]
pub unsafe fn clear(base: *mut u8, off: usize, len: usize) {
    ptr::write_bytes(base.add(off), 0, len);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Vec<u8> {
        vec![0u8; 64]
    }

    #[test]
    fn host_order_round_trips_every_width() {
        let mut buf = scratch();
        let base = buf.as_mut_ptr();
        unsafe {
            put_u8(base, 0, 0xAB);
            put_u16(base, 1, 0xBEEF); // deliberately misaligned
            put_u32(base, 3, 0xDEAD_BEEF);
            put_u64(base, 7, 0x0123_4567_89AB_CDEF);
            assert_eq!(get_u8(base, 0), 0xAB);
            assert_eq!(get_u16(base, 1), 0xBEEF);
            assert_eq!(get_u32(base, 3), 0xDEAD_BEEF);
            assert_eq!(get_u64(base, 7), 0x0123_4567_89AB_CDEF);
        }
    }

    #[test]
    fn signed_round_trips() {
        let mut buf = scratch();
        let base = buf.as_mut_ptr();
        unsafe {
            put_i32(base, 0, -62);
            put_i64(base, 8, i64::MIN + 1);
            assert_eq!(get_i32(base, 0), -62);
            assert_eq!(get_i64(base, 8), i64::MIN + 1);
        }
    }

    #[test]
    fn network_order_is_big_endian_in_memory() {
        let mut buf = scratch();
        let base = buf.as_mut_ptr();
        unsafe {
            put_u16_net(base, 0, 8080);
            assert_eq!(buf[0], 0x1F);
            assert_eq!(buf[1], 0x90);
            assert_eq!(get_u16_net(buf.as_ptr(), 0), 8080);

            put_u32_net(base, 4, u32::from(std::net::Ipv4Addr::new(192, 168, 1, 1)));
            assert_eq!(&buf[4..8], &[192, 168, 1, 1]);
            assert_eq!(get_u32_net(buf.as_ptr(), 4), 0xC0A8_0101);
        }
    }

    #[test]
    fn copy_and_clear() {
        let mut buf = scratch();
        let base = buf.as_mut_ptr();
        unsafe {
            copy_in(base, 3, b"uring");
            let mut out = [0u8; 5];
            copy_out(buf.as_ptr(), 3, &mut out);
            assert_eq!(&out, b"uring");
            clear(base, 0, 64);
        }
        assert!(buf.iter().all(|&b| b == 0));
    }
}

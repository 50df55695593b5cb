//! The proactor: operations in, promises out.
//!
//! Every operation allocates a correlation id in the in-flight
//! registry, stores a completion handler under it, and queues a closure
//! that prepares the submission entry once a ring slot is free. The
//! drive loop (`process_io`) first drains completions, then moves
//! queued preparations into free slots, then publishes with a
//! non-blocking kernel trip.
//!
//! Handlers own every native allocation their operation pinned, so the
//! memory is released exactly once, after the kernel is done with it.
//! A handler that never runs (ring torn down) is dropped, which fails
//! its promise with `RingClosed` through the resolver.
//!
//! A proactor belongs to one thread, normally a scheduler worker.

use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use uproar_core::promise::{self, Resolver};
use uproar_core::{ObjectHeap, Promise, Result, Timeout, UringError};

use crate::fs::FileStat;
use crate::net::{AddressFamily, ClientConnection, FileDescriptor, ServerConnector, SocketType};
use crate::offheap::{
    OffHeapBuffer, OffHeapCString, OffHeapFileStat, OffHeapIoVector, OffHeapSocketAddress,
    OffHeapTimeSpec,
};
use crate::ring::{RingConfig, RingHolder};
use crate::shape;
use crate::structs::SubmissionEntry;
use crate::sys::{self, opcode, sqe_flag, AT_FDCWD};

type Handler = Box<dyn FnOnce(i32, u32)>;
type PrepFn = Box<dyn FnOnce(&mut SubmissionEntry)>;

/// A queued submission: one entry, or a primary plus its linked timeout
/// which must land in the same flush.
enum Pending {
    One(PrepFn),
    Linked(PrepFn, PrepFn),
}

fn failed<T>(err: UringError) -> Promise<T> {
    let (p, r) = promise::pair();
    r.fail(err);
    p
}

pub struct Proactor {
    ring: RingHolder,
    inflight: ObjectHeap<Handler>,
    queued: VecDeque<Pending>,
}

impl Proactor {
    pub fn new(config: RingConfig) -> Result<Self> {
        Ok(Self {
            ring: RingHolder::create(config)?,
            inflight: ObjectHeap::new(),
            queued: VecDeque::new(),
        })
    }

    /// Operations whose completion has not been dispatched yet.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Preparations still waiting for a ring slot.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty() && self.queued.is_empty()
    }

    /// One turn of the drive loop: dispatch completions, move queued
    /// preparations into free slots, publish without waiting. Returns
    /// how many completions were dispatched.
    pub fn process_io(&mut self) -> Result<usize> {
        let inflight = &mut self.inflight;
        let completed = self.ring.drain_completions(|cqe| {
            if let Some(handler) = inflight.release(cqe.user_data()) {
                handler(cqe.res(), cqe.flags());
            }
        });
        self.pump_submissions();
        self.ring.flush_and_notify(0)?;
        Ok(completed)
    }

    /// Tear down: queued work is discarded, completions already posted
    /// are dispatched, and every still-pending promise fails with
    /// `RingClosed` when its handler drops.
    pub fn close(&mut self) {
        self.queued.clear();
        if self.ring.is_open() {
            let inflight = &mut self.inflight;
            self.ring.drain_completions(|cqe| {
                if let Some(handler) = inflight.release(cqe.user_data()) {
                    handler(cqe.res(), cqe.flags());
                }
            });
        }
        // The kernel may still write into handler-owned buffers until the
        // ring is gone. Close first, drop handlers after.
        self.ring.close();
        self.inflight = ObjectHeap::new();
    }

    fn pump_submissions(&mut self) {
        loop {
            let need = match self.queued.front() {
                None => break,
                Some(Pending::One(_)) => 1,
                Some(Pending::Linked(_, _)) => 2,
            };
            if self.ring.available_submission_space() < need {
                break;
            }
            match self.queued.pop_front() {
                Some(Pending::One(prep)) => {
                    self.ring.claim_submission_slot(|sqe| prep(sqe));
                }
                Some(Pending::Linked(primary, link)) => {
                    self.ring.claim_submission_slot(|sqe| primary(sqe));
                    self.ring.claim_submission_slot(|sqe| link(sqe));
                }
                None => break,
            }
        }
    }

    /// Register a handler, queue the preparation, optionally chained to
    /// a link timeout whose only job is to keep its timespec alive.
    fn submit_op<T, P, H>(&mut self, timeout: Option<Timeout>, prep: P, handle: H) -> Promise<T>
    where
        T: 'static,
        P: FnOnce(&mut SubmissionEntry) + 'static,
        H: FnOnce(i32, u32, Resolver<T>) + 'static,
    {
        let (promise, resolver) = promise::pair();
        let key = self
            .inflight
            .alloc(Box::new(move |res, flags| handle(res, flags, resolver)) as Handler);

        match timeout {
            None => {
                self.queued.push_back(Pending::One(Box::new(move |sqe| {
                    prep(sqe);
                    sqe.set_user_data(key);
                })));
            }
            Some(t) => {
                let ts = OffHeapTimeSpec::from_timeout(t);
                let ts_addr = ts.addr();
                let ts_key = self
                    .inflight
                    .alloc(Box::new(move |_res, _flags| drop(ts)) as Handler);
                let primary: PrepFn = Box::new(move |sqe| {
                    prep(sqe);
                    sqe.set_user_data(key);
                    sqe.set_flags(sqe.flags() | sqe_flag::IO_LINK);
                });
                let link: PrepFn = Box::new(move |sqe| {
                    sqe.set_opcode(opcode::LINK_TIMEOUT);
                    sqe.set_fd(-1);
                    sqe.set_addr(ts_addr);
                    sqe.set_len(1);
                    sqe.set_user_data(ts_key);
                });
                self.queued.push_back(Pending::Linked(primary, link));
            }
        }
        promise
    }

    pub fn nop(&mut self) -> Promise<()> {
        self.submit_op(
            None,
            |sqe| {
                sqe.set_opcode(opcode::NOP);
                sqe.set_fd(-1);
            },
            |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(());
                }
            },
        )
    }

    /// Resolve after `timeout` with the measured elapsed time. The
    /// kernel reports an expired timer as ETIME; that is the success
    /// path here, not an error.
    pub fn delay(&mut self, timeout: Timeout) -> Promise<Duration> {
        let ts = OffHeapTimeSpec::from_timeout(timeout);
        let ts_addr = ts.addr();
        let started = Instant::now();
        self.submit_op(
            None,
            move |sqe| {
                sqe.set_opcode(opcode::TIMEOUT);
                sqe.set_fd(-1);
                sqe.set_addr(ts_addr);
                sqe.set_len(1);
            },
            move |res, _flags, resolver| {
                drop(ts);
                // Only an expired timer counts; res == 0 would mean the
                // completion-count path fired, which delay never arms.
                if res == -(Errno::ETIME as i32) {
                    resolver.resolve(started.elapsed());
                } else {
                    resolver.fail(UringError::from_raw_os(res));
                }
            },
        )
    }

    pub fn close_fd(&mut self, fd: FileDescriptor, timeout: Option<Timeout>) -> Promise<()> {
        let raw = fd.raw();
        self.submit_op(
            timeout,
            move |sqe| {
                sqe.set_opcode(opcode::CLOSE);
                sqe.set_fd(raw);
            },
            |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(());
                }
            },
        )
    }

    /// Read up to the buffer's capacity from `fd` at `offset`. Resolves
    /// with the buffer, its watermark set to the byte count.
    pub fn read(
        &mut self,
        fd: FileDescriptor,
        mut buf: OffHeapBuffer,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Promise<OffHeapBuffer> {
        let raw = fd.raw();
        let addr = buf.addr_mut();
        let cap = buf.capacity() as u32;
        self.submit_op(
            timeout,
            move |sqe| sqe.prepare(opcode::READ, raw, addr, cap, offset),
            move |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    buf.set_used(res as usize);
                    resolver.resolve(buf);
                }
            },
        )
    }

    /// Write the buffer's used prefix to `fd` at `offset`. Resolves
    /// with the byte count.
    pub fn write(
        &mut self,
        fd: FileDescriptor,
        buf: OffHeapBuffer,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Promise<usize> {
        let raw = fd.raw();
        let addr = buf.addr();
        let len = buf.used() as u32;
        self.submit_op(
            timeout,
            move |sqe| sqe.prepare(opcode::WRITE, raw, addr, len, offset),
            move |res, _flags, resolver| {
                drop(buf);
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(res as usize);
                }
            },
        )
    }

    /// Scatter read across several buffers. Resolves with the buffers
    /// (watermarks walked forward in order) and the total byte count.
    pub fn read_vector(
        &mut self,
        fd: FileDescriptor,
        buffers: Vec<OffHeapBuffer>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Promise<(Vec<OffHeapBuffer>, usize)> {
        let raw = fd.raw();
        let mut iov = OffHeapIoVector::for_read(buffers);
        let addr = iov.addr();
        let count = iov.len() as u32;
        self.submit_op(
            timeout,
            move |sqe| sqe.prepare(opcode::READV, raw, addr, count, offset),
            move |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    iov.distribute_read(res as usize);
                    resolver.resolve((iov.into_buffers(), res as usize));
                }
            },
        )
    }

    /// Gather write of each buffer's used prefix. Resolves with the
    /// total byte count.
    pub fn write_vector(
        &mut self,
        fd: FileDescriptor,
        buffers: Vec<OffHeapBuffer>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Promise<usize> {
        let raw = fd.raw();
        let iov = OffHeapIoVector::for_write(buffers);
        let addr = iov.addr();
        let count = iov.len() as u32;
        self.submit_op(
            timeout,
            move |sqe| sqe.prepare(opcode::WRITEV, raw, addr, count, offset),
            move |res, _flags, resolver| {
                drop(iov);
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(res as usize);
                }
            },
        )
    }

    /// Open a path relative to the current directory.
    pub fn open(
        &mut self,
        path: &str,
        flags: i32,
        mode: u32,
        timeout: Option<Timeout>,
    ) -> Promise<FileDescriptor> {
        let cpath = match OffHeapCString::new(path) {
            Ok(c) => c,
            Err(e) => return failed(e),
        };
        let addr = cpath.addr();
        self.submit_op(
            timeout,
            move |sqe| {
                sqe.set_opcode(opcode::OPENAT);
                sqe.set_fd(AT_FDCWD);
                sqe.set_addr(addr);
                sqe.set_len(mode);
                sqe.set_op_flags(flags as u32);
            },
            move |res, _flags, resolver| {
                drop(cpath);
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(FileDescriptor::file(res));
                }
            },
        )
    }

    pub fn stat_path(
        &mut self,
        path: &str,
        mask: u32,
        flags: i32,
        timeout: Option<Timeout>,
    ) -> Promise<FileStat> {
        let cpath = match OffHeapCString::new(path) {
            Ok(c) => c,
            Err(e) => return failed(e),
        };
        self.stat_inner(AT_FDCWD, cpath, mask, flags, timeout)
    }

    /// statx by descriptor: empty path plus `AT_EMPTY_PATH`.
    pub fn stat_fd(
        &mut self,
        fd: FileDescriptor,
        mask: u32,
        timeout: Option<Timeout>,
    ) -> Promise<FileStat> {
        self.stat_inner(
            fd.raw(),
            OffHeapCString::empty(),
            mask,
            crate::fs::stat_flag::EMPTY_PATH,
            timeout,
        )
    }

    fn stat_inner(
        &mut self,
        dirfd: RawFd,
        cpath: OffHeapCString,
        mask: u32,
        flags: i32,
        timeout: Option<Timeout>,
    ) -> Promise<FileStat> {
        let mut landing = OffHeapFileStat::new();
        let path_addr = cpath.addr();
        let landing_addr = landing.addr_mut();
        self.submit_op(
            timeout,
            move |sqe| {
                sqe.set_opcode(opcode::STATX);
                sqe.set_fd(dirfd);
                sqe.set_addr(path_addr);
                sqe.set_len(mask);
                sqe.set_off(landing_addr);
                sqe.set_op_flags(flags as u32);
            },
            move |res, _flags, resolver| {
                drop(cpath);
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(landing.extract());
                }
            },
        )
    }

    /// Accept one connection on a listening IPv4 socket.
    pub fn accept(&mut self, socket: FileDescriptor, flags: u32) -> Promise<ClientConnection> {
        let raw = match socket.require_socket() {
            Ok(raw) => raw,
            Err(e) => return failed(e),
        };
        let mut peer = OffHeapSocketAddress::for_accept();
        let addr_ptr = peer.addr_ptr();
        let len_ptr = peer.socklen_ptr();
        self.submit_op(
            None,
            move |sqe| {
                sqe.set_opcode(opcode::ACCEPT);
                sqe.set_fd(raw);
                sqe.set_addr(addr_ptr);
                sqe.set_off(len_ptr);
                sqe.set_op_flags(flags);
            },
            move |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                    return;
                }
                match peer.extract_v4() {
                    Ok(peer_addr) => resolver.resolve(ClientConnection {
                        fd: FileDescriptor::socket(res),
                        peer: peer_addr,
                    }),
                    Err(e) => resolver.fail(e),
                }
            },
        )
    }

    /// Connect a socket to an IPv4 endpoint. Resolves with the same
    /// descriptor once the kernel reports the connection established.
    pub fn connect(
        &mut self,
        socket: FileDescriptor,
        addr: SocketAddrV4,
        timeout: Option<Timeout>,
    ) -> Promise<FileDescriptor> {
        let raw = match socket.require_socket() {
            Ok(raw) => raw,
            Err(e) => return failed(e),
        };
        let mut stored = OffHeapSocketAddress::from_v4(&addr);
        let addr_ptr = stored.addr_ptr();
        self.submit_op(
            timeout,
            move |sqe| {
                sqe.set_opcode(opcode::CONNECT);
                sqe.set_fd(raw);
                sqe.set_addr(addr_ptr);
                sqe.set_off(shape::sockaddr_in::SIZE as u64);
            },
            move |res, _flags, resolver| {
                drop(stored);
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                } else {
                    resolver.resolve(socket);
                }
            },
        )
    }

    /// Create a socket. Not a ring operation; the syscall runs when the
    /// chained nop completes, so it executes on the ring-owning thread
    /// in submission order with everything queued before it.
    pub fn socket(
        &mut self,
        family: AddressFamily,
        stype: SocketType,
        reuse_addr: bool,
    ) -> Promise<FileDescriptor> {
        self.submit_op(
            None,
            |sqe| {
                sqe.set_opcode(opcode::NOP);
                sqe.set_fd(-1);
            },
            move |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                    return;
                }
                match sys::socket(family, stype, reuse_addr) {
                    Ok(fd) => resolver.resolve(match family {
                        AddressFamily::Inet => FileDescriptor::socket(fd),
                        AddressFamily::Inet6 => FileDescriptor::socket6(fd),
                    }),
                    Err(e) => resolver.fail(e),
                }
            },
        )
    }

    /// Create, bind and listen in one step. Resolves with the actual
    /// bound address, so binding port 0 reports the kernel's pick.
    pub fn server(&mut self, addr: SocketAddrV4, backlog: i32) -> Promise<ServerConnector> {
        self.submit_op(
            None,
            |sqe| {
                sqe.set_opcode(opcode::NOP);
                sqe.set_fd(-1);
            },
            move |res, _flags, resolver| {
                if res < 0 {
                    resolver.fail(UringError::from_raw_os(res));
                    return;
                }
                let fd = match sys::socket(AddressFamily::Inet, SocketType::Stream, true) {
                    Ok(fd) => fd,
                    Err(e) => {
                        resolver.fail(e);
                        return;
                    }
                };
                let listen = sys::listen_on(fd, &addr, backlog).and_then(|_| sys::local_addr_v4(fd));
                match listen {
                    Ok(bound) => resolver.resolve(ServerConnector {
                        fd: FileDescriptor::socket(fd),
                        addr: bound,
                    }),
                    Err(e) => {
                        unsafe { libc::close(fd) };
                        resolver.fail(e);
                    }
                }
            },
        )
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        self.close();
    }
}

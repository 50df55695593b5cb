//! # uproar — an io_uring proactor runtime
//!
//! Linux-only. Three layers, bottom up:
//!
//! - **raw structures**: offset tables and typed views over the fixed
//!   kernel layouts (`raw`, `shape`, `structs`), plus owned native
//!   allocations for the buffers the kernel reads and writes (`offheap`).
//! - **ring**: the audited syscall boundary (`sys`), the ring holder
//!   (`ring`), and the proactor that turns submissions into promises
//!   (`proactor`).
//! - **scheduler**: N worker threads, each owning one ring, fed through
//!   lock-light double-buffered task queues (`scheduler`).
//!
//! Domain types for sockets and files live in `net` and `fs`.

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "linux"))] {
        compile_error!("uproar only works on Linux (io_uring)");
    }
}

pub mod fs;
pub mod net;
pub mod offheap;
pub mod proactor;
pub mod raw;
pub mod ring;
pub mod scheduler;
pub mod shape;
pub mod structs;
pub mod sys;

pub use proactor::Proactor;
pub use ring::{RingConfig, RingHolder};
pub use scheduler::{SchedulerConfig, Task, TaskScheduler};
pub use uproar_core::{Promise, Result, Timeout, UringError};

//! # uproar-core — platform-agnostic building blocks
//!
//! Everything in this crate compiles on any platform. The Linux-only
//! io_uring plumbing lives in the `uproar` crate; it pulls errors,
//! promises, the correlation registry and the log macros from here.

pub mod error;
pub mod kprint;
pub mod object_heap;
pub mod promise;
pub mod timeout;

pub use error::{Result, UringError};
pub use object_heap::ObjectHeap;
pub use promise::{Promise, Resolver};
pub use timeout::Timeout;

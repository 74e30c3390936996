//! Request-coalescing memoization and the concurrent workloads built on it.

pub mod cancel;
pub mod crawl;
pub mod memo;
pub mod race;
mod sync;

pub use cancel::{Cancellation, Canceller, Interrupt};
pub use memo::{Cache, Config, Error, Role, Serialization};

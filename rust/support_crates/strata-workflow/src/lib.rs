//! Thread pool and result hand-off primitives used to run merge instances in parallel.

pub mod join_handle;
pub mod oneshot;
pub mod thread_pool;

pub use join_handle::JoinHandle;
pub use thread_pool::ThreadPool;

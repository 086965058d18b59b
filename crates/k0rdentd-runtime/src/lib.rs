//! k0rdentd runtime support
//!
//! - [`Waiter`]: poll-until-ready with progress feedback and cancellation
//! - [`ProgressSink`]: injectable progress reporting (spinner or silent)
//! - [`RuntimeLifecycle`]: the k0s runtime driven through its CLI

pub mod error;
pub mod k0s;
pub mod progress;
pub mod waiter;

pub use error::{Result, RuntimeError, WaitError};
pub use k0s::{K0sRuntime, RuntimeLifecycle, run_command};
pub use progress::{ProgressSink, SilentProgress, SpinnerProgress};
pub use waiter::Waiter;
pub use tokio_util::sync::CancellationToken;

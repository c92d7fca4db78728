//! Concurrency primitives shared by every flow.

mod cancel;
mod keyed_lock;
mod poller;

pub use cancel::CancelSignal;
pub use keyed_lock::{KeyGuard, KeyedLock};
pub use poller::{PollCallbacks, PollHandle, PollOutcome, PollSchedule, PollStart, RetryPoller};

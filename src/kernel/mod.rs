//! Single-threaded discrete-event simulation kernel.
//!
//! This plays the role `time_driver.rs` and `network_task.rs` play in the
//! teacher simulator, but for a *logical* clock rather than a real-time one:
//! there is no host thread pacing events against wall time. The clock only
//! ever advances to the timestamp of the next pending wakeup, so an entire
//! run of the simulation costs zero wall-clock time beyond the CPU work of
//! processing events.
//!
//! Processes are plain `async` blocks driven by a `futures::executor::LocalPool`.
//! `Timeout` is the one primitive leaf future that talks to the scheduler;
//! everything else (condition variables, interruptible waits) is built on
//! top of it with safe, ordinary `Future` combinators.

mod clock;
mod condvar;
mod event;
mod process;
mod resource;

pub use clock::{Environment, Time};
pub use condvar::{BroadcastCondVar, CondVar};
pub use event::{Event, Received};
pub use process::{wait, InterruptCause, ProcessHandle};
pub use resource::{PreemptiveResource, ResourceGuard};

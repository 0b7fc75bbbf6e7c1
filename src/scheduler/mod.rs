//! Job lifecycle: submission, admission and recovery.
//!
//! - [`JobQueue`]: validates submissions and writes pending records
//! - [`Scheduler`]: periodic admission under a global concurrency ceiling
//! - [`Reconciler`]: re-pends jobs stranded in `active` by a dead worker

pub mod admission;
pub mod job;
pub mod queue;
pub mod reconcile;

pub use admission::Scheduler;
pub use job::{Job, JobRequest, JobResult, JobStatus};
pub use queue::{JobQueue, Submission};
pub use reconcile::Reconciler;

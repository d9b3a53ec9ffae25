//! Background job processing for framelab.
//!
//! A polling worker claims due jobs from the queue and dispatches them to
//! registered handlers: the delayed account-deletion stages and scheduled
//! reminder delivery.

pub mod handler;
pub mod handlers;
pub mod worker;

pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use handlers::{AnonymizeAccountHandler, DispatchReminderHandler, HardDeleteAccountHandler};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

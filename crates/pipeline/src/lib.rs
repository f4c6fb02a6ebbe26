//! # Task Pipeline
//!
//! A bounded worker pool plus one coordinating loop.
//!
//! - Task bodies run on blocking worker threads, at most `worker_threads` at
//!   a time.
//! - The loop alone schedules follow-on work: Decode → Merge, primary pose →
//!   backlog cleanup, Merge → completion check → Object Detection.
//! - A failed or panicked task is logged; nothing is chained from it.
//! - [`PipelineHandle::stop`] closes the queue, drains what was already
//!   submitted and waits for every in-flight task.

mod error;
mod scheduler;
mod tasks;

pub use error::PipelineError;
pub use scheduler::{spawn_pipeline, PipelineHandle, TaskSubmitter};
pub use tasks::{MergeOutcome, TaskContext, TaskOutput};

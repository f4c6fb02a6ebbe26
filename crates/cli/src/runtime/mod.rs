//! Edge runtime orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::EdgeRuntime;
pub use stats::RunStats;

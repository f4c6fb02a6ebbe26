//! # Coordinator
//!
//! Authoritative in-memory store of per-vehicle, per-frame, per-chunk state for
//! the edge, plus the pieces that decide what happens with it:
//!
//! - [`SensorDataCoordinator`]: chunks, poses, backlog, merge buffers, current frame
//! - [`MergeBuffer`]: per-frame point buffer with a bump-pointer offset allocator
//! - [`CompletionChecker`]: neighbour-pairwise upload quota check
//! - [`BandwidthEstimator`]: per-vehicle throughput (naive + time-decayed EWMA)
//! - [`algorithms`]: adapters over the partition/merge collaborators and the
//!   built-in reference implementations
//!
//! ## Locking granularity
//!
//! Every top-level map sits behind its own `parking_lot::Mutex`:
//!
//! | lock | guards |
//! |---|---|
//! | `vehicles` | vehicle states: frames, chunks, poses, neighbour sets |
//! | `backlog` | unmerged backlog + primary-pose-ready map |
//! | `merge_buffers` | frame → buffer instance (lazy) |
//! | `timings` | frame → first chunk arrival |
//!
//! The backlog and the pose-ready map share one lock: "pose not ready, so
//! defer" and "pose ready, so drain" must not interleave. No call path holds
//! two of these locks at once. Each merge buffer guards only its offset
//! counter; sample writes take no lock.

pub mod algorithms;
mod bandwidth;
mod completion;
mod coordinator;
mod error;
mod merge_buffer;
mod state;

pub use bandwidth::{BandwidthEstimator, BandwidthSnapshot};
pub use completion::CompletionChecker;
pub use coordinator::{CoordinatorSettings, SensorDataCoordinator};
pub use error::{CoordinatorError, Result};
pub use merge_buffer::{MergeBuffer, MergeRegion};
pub use state::{SensorDataFrame, VehicleState};

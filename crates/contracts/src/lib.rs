//! # Contracts
//!
//! Frozen interface contracts (ICD) shared by every crate of the edge coordinator.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Id model
//! - `VehicleId` is the 32-bit id a vehicle puts in every uplink header
//! - `FrameId` / `ChunkId` are the 16-bit wire ids; frames advance monotonically per run
//! - a chunk is one partition of one vehicle's point cloud for one frame

mod collaborators;
mod config;
mod data;
mod error;
mod sink;
mod task;
mod wire;

pub use collaborators::*;
pub use config::*;
pub use data::*;
pub use error::*;
pub use sink::*;
pub use task::*;
pub use wire::*;

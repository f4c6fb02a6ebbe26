//! Layered error definitions
//!
//! Categorized by source: config / protocol / downlink / collaborators / sink

use thiserror::Error;

use crate::VehicleId;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Protocol Errors =====
    /// Payload could not be interpreted for its declared message type
    #[error("payload parse error for message type '{kind}': {message}")]
    PayloadParse { kind: char, message: String },

    // ===== Downlink Errors =====
    /// No downlink queue bound for this vehicle
    #[error("no downlink bound for vehicle {vehicle_id}")]
    UnknownVehicle { vehicle_id: VehicleId },

    /// Downlink queue closed underneath us (connection gone)
    #[error("downlink for vehicle {vehicle_id} closed")]
    DownlinkClosed { vehicle_id: VehicleId },

    // ===== Pipeline Errors =====
    /// Task submission rejected (pipeline stopped)
    #[error("task submission rejected: {message}")]
    TaskRejected { message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create payload parse error
    pub fn payload_parse(kind: u8, message: impl Into<String>) -> Self {
        Self::PayloadParse {
            kind: kind as char,
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

/// Point-cloud codec failure
#[derive(Debug, Error)]
#[error("codec error: {message}")]
pub struct CodecError {
    pub message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Partition-decision generator failure
#[derive(Debug, Error)]
#[error("partition error: {message}")]
pub struct PartitionError {
    pub message: String,
}

impl PartitionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Coordinate transform / merge failure
#[derive(Debug, Error)]
pub enum MergeError {
    /// Point array is not a whole number of samples
    #[error("point array of {len} floats is not a multiple of {stride}")]
    MisalignedPoints { len: usize, stride: usize },

    /// Pose vector too short for the transform
    #[error("pose has {len} components, need at least {required}")]
    ShortPose { len: usize, required: usize },

    /// Target region does not match the number of floats to write
    #[error("target region holds {capacity} floats, {required} required")]
    TargetSize { capacity: usize, required: usize },
}

/// Inference collaborator failure
#[derive(Debug, Error)]
#[error("detection error: {message}")]
pub struct DetectionError {
    pub message: String,
}

impl DetectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

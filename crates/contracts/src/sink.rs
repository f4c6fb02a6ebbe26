//! FrameSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for merged-frame sinks.

use crate::{CompletedFrame, ContractError};

/// Merged frame output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(FrameSink: Send)]
pub trait LocalFrameSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write a completed frame
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, frame: &CompletedFrame) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

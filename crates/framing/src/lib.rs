//! # Framing
//!
//! Length-prefixed message framing for both link directions.
//!
//! - [`FrameDecoder`]: growable byte queue with a `try_decode_one` loop
//! - [`UplinkSession`]: edge side, turns vehicle messages into pipeline tasks
//!   and feeds the bandwidth estimator
//! - [`DownlinkSession`]: vehicle side, tracks start/finish signals and the
//!   partition mask
//!
//! A session is driven by exactly one reader; different connections run
//! their sessions concurrently.

mod decoder;
mod downlink;
mod error;
mod payload;
mod uplink;

pub use decoder::{FrameDecoder, WireHeader};
pub use downlink::{DownlinkEvent, DownlinkSession};
pub use error::{FramingError, Result};
pub use payload::{parse_location, parse_raw_points};
pub use uplink::UplinkSession;

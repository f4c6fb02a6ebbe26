//! Edge-side session for one vehicle connection.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use contracts::{
    ChunkId, FrameId, MergeRequest, SensorDataChunk, Task, TaskSink, UplinkHeader, UplinkKind,
    VehicleId, UPLINK_HEADER_LEN,
};
use coordinator::BandwidthEstimator;
use tracing::{debug, error, trace};

use crate::payload::{parse_location, parse_raw_points};
use crate::{FrameDecoder, FramingError, Result};

/// Per-vehicle transfer counter: bumps whenever (frame, chunk) changes
#[derive(Debug, Clone, Copy)]
struct TransferKey {
    frame_id: FrameId,
    chunk_id: ChunkId,
    seq: u64,
}

/// Turns one connection's byte stream into pipeline tasks.
///
/// Must be driven sequentially; it owns the connection's buffer.
pub struct UplinkSession {
    decoder: FrameDecoder<UplinkHeader>,
    tasks: Arc<dyn TaskSink>,
    bandwidth: Arc<BandwidthEstimator>,
    primary_vehicle_id: VehicleId,
    transfers: HashMap<VehicleId, TransferKey>,
    vehicle_id: Option<VehicleId>,
}

impl UplinkSession {
    pub fn new(
        tasks: Arc<dyn TaskSink>,
        bandwidth: Arc<BandwidthEstimator>,
        primary_vehicle_id: VehicleId,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            decoder: FrameDecoder::new(max_message_bytes),
            tasks,
            bandwidth,
            primary_vehicle_id,
            transfers: HashMap::new(),
            vehicle_id: None,
        }
    }

    /// Vehicle id from the first header seen on this connection
    pub fn vehicle_id(&self) -> Option<VehicleId> {
        self.vehicle_id
    }

    /// Append a read and dispatch every complete message it finishes.
    ///
    /// Returns the vehicle id the first time a header identifies the sender.
    /// Later messages carrying another vehicle id are skipped as protocol
    /// errors.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Option<VehicleId>> {
        self.decoder.extend(bytes);

        let identified = match (self.vehicle_id, self.decoder.peek_header()) {
            (None, Some(header)) => {
                self.vehicle_id = Some(header.vehicle_id);
                Some(header.vehicle_id)
            }
            _ => None,
        };

        loop {
            self.sample_bandwidth();
            match self.decoder.try_decode_one()? {
                Some((header, payload)) => match self.vehicle_id {
                    Some(owner) if owner != header.vehicle_id => self.protocol_error(
                        &header,
                        "vehicle_mismatch",
                        &format!("connection identified as vehicle {owner}"),
                    ),
                    _ => self.dispatch(header, payload)?,
                },
                None => break,
            }
        }
        Ok(identified)
    }

    /// Feed transfer progress of the message at the head of the buffer
    fn sample_bandwidth(&mut self) {
        let Some(header) = self.decoder.peek_header() else {
            return;
        };
        if !header.kind.carries_points() || self.vehicle_id != Some(header.vehicle_id) {
            return;
        }
        let declared = header.payload_len as u64;
        let received = (self.decoder.buffered_payload() as u64).min(declared);
        let key = self.transfer_key(&header);
        let overhead = UPLINK_HEADER_LEN as u64;
        self.bandwidth
            .on_receive(header.vehicle_id, key, received + overhead, declared + overhead);
    }

    fn transfer_key(&mut self, header: &UplinkHeader) -> u64 {
        let entry = self
            .transfers
            .entry(header.vehicle_id)
            .or_insert(TransferKey {
                frame_id: header.frame_id,
                chunk_id: header.chunk_id,
                seq: 0,
            });
        if (entry.frame_id, entry.chunk_id) != (header.frame_id, header.chunk_id) {
            entry.frame_id = header.frame_id;
            entry.chunk_id = header.chunk_id;
            entry.seq += 1;
        }
        entry.seq
    }

    fn dispatch(&self, header: UplinkHeader, payload: Bytes) -> Result<()> {
        observability::record_message_received(header.kind.label());
        let UplinkHeader {
            vehicle_id,
            frame_id,
            chunk_id,
            ..
        } = header;

        match header.kind {
            UplinkKind::Compressed => {
                trace!(vehicle_id, frame_id, chunk_id, bytes = payload.len(), "Compressed chunk");
                self.submit(Task::Decode(SensorDataChunk::compressed(
                    vehicle_id, frame_id, chunk_id, payload,
                )))
            }
            UplinkKind::Raw => match parse_raw_points(&payload) {
                Ok(points) => {
                    trace!(vehicle_id, frame_id, chunk_id, samples = points.len(), "Raw chunk");
                    self.submit(Task::Merge(MergeRequest::Immediate(SensorDataChunk::decoded(
                        vehicle_id, frame_id, chunk_id, points,
                    ))))
                }
                Err(e) => {
                    self.protocol_error(&header, "raw_payload", &e.to_string());
                    Ok(())
                }
            },
            UplinkKind::Location => match parse_location(&payload) {
                Ok(location) => {
                    debug!(vehicle_id, frame_id, "Pose received");
                    self.submit(Task::LocationUpdate {
                        vehicle_id,
                        frame_id,
                        location,
                    })?;
                    if vehicle_id == self.primary_vehicle_id {
                        self.submit(Task::Merge(MergeRequest::Cleanup { frame_id }))?;
                    }
                    Ok(())
                }
                Err(e) => {
                    self.protocol_error(&header, "location_payload", &e.to_string());
                    Ok(())
                }
            },
            UplinkKind::Handshake => {
                trace!(vehicle_id, "Handshake");
                Ok(())
            }
            UplinkKind::Unknown(byte) => {
                self.protocol_error(
                    &header,
                    "unknown_type",
                    &format!("unknown message type 0x{byte:02x}"),
                );
                Ok(())
            }
        }
    }

    fn submit(&self, task: Task) -> Result<()> {
        self.tasks.submit(task).map_err(FramingError::Submit)
    }

    fn protocol_error(&self, header: &UplinkHeader, reason: &str, detail: &str) {
        error!(
            vehicle_id = header.vehicle_id,
            frame_id = header.frame_id,
            chunk_id = header.chunk_id,
            declared = header.payload_len,
            reason,
            detail,
            "Protocol error, message skipped"
        );
        observability::record_protocol_error(reason);
    }
}

//! Wire formats for both link directions.
//!
//! All integers are big-endian, no padding.
//!
//! Uplink (vehicle → edge), 13-byte header:
//! `[size:u32][vehicleId:u32][frameId:u16][chunkId:u16][type:u8][payload]`
//!
//! Downlink (edge → vehicle), 7-byte header:
//! `[size:u32][frameId:u16][type:u8][payload]`, frame id `0xFFFF` (-1) when unused.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{BoundaryDescriptor, ChunkId, ContractError, FrameId, VehicleId, VehicleLocation};

pub const UPLINK_HEADER_LEN: usize = 13;
pub const DOWNLINK_HEADER_LEN: usize = 7;

/// Downlink frame id meaning "no frame"
const NO_FRAME: u16 = u16::MAX;

/// Uplink message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UplinkKind {
    /// `P` codec-compressed point cloud chunk
    Compressed,
    /// `R` raw big-endian f32 samples
    Raw,
    /// `O` ASCII space-separated pose floats
    Location,
    /// `X` empty handshake
    Handshake,
    /// Anything else; consumed and reported as a protocol error
    Unknown(u8),
}

impl UplinkKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'P' => Self::Compressed,
            b'R' => Self::Raw,
            b'O' => Self::Location,
            b'X' => Self::Handshake,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Compressed => b'P',
            Self::Raw => b'R',
            Self::Location => b'O',
            Self::Handshake => b'X',
            Self::Unknown(b) => b,
        }
    }

    /// Label for logs and metrics
    pub fn label(self) -> &'static str {
        match self {
            Self::Compressed => "compressed",
            Self::Raw => "raw",
            Self::Location => "location",
            Self::Handshake => "handshake",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Point-cloud bearing types feed the bandwidth estimator
    pub fn carries_points(self) -> bool {
        matches!(self, Self::Compressed | Self::Raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkHeader {
    pub payload_len: u32,
    pub vehicle_id: VehicleId,
    pub frame_id: FrameId,
    pub chunk_id: ChunkId,
    pub kind: UplinkKind,
}

impl UplinkHeader {
    /// Parse from the front of `buf`; `None` if fewer than 13 bytes
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < UPLINK_HEADER_LEN {
            return None;
        }
        let mut b = &buf[..UPLINK_HEADER_LEN];
        Some(Self {
            payload_len: b.get_u32(),
            vehicle_id: b.get_u32(),
            frame_id: b.get_u16(),
            chunk_id: b.get_u16(),
            kind: UplinkKind::from_byte(b.get_u8()),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(UPLINK_HEADER_LEN);
        dst.put_u32(self.payload_len);
        dst.put_u32(self.vehicle_id);
        dst.put_u16(self.frame_id);
        dst.put_u16(self.chunk_id);
        dst.put_u8(self.kind.as_byte());
    }
}

/// One complete uplink message
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkMessage {
    pub header: UplinkHeader,
    pub payload: Bytes,
}

impl UplinkMessage {
    pub fn new(
        kind: UplinkKind,
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
        payload: Bytes,
    ) -> Self {
        Self {
            header: UplinkHeader {
                payload_len: payload.len() as u32,
                vehicle_id,
                frame_id,
                chunk_id,
                kind,
            },
            payload,
        }
    }

    pub fn handshake(vehicle_id: VehicleId) -> Self {
        Self::new(UplinkKind::Handshake, vehicle_id, 0, 0, Bytes::new())
    }

    pub fn compressed(
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
        payload: Bytes,
    ) -> Self {
        Self::new(UplinkKind::Compressed, vehicle_id, frame_id, chunk_id, payload)
    }

    /// `R` message: samples as big-endian f32
    pub fn raw_points(
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
        points: &[f32],
    ) -> Self {
        let mut payload = BytesMut::with_capacity(points.len() * 4);
        for p in points {
            payload.put_f32(*p);
        }
        Self::new(UplinkKind::Raw, vehicle_id, frame_id, chunk_id, payload.freeze())
    }

    /// `O` message: pose as ASCII space-separated floats
    pub fn location(vehicle_id: VehicleId, frame_id: FrameId, location: &VehicleLocation) -> Self {
        let text = location
            .as_slice()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Self::new(
            UplinkKind::Location,
            vehicle_id,
            frame_id,
            0,
            Bytes::from(text.into_bytes()),
        )
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(UPLINK_HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Downlink message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownlinkKind {
    /// `I` inference result (reserved)
    Inference,
    /// `M` partition decision
    Decision,
    /// `S` start signal
    Start,
    /// `D` per-frame finish signal
    Finish,
    Unknown(u8),
}

impl DownlinkKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'I' => Self::Inference,
            b'M' => Self::Decision,
            b'S' => Self::Start,
            b'D' => Self::Finish,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Inference => b'I',
            Self::Decision => b'M',
            Self::Start => b'S',
            Self::Finish => b'D',
            Self::Unknown(b) => b,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Decision => "decision",
            Self::Start => "start",
            Self::Finish => "finish",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownlinkHeader {
    pub payload_len: u32,
    pub frame_id: Option<FrameId>,
    pub kind: DownlinkKind,
}

impl DownlinkHeader {
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < DOWNLINK_HEADER_LEN {
            return None;
        }
        let mut b = &buf[..DOWNLINK_HEADER_LEN];
        let payload_len = b.get_u32();
        let frame = b.get_u16();
        Some(Self {
            payload_len,
            frame_id: (frame != NO_FRAME).then_some(frame),
            kind: DownlinkKind::from_byte(b.get_u8()),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(DOWNLINK_HEADER_LEN);
        dst.put_u32(self.payload_len);
        dst.put_u16(self.frame_id.unwrap_or(NO_FRAME));
        dst.put_u8(self.kind.as_byte());
    }
}

/// One complete downlink message
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkMessage {
    pub kind: DownlinkKind,
    pub frame_id: Option<FrameId>,
    pub payload: Bytes,
}

impl DownlinkMessage {
    /// `S`: start uploading, frame 0
    pub fn start() -> Self {
        Self {
            kind: DownlinkKind::Start,
            frame_id: Some(0),
            payload: Bytes::new(),
        }
    }

    /// `D`: frame finished on the edge
    pub fn finish(frame_id: FrameId) -> Self {
        Self {
            kind: DownlinkKind::Finish,
            frame_id: Some(frame_id),
            payload: Bytes::new(),
        }
    }

    /// `M`: partition boundaries for this vehicle
    pub fn decision(
        frame_id: FrameId,
        boundaries: &[BoundaryDescriptor],
    ) -> Result<Self, ContractError> {
        Ok(Self {
            kind: DownlinkKind::Decision,
            frame_id: Some(frame_id),
            payload: encode_decision_payload(boundaries)?,
        })
    }

    pub fn header(&self) -> DownlinkHeader {
        DownlinkHeader {
            payload_len: self.payload.len() as u32,
            frame_id: self.frame_id,
            kind: self.kind,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DOWNLINK_HEADER_LEN + self.payload.len());
        self.header().encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Serialize the per-neighbour boundary list of an `M` message
pub fn encode_decision_payload(boundaries: &[BoundaryDescriptor]) -> Result<Bytes, ContractError> {
    bincode::serialize(boundaries)
        .map(Bytes::from)
        .map_err(|e| ContractError::payload_parse(b'M', format!("encode decision: {e}")))
}

/// Inverse of [`encode_decision_payload`]
pub fn decode_decision_payload(payload: &[u8]) -> Result<Vec<BoundaryDescriptor>, ContractError> {
    bincode::deserialize(payload)
        .map_err(|e| ContractError::payload_parse(b'M', format!("decode decision: {e}")))
}

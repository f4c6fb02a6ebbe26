//! Vehicle-side session: decodes edge → vehicle messages.

use contracts::{
    decode_decision_payload, BoundaryDescriptor, DownlinkHeader, DownlinkKind, FrameId,
};
use tracing::{debug, warn};

use crate::{FrameDecoder, Result};

/// What a vehicle learned from one downlink message
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkEvent {
    /// `S`: uploads may begin
    Started,
    /// `D`: edge finished this frame
    FrameFinished(FrameId),
    /// `M`: new partition boundaries
    Decision {
        frame_id: Option<FrameId>,
        boundaries: Vec<BoundaryDescriptor>,
    },
    /// `I`: accepted and ignored
    Inference,
}

/// Tracks the start flag, next frame to upload, and the latest partition mask
#[derive(Debug)]
pub struct DownlinkSession {
    decoder: FrameDecoder<DownlinkHeader>,
    started: bool,
    next_frame: FrameId,
    boundaries: Vec<BoundaryDescriptor>,
}

impl DownlinkSession {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_message_bytes),
            started: false,
            next_frame: 0,
            boundaries: Vec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn next_frame(&self) -> FrameId {
        self.next_frame
    }

    /// Latest partition mask (empty until the first `M`)
    pub fn boundaries(&self) -> &[BoundaryDescriptor] {
        &self.boundaries
    }

    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Vec<DownlinkEvent>> {
        self.decoder.extend(bytes);
        let mut events = Vec::new();
        while let Some((header, payload)) = self.decoder.try_decode_one()? {
            match header.kind {
                DownlinkKind::Start => {
                    self.started = true;
                    events.push(DownlinkEvent::Started);
                }
                DownlinkKind::Finish => {
                    let Some(frame_id) = header.frame_id else {
                        warn!("Finish signal without frame id");
                        continue;
                    };
                    self.next_frame = frame_id.wrapping_add(1);
                    events.push(DownlinkEvent::FrameFinished(frame_id));
                }
                DownlinkKind::Decision => match decode_decision_payload(&payload) {
                    Ok(boundaries) => {
                        self.boundaries = boundaries.clone();
                        events.push(DownlinkEvent::Decision {
                            frame_id: header.frame_id,
                            boundaries,
                        });
                    }
                    Err(e) => warn!(error = %e, "Undecodable partition decision"),
                },
                DownlinkKind::Inference => {
                    debug!(bytes = payload.len(), "Inference result ignored");
                    events.push(DownlinkEvent::Inference);
                }
                DownlinkKind::Unknown(byte) => {
                    warn!(kind = byte, "Unknown downlink message type");
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::DownlinkMessage;

    #[test]
    fn test_tracks_start_finish_and_mask() {
        let mut session = DownlinkSession::new(1 << 16);
        let boundaries = vec![vec![1.0, 0.0, 5.0, 1.0]];
        let mut stream = DownlinkMessage::start().encode().to_vec();
        stream.extend_from_slice(&DownlinkMessage::finish(0).encode());
        stream.extend_from_slice(&DownlinkMessage::decision(0, &boundaries).unwrap().encode());

        let (head, tail) = stream.split_at(9);
        let mut events = session.on_bytes(head).unwrap();
        events.extend(session.on_bytes(tail).unwrap());

        assert_eq!(
            events,
            vec![
                DownlinkEvent::Started,
                DownlinkEvent::FrameFinished(0),
                DownlinkEvent::Decision {
                    frame_id: Some(0),
                    boundaries: boundaries.clone(),
                },
            ]
        );
        assert!(session.is_started());
        assert_eq!(session.next_frame(), 1);
        assert_eq!(session.boundaries(), boundaries.as_slice());
    }

    #[test]
    fn test_inference_ignored_and_bad_mask_skipped() {
        let mut session = DownlinkSession::new(1 << 16);
        let inference = DownlinkMessage {
            kind: DownlinkKind::Inference,
            frame_id: None,
            payload: Bytes::from_static(b"cars=3"),
        };
        let bad_mask = DownlinkMessage {
            kind: DownlinkKind::Decision,
            frame_id: Some(2),
            payload: Bytes::from_static(&[1]),
        };
        let mut stream = inference.encode().to_vec();
        stream.extend_from_slice(&bad_mask.encode());

        assert_eq!(session.on_bytes(&stream).unwrap(), vec![DownlinkEvent::Inference]);
        assert!(session.boundaries().is_empty());
        assert!(!session.is_started());
    }
}

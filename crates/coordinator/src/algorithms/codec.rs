use contracts::{CodecError, PointCloudCodec};

/// Uncompressed little-endian f32 codec.
///
/// `level` has no effect. A non-zero `quantization` snaps every value to a
/// grid of `2^-quantization` before writing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPointCodec;

const MAX_QUANTIZATION_BITS: u8 = 23;

impl PointCloudCodec for RawPointCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
        if bytes.len() % 4 != 0 {
            return Err(CodecError::new(format!(
                "payload of {} bytes is not a whole number of f32",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn encode(&self, points: &[f32], _level: u8, quantization: u8) -> Result<Vec<u8>, CodecError> {
        if quantization > MAX_QUANTIZATION_BITS {
            return Err(CodecError::new(format!(
                "quantization {quantization} exceeds {MAX_QUANTIZATION_BITS} bits"
            )));
        }
        let scale = 2f32.powi(i32::from(quantization));
        let mut out = Vec::with_capacity(points.len() * 4);
        for &value in points {
            let value = if quantization == 0 {
                value
            } else {
                (value * scale).round() / scale
            };
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }
}

//! Payload parsers for the point-bearing and pose uplink types.

use bytes::Buf;
use contracts::{ContractError, VehicleLocation};

/// `R` payload: big-endian f32 samples
pub fn parse_raw_points(mut payload: &[u8]) -> Result<Vec<f32>, ContractError> {
    if payload.len() % 4 != 0 {
        return Err(ContractError::payload_parse(
            b'R',
            format!("{} bytes is not a whole number of f32", payload.len()),
        ));
    }
    let mut points = Vec::with_capacity(payload.len() / 4);
    while payload.has_remaining() {
        points.push(payload.get_f32());
    }
    Ok(points)
}

/// `O` payload: whitespace-separated ASCII floats
pub fn parse_location(payload: &[u8]) -> Result<VehicleLocation, ContractError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ContractError::payload_parse(b'O', format!("not utf-8: {e}")))?;
    let values = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|e| ContractError::payload_parse(b'O', format!("'{token}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err(ContractError::payload_parse(b'O', "empty pose"));
    }
    Ok(VehicleLocation::new(values))
}

//! JSON payloads exchanged with the calibration controller.
//!
//! Inbound control: `{"type":"start"}`.
//! Outbound data: `{"type":"data","locations":[[[x,y],...],...]}` with every
//! coordinate rendered with six fractional digits.

use serde::Deserialize;
use thiserror::Error;

use crate::points::{Point, PointSet};

/// Payload of the start trigger.
pub const START_PAYLOAD: &str = r#"{"type":"start"}"#;

/// Wire format errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Unrecognized message type: {0}")]
    Unrecognized(String),
    #[error("Capture {capture} point {index} has a non-finite coordinate")]
    NonFinite { capture: usize, index: usize },
}

/// Control messages understood by the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Start,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct DataMessage {
    locations: Vec<Vec<[f64; 2]>>,
}

/// Parse an inbound control payload.
pub fn parse_control(payload: &[u8]) -> Result<ControlMessage, WireError> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))?;

    match envelope.kind.as_str() {
        "start" => Ok(ControlMessage::Start),
        other => Err(WireError::Unrecognized(other.to_string())),
    }
}

pub fn encode_start() -> Vec<u8> {
    START_PAYLOAD.as_bytes().to_vec()
}

/// Render a completed round as a data message.
pub fn encode_data(captures: &[PointSet]) -> Result<String, WireError> {
    let mut out = String::from(r#"{"type":"data","locations":["#);

    for (c, capture) in captures.iter().enumerate() {
        if c > 0 {
            out.push(',');
        }
        out.push('[');
        for (i, p) in capture.iter().enumerate() {
            if !p.is_finite() {
                return Err(WireError::NonFinite { capture: c, index: i });
            }
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("[{:.6},{:.6}]", p.x, p.y));
        }
        out.push(']');
    }

    out.push_str("]}");
    Ok(out)
}

/// Parse a data message back into its captures.
pub fn decode_data(payload: &[u8]) -> Result<Vec<PointSet>, WireError> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    if envelope.kind != "data" {
        return Err(WireError::Unrecognized(envelope.kind));
    }

    let message: DataMessage =
        serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))?;

    Ok(message
        .locations
        .into_iter()
        .map(|capture| capture.into_iter().map(|[x, y]| Point::new(x, y)).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<PointSet> {
        vec![
            vec![Point::new(10.0, 20.0), Point::new(30.0, 40.0)],
            vec![Point::new(11.0, 21.0), Point::new(29.0, 39.0)],
        ]
    }

    #[test]
    fn test_encode_data_exact_bytes() {
        let expected = r#"{"type":"data","locations":[[[10.000000,20.000000],[30.000000,40.000000]],[[11.000000,21.000000],[29.000000,39.000000]]]}"#;
        assert_eq!(encode_data(&sample()).unwrap(), expected);
    }

    #[test]
    fn test_decode_data_recovers_captures() {
        let encoded = encode_data(&sample()).unwrap();
        assert_eq!(decode_data(encoded.as_bytes()).unwrap(), sample());
    }

    #[test]
    fn test_encode_fractional_and_empty() {
        let captures = vec![vec![Point::new(0.5, -1.25)], Vec::new()];
        assert_eq!(
            encode_data(&captures).unwrap(),
            r#"{"type":"data","locations":[[[0.500000,-1.250000]],[]]}"#
        );
        assert_eq!(encode_data(&[]).unwrap(), r#"{"type":"data","locations":[]}"#);
    }

    #[test]
    fn test_encode_rejects_nan() {
        let captures = vec![vec![Point::new(1.0, 1.0), Point::new(f64::NAN, 2.0)]];
        assert_eq!(
            encode_data(&captures),
            Err(WireError::NonFinite { capture: 0, index: 1 })
        );
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control(&encode_start()), Ok(ControlMessage::Start));
        assert_eq!(
            parse_control(br#"{"type":"start","extra":1}"#),
            Ok(ControlMessage::Start)
        );
        assert!(matches!(
            parse_control(br#"{"type":"stop"}"#),
            Err(WireError::Unrecognized(kind)) if kind == "stop"
        ));
        assert!(matches!(parse_control(b"start"), Err(WireError::Malformed(_))));
        assert!(matches!(parse_control(br#"{"kind":"start"}"#), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_start() {
        assert!(matches!(
            decode_data(START_PAYLOAD.as_bytes()),
            Err(WireError::Unrecognized(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Bytes of the fixed prefix every report carries.
pub const REPORT_LEN: usize = 8;

/// Errors raised while decoding a report frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("report truncated: {len} bytes, need {REPORT_LEN}")]
    Truncated { len: usize },
}

/// One decoded tag event.
///
/// Wire layout: `[0..4)` opaque payload, `[4..6)` index (u16 LE),
/// `[6..8)` antenna count (u16 LE). Trailing bytes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedReport {
    pub payload: [u8; 4],
    pub index: u16,
    pub antenna_count: u16,
}

impl DecodedReport {
    pub fn new(payload: [u8; 4], index: u16, antenna_count: u16) -> Self {
        Self {
            payload,
            index,
            antenna_count,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReportError> {
        if bytes.len() < REPORT_LEN {
            return Err(ReportError::Truncated { len: bytes.len() });
        }

        let mut payload = [0u8; 4];
        payload.copy_from_slice(&bytes[0..4]);
        let index = u16::from_le_bytes([bytes[4], bytes[5]]);
        let antenna_count = u16::from_le_bytes([bytes[6], bytes[7]]);

        Ok(Self {
            payload,
            index,
            antenna_count,
        })
    }

    pub fn encode(&self) -> [u8; REPORT_LEN] {
        let mut out = [0u8; REPORT_LEN];
        out[0..4].copy_from_slice(&self.payload);
        out[4..6].copy_from_slice(&self.index.to_le_bytes());
        out[6..8].copy_from_slice(&self.antenna_count.to_le_bytes());
        out
    }

    /// Payload bytes as `"DE AD BE EF "`.
    pub fn hex_prefix(&self) -> String {
        hex_bytes(&self.payload)
    }

    /// Operator line: hex prefix, `" | "`, then the index.
    pub fn summary_line(&self) -> String {
        format!("{} | {}", self.hex_prefix(), self.index)
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(out, "{:02X} ", byte);
    }
    out
}

/// Display form of one received message, valid or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub hex: String,
    pub index: Option<u16>,
    pub antenna_count: Option<u16>,
    pub length: usize,
    pub malformed: bool,
    pub line: String,
}

impl ReportSummary {
    /// Decodes `bytes`, degrading to a malformed summary instead of failing.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match DecodedReport::decode(bytes) {
            Ok(report) => Self::from_report(&report, bytes.len()),
            Err(ReportError::Truncated { len }) => Self::malformed(bytes, len),
        }
    }

    pub fn from_report(report: &DecodedReport, length: usize) -> Self {
        Self {
            hex: report.hex_prefix(),
            index: Some(report.index),
            antenna_count: Some(report.antenna_count),
            length,
            malformed: false,
            line: report.summary_line(),
        }
    }

    pub fn malformed(bytes: &[u8], length: usize) -> Self {
        let hex = hex_bytes(&bytes[..bytes.len().min(4)]);
        let line = format!("{} | <truncated: {} bytes>", hex, length);
        Self {
            hex,
            index: None,
            antenna_count: None,
            length,
            malformed: true,
            line,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_report() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x02, 0x00];
        let report = DecodedReport::decode(&bytes).unwrap();
        assert_eq!(report.hex_prefix(), "DE AD BE EF ");
        assert_eq!(report.index, 5);
        assert_eq!(report.antenna_count, 2);
        assert_eq!(report.summary_line(), "DE AD BE EF  | 5");
    }

    #[test]
    fn decodes_full_range_index_and_antenna_count() {
        let bytes = [0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x04, 0x00];
        let report = DecodedReport::decode(&bytes).unwrap();
        assert_eq!(report.index, 65535);
        assert_eq!(report.antenna_count, 4);
    }

    #[test]
    fn decoding_is_deterministic() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x2A, 0x01, 0x04, 0x00, 0xAA];
        let first = DecodedReport::decode(&bytes).unwrap();
        let second = DecodedReport::decode(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hex_prefix(), second.hex_prefix());
        assert_eq!(first.index, 0x012A);
    }

    #[test]
    fn index_survives_encoding_at_offset_four() {
        for value in [0u16, 1, 255, 256, 4096, 65534, 65535] {
            let report = DecodedReport::new([1, 2, 3, 4], value, 4);
            let bytes = report.encode();
            assert_eq!(&bytes[4..6], &value.to_le_bytes());
            assert_eq!(DecodedReport::decode(&bytes).unwrap().index, value);
        }
    }

    #[test]
    fn short_message_is_truncated_error() {
        assert_eq!(
            DecodedReport::decode(&[0xDE, 0xAD, 0xBE]),
            Err(ReportError::Truncated { len: 3 })
        );
    }

    #[test]
    fn short_message_degrades_to_malformed_summary() {
        let summary = ReportSummary::from_bytes(&[0xDE, 0xAD, 0xBE]);
        assert!(summary.malformed);
        assert_eq!(summary.index, None);
        assert_eq!(summary.line, "DE AD BE  | <truncated: 3 bytes>");

        let empty = ReportSummary::from_bytes(&[]);
        assert!(empty.malformed);
        assert_eq!(empty.length, 0);
    }

    #[test]
    fn summary_serializes_antenna_count() {
        let summary = ReportSummary::from_bytes(&[0, 0, 0, 0, 7, 0, 4, 0]);
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"antenna_count\":4"));
        assert!(json.contains("\"index\":7"));
    }
}

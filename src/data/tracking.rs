//! Tracking data samples.

use bytes::Bytes;
use chrono::{DateTime, Local};
use std::fmt;

use crate::utils::hex_string;

/// Timestamp layout used when rendering a sample.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// A single sample received from a tracker.
///
/// Produced once per notification (stamped with the notification's own
/// timestamp) or per explicit read (stamped with the wall-clock time of the
/// read). The payload is kept exactly as the peripheral sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackingData {
    timestamp: DateTime<Local>,
    raw_payload: Bytes,
}

impl TrackingData {
    /// Create a new sample.
    pub fn new(timestamp: DateTime<Local>, raw_payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            raw_payload: raw_payload.into(),
        }
    }

    /// When the sample was produced.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// The raw payload bytes.
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw_payload
    }

    /// The first payload byte, if any.
    pub fn first_byte(&self) -> Option<u8> {
        self.raw_payload.first().copied()
    }

    /// The payload as a `0x`-prefixed hex string.
    pub fn payload_hex(&self) -> String {
        hex_string(&self.raw_payload)
    }
}

impl fmt::Display for TrackingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp.format(TIMESTAMP_FORMAT))?;
        match self.first_byte() {
            Some(byte) => write!(f, " {}", byte),
            None => write!(f, " -"),
        }
    }
}

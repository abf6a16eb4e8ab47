use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One sensor reading as published by a weather station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub station: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub sensor: String,
    pub value: f64,
}

impl TelemetryEvent {
    pub fn new(
        station: impl Into<String>,
        timestamp: i64,
        sensor: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            station: station.into(),
            timestamp,
            sensor: sensor.into(),
            value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BorrowedReading<'a> {
    #[serde(borrow)]
    station: &'a str,
    timestamp: i64,
    #[serde(borrow)]
    sensor: &'a str,
    value: f64,
}

/// Decodes a `readings` payload. simd-json parses in place, so the buffer is mutated.
pub fn parse_reading_payload(payload: &mut [u8]) -> Result<TelemetryEvent> {
    let reading: BorrowedReading =
        simd_json::from_slice(payload).context("invalid reading payload")?;
    Ok(TelemetryEvent {
        station: reading.station.to_string(),
        timestamp: reading.timestamp,
        sensor: reading.sensor.to_string(),
        value: reading.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reading_payload_decodes_station_event() {
        let mut payload = br#"{
            "station":"4b1c9a8e-0000-4000-8000-000000000001",
            "timestamp":1700000000,
            "sensor":"temperature",
            "value":20.13
        }"#
        .to_vec();
        let event = parse_reading_payload(&mut payload).expect("parsed");
        assert_eq!(event.station, "4b1c9a8e-0000-4000-8000-000000000001");
        assert_eq!(event.timestamp, 1_700_000_000);
        assert_eq!(event.sensor, "temperature");
        assert!((event.value - 20.13).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_reading_payload_rejects_missing_value() {
        let mut payload = br#"{"station":"s1","timestamp":1,"sensor":"uv"}"#.to_vec();
        assert!(parse_reading_payload(&mut payload).is_err());
    }

    #[test]
    fn parse_reading_payload_rejects_garbage() {
        let mut payload = b"not json".to_vec();
        assert!(parse_reading_payload(&mut payload).is_err());
    }
}

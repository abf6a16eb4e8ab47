use crate::sensors::{Sensor, SensorKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use weather_ingest::telemetry::TelemetryEvent;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StationError {
    #[error("sensor {0:?} not found")]
    UnknownSensor(String),
}

/// A simulated station carrying one sensor of every kind.
pub struct WeatherStation {
    station_id: String,
    sensors: BTreeMap<SensorKind, Sensor>,
    rng: StdRng,
}

impl WeatherStation {
    pub fn new() -> Self {
        Self::with_rng(uuid::Uuid::new_v4().to_string(), StdRng::from_entropy())
    }

    pub fn with_id(station_id: impl Into<String>) -> Self {
        Self::with_rng(station_id, StdRng::from_entropy())
    }

    pub fn with_rng(station_id: impl Into<String>, rng: StdRng) -> Self {
        let sensors = SensorKind::ALL
            .into_iter()
            .map(|kind| (kind, Sensor::new(kind)))
            .collect();
        Self {
            station_id: station_id.into(),
            sensors,
            rng,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Samples every sensor once, stamping each event with `now` (unix seconds).
    pub fn read_all(&mut self, now: i64) -> Vec<TelemetryEvent> {
        let rng = &mut self.rng;
        self.sensors
            .values_mut()
            .map(|sensor| {
                let value = sensor.read(rng);
                TelemetryEvent::new(self.station_id.as_str(), now, sensor.kind().name(), value)
            })
            .collect()
    }

    pub fn read_sensor(&mut self, name: &str) -> Result<f64, StationError> {
        let rng = &mut self.rng;
        SensorKind::from_name(name)
            .and_then(|kind| self.sensors.get_mut(&kind))
            .map(|sensor| sensor.read(rng))
            .ok_or_else(|| StationError::UnknownSensor(name.to_string()))
    }

    pub fn set_sensor_value(&mut self, name: &str, value: f64) -> Result<(), StationError> {
        self.sensor_mut(name)?.set_value(value);
        Ok(())
    }

    fn sensor_mut(&mut self, name: &str) -> Result<&mut Sensor, StationError> {
        SensorKind::from_name(name)
            .and_then(|kind| self.sensors.get_mut(&kind))
            .ok_or_else(|| StationError::UnknownSensor(name.to_string()))
    }
}

impl Default for WeatherStation {
    fn default() -> Self {
        Self::new()
    }
}

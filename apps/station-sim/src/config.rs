use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub station_id: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub readings_topic: String,
    pub publish_interval: Duration,
    /// `sensor=value` pairs that pin a sensor's base, e.g. to trip alerts.
    pub sensor_overrides: Vec<(String, f64)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let station_id = env_optional(lookup, "STATION_ID");
        let mqtt_url = env_string(
            lookup,
            "STATION_MQTT_URL",
            Some("mqtt://127.0.0.1:1883".to_string()),
        )?;
        let mqtt_username = env_optional(lookup, "STATION_MQTT_USERNAME");
        let mqtt_password = env_optional(lookup, "STATION_MQTT_PASSWORD");

        let url = Url::parse(&mqtt_url).context("invalid STATION_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("STATION_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);

        let mqtt_client_id = env_string(
            lookup,
            "STATION_CLIENT_ID",
            Some("weather-station".to_string()),
        )?;
        let readings_topic =
            env_string(lookup, "STATION_READINGS_TOPIC", Some("readings".to_string()))?;
        let publish_interval_ms = env_u64(lookup, "STATION_PUBLISH_INTERVAL_MS", Some(1000))?;
        if publish_interval_ms == 0 {
            bail!("STATION_PUBLISH_INTERVAL_MS must be greater than zero");
        }

        let sensor_overrides = match env_optional(lookup, "STATION_SENSOR_OVERRIDES") {
            Some(raw) => parse_overrides(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            station_id,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            readings_topic,
            publish_interval: Duration::from_millis(publish_interval_ms),
            sensor_overrides,
        })
    }
}

fn parse_overrides(raw: &str) -> Result<Vec<(String, f64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid STATION_SENSOR_OVERRIDES entry {pair:?}"))?;
            let value = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid STATION_SENSOR_OVERRIDES value for {name}"))?;
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn env_string(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: Option<String>,
) -> Result<String> {
    match lookup(key) {
        Some(value) => Ok(value.trim().to_string()),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: Option<u64>) -> Result<u64> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

use crate::alerts::{default_rules, parse_rules, AlertRule};
use crate::pipeline::EngineConfig;
use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "WEATHER_INGEST_CONFIG_PATH";

/// Optional JSON file layered under the environment. Env vars always win.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFileOverrides {
    #[serde(default)]
    store_addr: Option<String>,
    #[serde(default)]
    pool_size: Option<usize>,
    #[serde(default)]
    buffer_capacity: Option<usize>,
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    readings_topic: Option<String>,
    #[serde(default)]
    alerts_topic: Option<String>,
    #[serde(default)]
    alert_rules: Option<Vec<AlertRule>>,
}

fn load_file_overrides(vars: &HashMap<String, String>) -> Option<ConfigFileOverrides> {
    let path = vars
        .get(CONFIG_PATH_VAR)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)?;
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "weather-ingest failed to read config file; using env defaults"
            );
            return None;
        }
    };
    parse_file_overrides(contents, &path)
}

fn parse_file_overrides(contents: String, path: &std::path::Path) -> Option<ConfigFileOverrides> {
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "weather-ingest failed to parse config file; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store_addr: String,
    pub pool_size: usize,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub dial_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub enable_mqtt_listener: bool,
    pub readings_topic: String,
    pub alerts_topic: String,
    pub http_bind: Option<String>,
    pub report_interval_secs: u64,
    pub alert_rules: Vec<AlertRule>,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        let overrides = load_file_overrides(&vars);
        Self::from_vars(&vars, overrides.unwrap_or_default())
    }

    fn from_vars(vars: &HashMap<String, String>, file: ConfigFileOverrides) -> Result<Self> {
        let lookup = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parse_usize = |key: &str, fallback: usize| -> Result<usize> {
            match lookup(key) {
                Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid {key}")),
                None => Ok(fallback),
            }
        };
        let parse_u64 = |key: &str, fallback: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw.parse::<u64>().with_context(|| format!("invalid {key}")),
                None => Ok(fallback),
            }
        };

        let store_addr = lookup("WEATHER_STORE_ADDR")
            .or_else(|| non_empty(file.store_addr.as_deref()))
            .unwrap_or_else(|| "127.0.0.1:9009".to_string());
        let pool_size = parse_usize("WEATHER_POOL_SIZE", file.pool_size.unwrap_or(5))?;
        let batch_size = parse_usize("WEATHER_BATCH_SIZE", file.batch_size.unwrap_or(100))?;
        let buffer_capacity = parse_usize(
            "WEATHER_BUFFER_CAPACITY",
            file.buffer_capacity.unwrap_or(1000),
        )?;
        let flush_interval_ms = parse_u64(
            "WEATHER_FLUSH_INTERVAL_MS",
            file.flush_interval_ms.unwrap_or(100),
        )?;
        let dial_timeout_ms = parse_u64("WEATHER_DIAL_TIMEOUT_MS", 5000)?;
        let write_timeout_ms = parse_u64("WEATHER_WRITE_TIMEOUT_MS", 5000)?;

        let mqtt_host = lookup("WEATHER_MQTT_HOST")
            .or_else(|| non_empty(file.mqtt_host.as_deref()))
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = match lookup("WEATHER_MQTT_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .context("invalid WEATHER_MQTT_PORT")?,
            None => file.mqtt_port.filter(|port| *port != 0).unwrap_or(1883),
        };
        let mqtt_username = lookup("WEATHER_MQTT_USERNAME");
        let mqtt_password = lookup("WEATHER_MQTT_PASSWORD");
        let mqtt_client_id = lookup("WEATHER_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("weather-ingest-{}", std::process::id()));
        let mqtt_keepalive_secs = parse_u64("WEATHER_MQTT_KEEPALIVE_SECS", 30)?;
        let enable_mqtt_listener = lookup("WEATHER_ENABLE_MQTT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let readings_topic = lookup("WEATHER_READINGS_TOPIC")
            .or_else(|| non_empty(file.readings_topic.as_deref()))
            .unwrap_or_else(|| "readings".to_string());
        let alerts_topic = lookup("WEATHER_ALERTS_TOPIC")
            .or_else(|| non_empty(file.alerts_topic.as_deref()))
            .unwrap_or_else(|| "alerts".to_string());

        // An explicitly empty bind disables the HTTP surface.
        let http_bind = match vars.get("WEATHER_HTTP_BIND") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().to_string()),
            None => Some("127.0.0.1:9102".to_string()),
        };
        let report_interval_secs = parse_u64("WEATHER_REPORT_INTERVAL_SECS", 5)?;

        let alert_rules = match lookup("WEATHER_ALERT_RULES") {
            Some(raw) => parse_rules(&raw)?,
            None => file.alert_rules.unwrap_or_else(default_rules),
        };
        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT");

        let config = Self {
            store_addr,
            pool_size,
            buffer_capacity,
            batch_size,
            flush_interval_ms,
            dial_timeout_ms,
            write_timeout_ms,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keepalive_secs,
            enable_mqtt_listener,
            readings_topic,
            alerts_topic,
            http_bind,
            report_interval_secs,
            alert_rules,
            otlp_endpoint,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let zero = [
            ("WEATHER_POOL_SIZE", self.pool_size as u64),
            ("WEATHER_BUFFER_CAPACITY", self.buffer_capacity as u64),
            ("WEATHER_BATCH_SIZE", self.batch_size as u64),
            ("WEATHER_FLUSH_INTERVAL_MS", self.flush_interval_ms),
            ("WEATHER_REPORT_INTERVAL_SECS", self.report_interval_secs),
            ("WEATHER_DIAL_TIMEOUT_MS", self.dial_timeout_ms),
            ("WEATHER_WRITE_TIMEOUT_MS", self.write_timeout_ms),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((key, _)) = zero {
            bail!("{key} must be greater than zero");
        }
        if !self.store_addr.contains(':') {
            return Err(anyhow!(
                "WEATHER_STORE_ADDR must be host:port, got {:?}",
                self.store_addr
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            flush_interval: self.flush_interval(),
            write_timeout: self.write_timeout(),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

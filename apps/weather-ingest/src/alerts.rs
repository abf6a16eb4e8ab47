use crate::telemetry::TelemetryEvent;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

pub fn compare(value: f64, op: CompareOp, threshold: f64) -> bool {
    match op {
        CompareOp::Lt => value < threshold,
        CompareOp::Lte => value <= threshold,
        CompareOp::Gt => value > threshold,
        CompareOp::Gte => value >= threshold,
    }
}

/// Stateless per-reading alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertRule {
    Threshold {
        sensor: String,
        metric: String,
        op: CompareOp,
        value: f64,
        severity: u8,
    },
}

/// Published on the alerts topic when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub station: String,
    pub timestamp: i64,
    pub metric: String,
    pub values: BTreeMap<String, f64>,
    pub severity: u8,
}

impl AlertRule {
    pub fn check(&self, event: &TelemetryEvent) -> Option<AlertMessage> {
        match self {
            AlertRule::Threshold {
                sensor,
                metric,
                op,
                value,
                severity,
            } => {
                if event.sensor != *sensor || !compare(event.value, *op, *value) {
                    return None;
                }
                Some(AlertMessage {
                    station: event.station.clone(),
                    timestamp: event.timestamp,
                    metric: metric.clone(),
                    values: BTreeMap::from([(metric.clone(), event.value)]),
                    severity: *severity,
                })
            }
        }
    }
}

pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::Threshold {
            sensor: "temperature".to_string(),
            metric: "temperature".to_string(),
            op: CompareOp::Gt,
            value: 35.0,
            severity: 2,
        },
        AlertRule::Threshold {
            sensor: "air_humidity".to_string(),
            metric: "humidity".to_string(),
            op: CompareOp::Lt,
            value: 35.0,
            severity: 1,
        },
    ]
}

/// Parses a JSON array of rules, e.g. from `WEATHER_ALERT_RULES`.
pub fn parse_rules(raw: &str) -> Result<Vec<AlertRule>> {
    serde_json::from_str(raw).context("invalid alert rules JSON")
}

pub fn evaluate(rules: &[AlertRule], event: &TelemetryEvent) -> Vec<AlertMessage> {
    rules.iter().filter_map(|rule| rule.check(event)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_temperature_fires_with_severity_two() {
        let event = TelemetryEvent::new("s1", 1_700_000_000, "temperature", 36.5);
        let alerts = evaluate(&default_rules(), &event);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, "temperature");
        assert_eq!(alerts[0].severity, 2);
        assert_eq!(alerts[0].values.get("temperature"), Some(&36.5));
        assert_eq!(alerts[0].station, "s1");
    }

    #[test]
    fn low_humidity_fires_below_threshold_only() {
        let rules = default_rules();
        let dry = TelemetryEvent::new("s1", 1, "air_humidity", 20.0);
        let humid = TelemetryEvent::new("s1", 1, "air_humidity", 60.0);
        assert_eq!(evaluate(&rules, &dry)[0].metric, "humidity");
        assert_eq!(evaluate(&rules, &dry)[0].severity, 1);
        assert!(evaluate(&rules, &humid).is_empty());
    }

    #[test]
    fn other_sensors_never_match() {
        let event = TelemetryEvent::new("s1", 1, "uv", 100.0);
        assert!(evaluate(&default_rules(), &event).is_empty());
    }

    #[test]
    fn parse_rules_reads_tagged_json() {
        let rules = parse_rules(
            r#"[{"kind":"threshold","sensor":"wind_speed","metric":"wind","op":"gte","value":90.0,"severity":3}]"#,
        )
        .expect("rules");
        let event = TelemetryEvent::new("s9", 5, "wind_speed", 90.0);
        let alerts = evaluate(&rules, &event);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, 3);
        assert!(parse_rules(r#"[{"kind":"unknown"}]"#).is_err());
    }

    #[test]
    fn alert_message_serializes_like_the_alerts_topic_expects() {
        let event = TelemetryEvent::new("s1", 42, "temperature", 40.0);
        let alert = evaluate(&default_rules(), &event).remove(0);
        let json = serde_json::to_value(&alert).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "station": "s1",
                "timestamp": 42,
                "metric": "temperature",
                "values": {"temperature": 40.0},
                "severity": 2
            })
        );
    }
}

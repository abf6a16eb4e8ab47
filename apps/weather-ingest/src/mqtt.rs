use crate::alerts::{evaluate, AlertMessage, AlertRule};
use crate::config::Config;
use crate::pipeline::{EngineHandle, SubmitError};
use crate::telemetry::parse_reading_payload;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Outcome of one inbound readings message.
#[derive(Debug, PartialEq)]
pub enum ReadingOutcome {
    Queued(Vec<AlertMessage>),
    Rejected(SubmitError),
    Malformed,
}

/// Decodes a readings payload, queues it, and evaluates the alert rules.
pub fn handle_reading(
    payload: &mut [u8],
    engine: &EngineHandle,
    rules: &[AlertRule],
) -> ReadingOutcome {
    let event = match parse_reading_payload(payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decode reading payload");
            return ReadingOutcome::Malformed;
        }
    };
    let alerts = evaluate(rules, &event);
    match engine.submit(event) {
        Ok(()) => ReadingOutcome::Queued(alerts),
        Err(err) => ReadingOutcome::Rejected(err),
    }
}

async fn publish_alerts(client: &AsyncClient, topic: &str, alerts: Vec<AlertMessage>) {
    for alert in alerts {
        let payload = match serde_json::to_vec(&alert) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode alert");
                continue;
            }
        };
        tracing::info!(
            station = %alert.station,
            metric = %alert.metric,
            severity = alert.severity,
            "publishing alert"
        );
        if let Err(err) = client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
        {
            tracing::warn!(error = %err, topic, "failed to publish alert");
        }
    }
}

pub async fn run_listener(config: Config, engine: EngineHandle) -> Result<()> {
    let rules: Arc<[AlertRule]> = config.alert_rules.clone().into();
    let metrics = engine.metrics();
    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);

        if let Err(err) = client
            .subscribe(config.readings_topic.clone(), QoS::AtLeastOnce)
            .await
        {
            tracing::warn!(error = %err, "failed to subscribe to MQTT; retrying");
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    metrics.set_mqtt_connected(true);
                    tracing::info!(topic = %config.readings_topic, "subscribed to readings feed");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if publish.topic != config.readings_topic {
                        continue;
                    }
                    let mut payload = publish.payload.to_vec();
                    match handle_reading(&mut payload, &engine, &rules) {
                        ReadingOutcome::Queued(alerts) if !alerts.is_empty() => {
                            publish_alerts(&client, &config.alerts_topic, alerts).await;
                        }
                        ReadingOutcome::Rejected(SubmitError::Stopped) => {
                            tracing::info!("ingest engine stopped; MQTT listener exiting");
                            metrics.set_mqtt_connected(false);
                            let _ = client.disconnect().await;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    metrics.set_mqtt_connected(false);
                    metrics.record_error(format!("mqtt: {err}"));
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::default_rules;
    use crate::metrics::MetricsRegistry;
    use crate::pipeline::{EngineConfig, IngestEngine};
    use crate::store::ConnectionPool;
    use crate::test_support::FakeStore;

    async fn engine(store: &FakeStore, buffer_capacity: usize) -> IngestEngine {
        let pool = Arc::new(
            ConnectionPool::connect(&store.endpoint(), 1, Duration::from_secs(2)).await,
        );
        IngestEngine::start(
            EngineConfig {
                buffer_capacity,
                batch_size: 100,
                flush_interval: Duration::from_secs(3600),
                write_timeout: Duration::from_secs(5),
            },
            pool,
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn hot_reading_is_queued_and_raises_alert() {
        let store = FakeStore::start().await;
        let engine = engine(&store, 8).await;
        let mut payload =
            br#"{"station":"s1","timestamp":1700000000,"sensor":"temperature","value":41.0}"#.to_vec();

        let outcome = handle_reading(&mut payload, &engine.handle(), &default_rules());
        let ReadingOutcome::Queued(alerts) = outcome else {
            panic!("expected queued, got {outcome:?}");
        };
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, "temperature");

        engine.stop().await;
        assert_eq!(engine.metrics().snapshot().sent, 1);
        let lines = store.wait_for_lines(1).await;
        assert!(lines[0].starts_with("readings,station=s1,sensor=temperature value=41.000000"));
    }

    #[tokio::test]
    async fn malformed_payload_is_not_queued() {
        let store = FakeStore::start().await;
        let engine = engine(&store, 8).await;
        let mut payload = b"temperature=41".to_vec();

        assert_eq!(
            handle_reading(&mut payload, &engine.handle(), &default_rules()),
            ReadingOutcome::Malformed
        );
        assert_eq!(engine.metrics().snapshot().accepted, 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn readings_after_stop_are_rejected() {
        let store = FakeStore::start().await;
        let engine = engine(&store, 8).await;
        engine.stop().await;
        let mut payload =
            br#"{"station":"s1","timestamp":1,"sensor":"uv","value":3.0}"#.to_vec();

        assert_eq!(
            handle_reading(&mut payload, &engine.handle(), &default_rules()),
            ReadingOutcome::Rejected(SubmitError::Stopped)
        );
    }
}

use crate::config::Config;
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use weather_ingest::telemetry::TelemetryEvent;

pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    let mut mqttoptions = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    mqttoptions.set_keep_alive(Duration::from_secs(15));
    if let Some(username) = &config.mqtt_username {
        mqttoptions.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    AsyncClient::new(mqttoptions, 256)
}

/// Drives the connection. rumqttc reconnects on the next poll after an error.
pub fn spawn_poller(mut eventloop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!("connected to MQTT broker");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

pub fn encode_event(event: &TelemetryEvent) -> Result<Vec<u8>> {
    serde_json::to_vec(event).context("failed to encode reading")
}

/// Publishes each reading as its own fire-and-forget message.
pub async fn publish_events(
    client: &AsyncClient,
    topic: &str,
    events: &[TelemetryEvent],
) -> Result<usize> {
    for event in events {
        let payload = encode_event(event)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish {} reading", event.sensor))?;
        tracing::debug!(sensor = %event.sensor, value = event.value, "published reading");
    }
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_ingest::telemetry::parse_reading_payload;

    #[test]
    fn encoded_event_decodes_on_the_ingest_side() {
        let event = TelemetryEvent::new("station-1", 1_700_000_000, "uv", 5.01);
        let mut payload = encode_event(&event).expect("encode");
        assert_eq!(parse_reading_payload(&mut payload).expect("decode"), event);
    }
}

mod config;
mod mqtt;
mod sensors;
mod station;

use crate::config::Config;
use crate::station::WeatherStation;
use anyhow::Result;
use tokio::time::MissedTickBehavior;
use weather_ingest::shutdown::shutdown_signal;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,station_sim=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let mut station = match &config.station_id {
        Some(id) => WeatherStation::with_id(id.clone()),
        None => WeatherStation::new(),
    };
    for (name, value) in &config.sensor_overrides {
        station.set_sensor_value(name, *value)?;
        let sample = station.read_sensor(name)?;
        tracing::info!(sensor = %name, base = value, sample, "sensor override applied");
    }
    tracing::info!(
        station = station.station_id(),
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        topic = %config.readings_topic,
        "station-sim starting"
    );

    let (client, eventloop) = mqtt::connect(&config);
    let poller = mqtt::spawn_poller(eventloop);

    let mut ticker = tokio::time::interval(config.publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal()?;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            reason = &mut shutdown => {
                tracing::info!(?reason, "shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let events = station.read_all(chrono::Utc::now().timestamp());
                match mqtt::publish_events(&client, &config.readings_topic, &events).await {
                    Ok(count) => tracing::info!(count, "published station readings"),
                    Err(err) => tracing::warn!(error = %err, "failed to publish readings"),
                }
            }
        }
    }

    if let Err(err) = client.disconnect().await {
        tracing::debug!(error = %err, "MQTT disconnect failed");
    }
    poller.abort();
    Ok(())
}

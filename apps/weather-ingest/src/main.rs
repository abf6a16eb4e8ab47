use anyhow::Result;
use futures::future;
use std::sync::Arc;
use weather_ingest::config::Config;
use weather_ingest::http;
use weather_ingest::metrics::{spawn_reporter, MetricsRegistry};
use weather_ingest::mqtt;
use weather_ingest::pipeline::IngestEngine;
use weather_ingest::shutdown::shutdown_signal;
use weather_ingest::store::ConnectionPool;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,weather_ingest=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    match config.otlp_endpoint.as_deref().map(normalize_otlp_http_endpoint) {
        Some(endpoint) if !endpoint.is_empty() => {
            let exporter = opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint);
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(
                    vec![KeyValue::new("service.name", "weather-ingest")],
                )))
                .install_batch(Tokio)?;

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() || trimmed.ends_with("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let pool = Arc::new(
        ConnectionPool::connect(&config.store_addr, config.pool_size, config.dial_timeout()).await,
    );
    let metrics = Arc::new(MetricsRegistry::new());
    let engine = IngestEngine::start(config.engine_config(), pool, metrics.clone());
    let reporter_handle = spawn_reporter(metrics, config.report_interval());

    let mut http_handle = match &config.http_bind {
        Some(bind) => {
            let app = http::router(http::HttpState {
                engine: engine.handle(),
            });
            let listener = tokio::net::TcpListener::bind(bind).await?;
            tracing::info!(bind = %bind, "weather-ingest HTTP listening");
            Some(tokio::spawn(async move {
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!(error = %err, "HTTP server exited");
                }
            }))
        }
        None => None,
    };

    let mut mqtt_handle = if config.enable_mqtt_listener {
        let mqtt_config = config.clone();
        let handle = engine.handle();
        Some(tokio::spawn(async move {
            if let Err(err) = mqtt::run_listener(mqtt_config, handle).await {
                tracing::error!(error = %err, "MQTT listener exited");
            }
        }))
    } else {
        None
    };

    let shutdown = shutdown_signal()?;
    tokio::select! {
        reason = shutdown => {
            tracing::info!(?reason, "shutdown signal received");
        }
        _ = async {
            match mqtt_handle.as_mut() {
                Some(handle) => { let _ = handle.await; }
                None => future::pending::<()>().await,
            }
        } => {
            tracing::warn!("MQTT task ended");
        }
        _ = async {
            match http_handle.as_mut() {
                Some(handle) => { let _ = handle.await; }
                None => future::pending::<()>().await,
            }
        } => {
            tracing::warn!("HTTP task ended");
        }
    }

    if let Some(handle) = &mqtt_handle {
        handle.abort();
    }
    if let Some(handle) = &http_handle {
        handle.abort();
    }
    engine.stop().await;
    reporter_handle.abort();

    let snapshot = engine.metrics().snapshot();
    tracing::info!(
        sent = snapshot.sent,
        failed = snapshot.failed,
        dropped = snapshot.dropped,
        "weather-ingest stopped"
    );
    Ok(())
}

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{EngineHandle, EngineState, SubmitError};
use crate::telemetry::TelemetryEvent;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

#[derive(Clone)]
pub struct HttpState {
    pub engine: EngineHandle,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    state: EngineState,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ReadingsResponse {
    accepted: u64,
    dropped: u64,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_metrics(State(state): State<HttpState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        state: state.engine.state(),
        metrics: state.engine.metrics().snapshot(),
    })
}

async fn post_readings(
    State(state): State<HttpState>,
    Json(readings): Json<Vec<TelemetryEvent>>,
) -> Result<Json<ReadingsResponse>, (StatusCode, String)> {
    let mut response = ReadingsResponse {
        accepted: 0,
        dropped: 0,
    };
    for reading in readings {
        match state.engine.submit(reading) {
            Ok(()) => response.accepted += 1,
            Err(SubmitError::BufferFull) => response.dropped += 1,
            Err(err @ SubmitError::Stopped) => {
                return Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string()));
            }
        }
    }
    Ok(Json(response))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/metrics", get(get_metrics))
        .route("/v1/readings", post(post_readings))
        .with_state(state)
}

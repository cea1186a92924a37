//! HTTP surface: health/readiness/metrics, an operator probe bridge, and
//! the enrollment token exchange (spec.md §4.H, §12).

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws::agent_connect;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/probe", post(execute_probe))
        .route("/v1/runbooks/:category", post(run_runbook))
        .route("/v1/enroll", post(enroll))
        .route("/v1/agents/connect", get(agent_connect))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state.uptime_seconds();
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render();
    let headers = [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))];
    (StatusCode::OK, headers, body)
}

#[derive(Debug, Deserialize)]
struct ProbeRequest {
    probe: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    agent: Option<String>,
}

async fn execute_probe(State(state): State<AppState>, Json(request): Json<ProbeRequest>) -> impl IntoResponse {
    let response = state.router.execute(&request.probe, request.params, request.agent.as_deref()).await;
    Json(json!({
        "status": response.status.as_str(),
        "data": response.data,
        "error": response.error,
        "duration_ms": response.duration_ms,
    }))
}

async fn run_runbook(
    State(state): State<AppState>,
    axum::extract::Path(category): axum::extract::Path<String>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, HttpError> {
    let params = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let result = state
        .runbook
        .run(&category, params)
        .await
        .map_err(|err| HttpError::new(StatusCode::NOT_FOUND, err.to_string()))?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    token: String,
    agent_name: String,
}

#[derive(Debug, Serialize)]
struct EnrollResponse {
    cert_pem: String,
    key_pem: String,
    ca_cert_pem: String,
    hub_url: String,
}

async fn enroll(State(state): State<AppState>, Json(request): Json<EnrollRequest>) -> Result<impl IntoResponse, HttpError> {
    let bundle = state
        .enrollment
        .consume(&request.token, &request.agent_name)
        .map_err(|err| HttpError::new(StatusCode::FORBIDDEN, err.to_string()))?;
    Ok(Json(EnrollResponse {
        cert_pem: bundle.cert_pem,
        key_pem: bundle.key_pem,
        ca_cert_pem: bundle.ca_cert_pem,
        hub_url: bundle.hub_url,
    }))
}

pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

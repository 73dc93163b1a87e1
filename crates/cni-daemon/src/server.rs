//! Local HTTP API over a unix socket.

use crate::error::DaemonError;
use crate::handler::Daemon;
use crate::request::{PodIPAMRequest, PodIPAMResponse, PodRequest, PodResponse};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::info;

/// Routes of the handshake API.
pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/api/v1/add", post(handle_add))
        .route("/api/v1/del", post(handle_del))
        .route("/api/v1/ipam/add", post(handle_ipam_add))
        .route("/api/v1/ipam/del", post(handle_ipam_del))
        .with_state(daemon)
}

/// Serves the API on `path`, replacing a stale socket from a previous run.
pub async fn serve(path: &Path, daemon: Arc<Daemon>) -> Result<(), DaemonError> {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        return Err(e.into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    info!("Listening on {}", path.display());
    axum::serve(listener, router(daemon)).await?;
    Ok(())
}

fn decode<T>(op: &'static str, payload: Result<Json<T>, JsonRejection>) -> Result<T, DaemonError> {
    payload.map(|Json(body)| body).map_err(|e| DaemonError::InvalidRequest {
        op,
        reason: e.body_text(),
    })
}

async fn handle_add(
    State(daemon): State<Arc<Daemon>>,
    payload: Result<Json<PodRequest>, JsonRejection>,
) -> Result<Json<PodResponse>, DaemonError> {
    let request = decode("add", payload)?;
    Ok(Json(daemon.add(&request).await?))
}

async fn handle_del(
    State(daemon): State<Arc<Daemon>>,
    payload: Result<Json<PodRequest>, JsonRejection>,
) -> Result<StatusCode, DaemonError> {
    let request = decode("del", payload)?;
    daemon.del(&request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_ipam_add(
    State(daemon): State<Arc<Daemon>>,
    payload: Result<Json<PodIPAMRequest>, JsonRejection>,
) -> Result<Json<PodIPAMResponse>, DaemonError> {
    let request = decode("ipam add", payload)?;
    Ok(Json(daemon.ipam_add(&request).await?))
}

/// Releasing is the controller's job; the address-only delete is an ack.
async fn handle_ipam_del() -> StatusCode {
    StatusCode::NO_CONTENT
}

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::{errors::ServiceError, handlers::common::success_response, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service is up")),
    tag = "health"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ServiceError> {
    state.db.ping().await?;
    Ok(success_response(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::checkout::{ConfirmInput, CreateIntentInput},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_KEY_TTL_SECS: u64 = 24 * 3600;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create-intent", post(create_intent))
        .route("/confirm", post(confirm))
        .route("/methods", get(list_methods))
        .route("/methods", post(save_method))
}

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(webhook))
}

/// Prices the cart and opens a gateway payment intent. No order exists yet.
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-intent",
    request_body = CreateIntentInput,
    responses(
        (status = 200, description = "Client secret and order summary"),
        (status = 400, description = "Cart is empty")
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateIntentInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let intent = state
        .services
        .checkout
        .create_intent(auth.user_id, payload)
        .await?;
    Ok(success_response(intent))
}

/// Turns a succeeded intent into an order and clears the cart.
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmInput,
    responses(
        (status = 200, description = "Created order"),
        (status = 400, description = "Payment not successful or cart is empty"),
        (status = 409, description = "Intent already being processed")
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<ConfirmInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.checkout.confirm(auth.user_id, payload).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/methods",
    responses((status = 200, description = "Saved cards, empty before first checkout")),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn list_methods(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let methods = state.services.checkout.payment_methods(auth.user_id).await?;
    Ok(success_response(methods))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct SaveMethodRequest {
    #[validate(length(min = 1))]
    pub payment_method_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/methods",
    responses(
        (status = 200, description = "Card attached"),
        (status = 400, description = "No gateway customer yet")
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn save_method(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<SaveMethodRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    state
        .services
        .checkout
        .save_payment_method(auth.user_id, &payload.payment_method_id)
        .await?;
    Ok(success_response(serde_json::json!({ "message": "Payment method saved" })))
}

/// Gateway webhook. Signature is verified against the raw body before any
/// parsing; events are deduplicated by gateway event id.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Invalid signature")
    ),
    tag = "payments"
)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        if !verify_signature(&headers, &body, secret, state.config.webhook_tolerance_secs) {
            warn!("webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    if let Some(event_id) = json.get("id").and_then(|v| v.as_str()) {
        if already_processed(&state, event_id).await {
            info!(event_id, "webhook event already processed");
            return Ok(StatusCode::OK);
        }
    }

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let intent_id = json
        .pointer("/data/object/id")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !intent_id.is_empty() {
        state
            .services
            .checkout
            .record_gateway_event(event_type, intent_id)
            .await?;
    } else {
        info!(event_type, "webhook without intent id, ignored");
    }

    Ok(StatusCode::OK)
}

async fn already_processed(state: &AppState, event_id: &str) -> bool {
    let key = format!("webhook:{}", event_id);
    match state.redis.get_async_connection().await {
        Ok(mut conn) => {
            let fresh: Result<bool, redis::RedisError> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(WEBHOOK_KEY_TTL_SECS)
                .query_async(&mut conn)
                .await;
            matches!(fresh, Ok(false))
        }
        Err(e) => {
            warn!(error = %e, "redis unavailable, skipping webhook dedup");
            false
        }
    }
}

/// `Stripe-Signature: t=<ts>,v1=<hex hmac of "<ts>.<body>">`, rejected when
/// the timestamp falls outside the tolerance window.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", val)) => ts = val,
            Some(("v1", val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    match ts.parse::<i64>() {
        Ok(ts_i) => {
            let now = chrono::Utc::now().timestamp();
            if (now - ts_i).unsigned_abs() > tolerance_secs {
                return false;
            }
        }
        Err(_) => return false,
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

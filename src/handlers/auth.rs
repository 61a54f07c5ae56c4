use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    auth::{AuthUser, Claims},
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::users::{LoginInput, RegisterInput, UpdatePasswordInput},
    AppState,
};

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/password", put(update_password))
}

/// Create an account and log straight in.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterInput,
    responses(
        (status = 201, description = "Account created"),
        (status = 400, description = "Validation failed or email taken")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let authed = state.services.users.register(payload).await?;
    Ok(created_response(authed))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginInput,
    responses(
        (status = 200, description = "Logged in"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let authed = state.services.users.login(payload).await?;
    Ok(success_response(authed))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses((status = 200, description = "Current user")),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state.services.users.get(auth.user_id).await?;
    Ok(success_response(user))
}

/// Revokes the presented token until its natural expiry.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Token revoked")),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ServiceError> {
    state.auth.blacklist(&claims).await;
    Ok(success_response(json!({ "message": "Logged out" })))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    request_body = UpdatePasswordInput,
    responses(
        (status = 200, description = "Password updated"),
        (status = 401, description = "Current password incorrect")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn update_password(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<UpdatePasswordInput>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .users
        .update_password(auth.user_id, payload)
        .await?;
    Ok(success_response(json!({ "message": "Password updated" })))
}

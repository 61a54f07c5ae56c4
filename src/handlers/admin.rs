use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::user::UserRole,
    errors::ServiceError,
    handlers::common::{success_response, Paginated, PaginationParams},
    services::reports::UserFilter,
    AppState,
};

const DEFAULT_PAGE_SIZE: u64 = 10;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users", get(list_users))
        .route("/users/:id/role", put(update_role))
        .route("/users/:id", delete(delete_user))
        .route("/settings", get(settings))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/dashboard",
    responses((status = 200, description = "Storefront aggregates")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let dashboard = state.services.reports.dashboard().await?;
    Ok(success_response(dashboard))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(UserFilter, PaginationParams),
    responses((status = 200, description = "Users, searchable by name or email")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<UserFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = pagination.page();
    let limit = pagination.limit_or(DEFAULT_PAGE_SIZE);
    let (users, total) = state
        .services
        .reports
        .list_users(filter, page, limit)
        .await?;
    Ok(success_response(Paginated::new(users, page, limit, total)))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

/// Admins cannot change their own role.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "Updated user"),
        (status = 400, description = "Attempted to change own role")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state
        .services
        .reports
        .update_role(auth.user_id, id, payload.role)
        .await?;
    Ok(success_response(user))
}

/// Removes the user and their cart; orders are retained.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{id}",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Attempted to delete own account")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.reports.delete_user(auth.user_id, id).await?;
    Ok(success_response(json!({ "message": "User deleted" })))
}

/// Read-only snapshot of the commerce configuration.
#[utoipa::path(
    get,
    path = "/api/v1/admin/settings",
    responses((status = 200, description = "Commerce settings")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn settings(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(json!({
        "currency": state.config.currency,
        "tax_rate": state.config.tax_rate,
        "free_shipping_threshold": state.config.free_shipping_threshold,
        "shipping_fee": state.config.shipping_fee,
    })))
}

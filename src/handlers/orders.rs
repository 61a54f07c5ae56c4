use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::common::{success_response, Paginated, PaginationParams},
    services::orders::OrderFilter,
    AppState,
};

const DEFAULT_PAGE_SIZE: u64 = 10;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", put(cancel_order))
}

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/all", get(list_all_orders))
        .route("/admin/stats", get(order_stats))
        .route("/:id/status", put(set_order_status))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "The caller's orders, newest first")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = pagination.page();
    let limit = pagination.limit_or(DEFAULT_PAGE_SIZE);
    let (orders, total) = state
        .services
        .orders
        .list_for_user(auth.user_id, page, limit)
        .await?;
    Ok(success_response(Paginated::new(orders, page, limit, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "Order detail"),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order not found")
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get(id, &auth).await?;
    Ok(success_response(order))
}

/// Customer cancellation, allowed while the order is pending or processing.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "Cancelled order"),
        (status = 400, description = "Order is past the cancellation window")
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel(id, &auth).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/admin/all",
    params(OrderFilter, PaginationParams),
    responses((status = 200, description = "All orders, filterable by status")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_all_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = pagination.page();
    let limit = pagination.limit_or(DEFAULT_PAGE_SIZE);
    let (orders, total) = state.services.orders.list_all(filter, page, limit).await?;
    Ok(success_response(Paginated::new(orders, page, limit, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/admin/stats",
    responses((status = 200, description = "Order counts and revenue")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn order_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = state.services.orders.stats().await?;
    Ok(success_response(stats))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
    pub notes: Option<String>,
}

/// Admin transition, limited to the forward status progression.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "Updated order"),
        (status = 400, description = "Transition not allowed")
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn set_order_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .set_status(id, payload.status, payload.notes, auth.user_id)
        .await?;
    Ok(success_response(order))
}

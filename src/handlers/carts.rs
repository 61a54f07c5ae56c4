use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::carts::{AddItemInput, UpdateItemInput},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/", delete(clear_cart))
        .route("/summary", get(cart_summary))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item))
        .route("/items/:item_id", delete(remove_item))
}

/// Returns the user's cart, lazily creating an empty one.
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses((status = 200, description = "Current cart")),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_or_create(auth.user_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/summary",
    responses((status = 200, description = "Item and price totals")),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn cart_summary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let summary = state.services.carts.summary(auth.user_id).await?;
    Ok(success_response(summary))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemInput,
    responses(
        (status = 200, description = "Updated cart"),
        (status = 400, description = "Out of stock"),
        (status = 404, description = "Product not found")
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<AddItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.add_item(auth.user_id, payload).await?;
    Ok(success_response(cart))
}

/// A quantity of zero or less removes the line.
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path,)),
    request_body = UpdateItemInput,
    responses((status = 200, description = "Updated cart")),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .update_item_quantity(auth.user_id, item_id, payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path,)),
    responses((status = 200, description = "Updated cart")),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(auth.user_id, item_id)
        .await?;
    Ok(success_response(cart))
}

/// Empties the cart; the cart row itself survives.
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses((status = 200, description = "Cart cleared")),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.carts.clear(auth.user_id).await?;
    Ok(success_response(json!({ "message": "Cart cleared" })))
}

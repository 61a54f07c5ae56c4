use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::product::ProductCategory,
    errors::ServiceError,
    handlers::common::{created_response, success_response, Paginated, PaginationParams},
    services::catalog::{CreateProductInput, ProductFilter, UpdateProductInput},
    AppState,
};

const DEFAULT_PAGE_SIZE: u64 = 12;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_products))
        .route("/featured", get(featured_products))
        .route("/categories", get(list_categories))
        .route("/category/:category", get(list_by_category))
        .route("/slug/:slug", get(get_by_slug))
        .route("/:id", get(get_product))
}

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_product))
        .route("/:id", put(update_product))
        .route("/:id", delete(delete_product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilter, PaginationParams),
    responses((status = 200, description = "Paginated active products")),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProductFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = pagination.page();
    let limit = pagination.limit_or(DEFAULT_PAGE_SIZE);
    let (products, total) = state.services.catalog.list(filter, page, limit).await?;
    Ok(success_response(Paginated::new(products, page, limit, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/featured",
    responses((status = 200, description = "Featured products")),
    tag = "products"
)]
pub async fn featured_products(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state.services.catalog.featured().await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/categories",
    responses((status = 200, description = "Categories with active products")),
    tag = "products"
)]
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServiceError> {
    let categories = state.services.catalog.categories().await?;
    Ok(success_response(categories))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/category/{category}",
    params(("category" = ProductCategory, Path,), PaginationParams),
    responses((status = 200, description = "Products in one category")),
    tag = "products"
)]
pub async fn list_by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<ProductCategory>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = ProductFilter {
        category: Some(category),
        search: None,
        min_price: None,
        max_price: None,
        sort: None,
    };
    let page = pagination.page();
    let limit = pagination.limit_or(DEFAULT_PAGE_SIZE);
    let (products, total) = state.services.catalog.list(filter, page, limit).await?;
    Ok(success_response(Paginated::new(products, page, limit, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/slug/{slug}",
    params(("slug" = String, Path,)),
    responses(
        (status = 200, description = "Product by slug"),
        (status = 404, description = "No active product with this slug")
    ),
    tag = "products"
)]
pub async fn get_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_by_slug(&slug).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path,)),
    responses(
        (status = 200, description = "Product detail"),
        (status = 404, description = "Product not found")
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get(id).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductInput,
    responses((status = 201, description = "Product created")),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.create(payload, auth.user_id).await?;
    Ok(created_response(product))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path,)),
    request_body = UpdateProductInput,
    responses((status = 200, description = "Product updated")),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.update(id, payload).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path,)),
    responses((status = 200, description = "Product deleted")),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.catalog.delete(id).await?;
    Ok(success_response(json!({ "message": "Product deleted" })))
}

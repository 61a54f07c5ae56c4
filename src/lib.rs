pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod payments;
pub mod services;

use axum::{middleware, Router};
use std::sync::Arc;

use crate::db::DbPool;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub auth: Arc<auth::AuthService>,
    pub redis: Arc<redis::Client>,
    pub services: handlers::AppServices,
}

/// Everything under `/api/v1`: public storefront reads, the authenticated
/// user surface, and the admin surface behind the role check.
pub fn api_v1_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .merge(handlers::health::routes())
        .nest("/auth", handlers::auth::public_routes())
        .nest("/products", handlers::products::public_routes())
        .nest("/payments", handlers::payments::webhook_routes());

    let user = Router::new()
        .nest("/auth", handlers::auth::routes())
        .nest("/cart", handlers::carts::routes())
        .nest("/payments", handlers::payments::routes())
        .nest("/orders", handlers::orders::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let admin = Router::new()
        .nest("/products", handlers::products::admin_routes())
        .nest("/orders", handlers::orders::admin_routes())
        .nest("/admin", handlers::admin::routes())
        .layer(middleware::from_fn(auth::require_admin))
        .layer(middleware::from_fn_with_state(state, auth::auth_middleware));

    public.merge(user).merge(admin)
}

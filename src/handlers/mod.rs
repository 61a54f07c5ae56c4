pub mod admin;
pub mod auth;
pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;

use std::sync::Arc;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    payments::PaymentGateway,
    services::{
        carts::CartService,
        catalog::CatalogService,
        checkout::{CheckoutService, CheckoutSettings},
        orders::OrderService,
        reports::ReportService,
        users::UserService,
    },
};

pub use crate::AppState;

/// Business-logic layer consumed by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub users: Arc<UserService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        redis: Arc<redis::Client>,
        auth: Arc<AuthService>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let settings = CheckoutSettings {
            currency: config.currency.clone(),
            tax_rate: config.tax_rate,
            free_shipping_threshold: config.free_shipping_threshold,
            shipping_fee: config.shipping_fee,
        };

        Self {
            catalog: Arc::new(CatalogService::new(db.clone(), event_sender.clone())),
            carts: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                event_sender.clone(),
                gateway,
                redis,
                settings,
            )),
            orders: Arc::new(OrderService::new(db.clone(), event_sender.clone())),
            users: Arc::new(UserService::new(db.clone(), event_sender, auth)),
            reports: Arc::new(ReportService::new(db)),
        }
    }
}

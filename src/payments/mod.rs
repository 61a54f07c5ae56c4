use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::ServiceError;

pub mod stripe;

pub use stripe::StripeGateway;

/// Gateway-side customer record linked to a local user.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
}

/// Gateway payment intent: an authorization-in-progress for a fixed amount
/// in minor currency units.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Shipping details forwarded to the gateway at intent creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingDetails {
    pub name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodCard {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// Boundary to the external payment provider. Failures surface as
/// `ServiceError::GatewayError`; callers never retry automatically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> Result<GatewayCustomer, ServiceError>;

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        customer_id: &str,
        metadata: HashMap<String, String>,
        shipping: Option<ShippingDetails>,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError>;

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethodCard>, ServiceError>;

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<(), ServiceError>;
}

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::instrument;

use super::{GatewayCustomer, PaymentGateway, PaymentIntent, PaymentMethodCard, ShippingDetails};
use crate::errors::ServiceError;

/// Stripe REST client. All requests are form encoded with bearer auth, per
/// the Stripe wire protocol.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentMethod {
    id: String,
    card: Option<StripeCard>,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    brand: String,
    last4: String,
    exp_month: u8,
    exp_year: u16,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    customer: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    latest_charge: Option<StripeCharge>,
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    receipt_url: Option<String>,
}

impl From<StripeIntent> for PaymentIntent {
    fn from(raw: StripeIntent) -> Self {
        PaymentIntent {
            id: raw.id,
            client_secret: raw.client_secret,
            status: raw.status,
            amount: raw.amount,
            currency: raw.currency,
            customer: raw.customer,
            metadata: raw.metadata,
            receipt_url: raw.latest_charge.and_then(|c| c.receipt_url),
        }
    }
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ServiceError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("request failed: {}", e)))?;
        Self::parse(response).await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("request failed: {}", e)))?;
        Self::parse(response).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("reading body: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<StripeErrorEnvelope>(&body)
                .map(|e| {
                    format!(
                        "{} ({})",
                        e.error.message.unwrap_or_else(|| "unknown".into()),
                        e.error.error_type.unwrap_or_else(|| "api_error".into())
                    )
                })
                .unwrap_or_else(|_| format!("http {}", status));
            return Err(ServiceError::GatewayError(detail));
        }

        serde_json::from_str(&body)
            .map_err(|e| ServiceError::GatewayError(format!("decoding response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> Result<GatewayCustomer, ServiceError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), name.to_string()),
            ("metadata[user_id]".to_string(), user_id.to_string()),
        ];
        self.post_form("/customers", &form).await
    }

    #[instrument(skip(self, metadata, shipping))]
    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        customer_id: &str,
        metadata: HashMap<String, String>,
        shipping: Option<ShippingDetails>,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("customer".to_string(), customer_id.to_string()),
        ];
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value));
        }
        if let Some(ship) = shipping {
            form.push(("shipping[name]".to_string(), ship.name));
            if let Some(phone) = ship.phone {
                form.push(("shipping[phone]".to_string(), phone));
            }
            form.push(("shipping[address][line1]".to_string(), ship.line1));
            form.push(("shipping[address][city]".to_string(), ship.city));
            if let Some(state) = ship.state {
                form.push(("shipping[address][state]".to_string(), state));
            }
            form.push(("shipping[address][country]".to_string(), ship.country));
            form.push(("shipping[address][postal_code]".to_string(), ship.postal_code));
        }
        let intent: StripeIntent = self.post_form("/payment_intents", &form).await?;
        Ok(intent.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        let intent: StripeIntent = self
            .get(
                &format!("/payment_intents/{}", intent_id),
                &[("expand[]", "latest_charge")],
            )
            .await?;
        Ok(intent.into())
    }

    #[instrument(skip(self))]
    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethodCard>, ServiceError> {
        let list: StripeList<StripePaymentMethod> = self
            .get(
                "/payment_methods",
                &[("customer", customer_id), ("type", "card")],
            )
            .await?;
        Ok(list
            .data
            .into_iter()
            .filter_map(|pm| {
                pm.card.map(|card| PaymentMethodCard {
                    id: pm.id,
                    brand: card.brand,
                    last4: card.last4,
                    exp_month: card.exp_month,
                    exp_year: card.exp_year,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<(), ServiceError> {
        let form = vec![("customer".to_string(), customer_id.to_string())];
        let _: serde_json::Value = self
            .post_form(&format!("/payment_methods/{}/attach", payment_method_id), &form)
            .await?;
        Ok(())
    }
}

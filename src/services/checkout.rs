use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        cart, cart_item,
        order::{self, OrderStatus, PaymentStatus},
        order_item, product, user,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{PaymentGateway, PaymentIntent, PaymentMethodCard, ShippingDetails},
    services::carts::VariantSelection,
    services::orders::{allocate_order_number, record_status, OrderView},
};

const CONFIRM_KEY_TTL_SECS: u64 = 24 * 3600;

/// Commerce amounts used by the checkout calculation.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub shipping_fee: Decimal,
}

/// Orchestrates the cart -> payment intent -> order workflow against the
/// payment gateway. Order creation, number allocation, sold counters, and
/// cart clearing commit in one transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    redis: Arc<redis::Client>,
    settings: CheckoutSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, utoipa::ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
    #[validate(length(min = 1, max = 20))]
    pub zip_code: String,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateIntentInput {
    #[validate]
    pub shipping_address: Option<Address>,
    #[validate]
    pub billing_address: Option<Address>,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct ConfirmInput {
    #[validate(length(min = 1))]
    pub payment_intent_id: String,
    #[validate]
    pub shipping_address: Option<Address>,
    #[validate]
    pub billing_address: Option<Address>,
}

/// Quoted checkout amounts, all fixed at intent-creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct CheckoutQuote {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SummaryLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub variant: Option<VariantSelection>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub quote: CheckoutQuote,
    pub items: Vec<SummaryLine>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IntentView {
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub order_summary: OrderSummary,
}

fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Subtotal -> tax/shipping/total. Tax is rounded to cents; shipping is a
/// flat fee waived at the free-shipping threshold.
pub fn quote(subtotal: Decimal, settings: &CheckoutSettings) -> CheckoutQuote {
    let tax = round2(subtotal * settings.tax_rate);
    let shipping = if subtotal >= settings.free_shipping_threshold {
        Decimal::ZERO
    } else {
        settings.shipping_fee
    };
    CheckoutQuote {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

/// Dollars to minor currency units, rounded to the nearest cent.
pub fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    use rust_decimal::prelude::ToPrimitive;
    round2(amount)
        .checked_mul(Decimal::from(100))
        .and_then(|c| c.to_i64())
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {}", amount)))
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        redis: Arc<redis::Client>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            redis,
            settings,
        }
    }

    /// Prices the cart and opens a gateway intent for the total. Fails with
    /// `EmptyCart` before any gateway traffic; no order is created here.
    #[instrument(skip(self, input))]
    pub async fn create_intent(
        &self,
        user_id: Uuid,
        input: CreateIntentInput,
    ) -> Result<IntentView, ServiceError> {
        input.validate()?;

        let (cart, items) = self.require_cart(user_id).await?;
        let user = self.require_user(user_id).await?;
        let customer_id = self.ensure_gateway_customer(user).await?;

        let quote = quote(cart.total_price, &self.settings);

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("cart_id".to_string(), cart.id.to_string());
        metadata.insert("subtotal".to_string(), quote.subtotal.to_string());
        metadata.insert("tax".to_string(), quote.tax.to_string());
        metadata.insert("shipping".to_string(), quote.shipping.to_string());
        metadata.insert("total".to_string(), quote.total.to_string());

        let intent = self
            .gateway
            .create_intent(
                to_cents(quote.total)?,
                &self.settings.currency,
                &customer_id,
                metadata,
                input.shipping_address.as_ref().map(to_shipping),
            )
            .await?;

        let lines = self.summary_lines(&items).await?;
        Ok(IntentView {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            amount: quote.total,
            currency: self.settings.currency.clone(),
            order_summary: OrderSummary {
                quote,
                items: lines,
            },
        })
    }

    /// Finalizes a paid intent into an order. Amounts come from the intent
    /// metadata, never recomputed, so the order records what was charged.
    #[instrument(skip(self, input))]
    pub async fn confirm(
        &self,
        user_id: Uuid,
        input: ConfirmInput,
    ) -> Result<OrderView, ServiceError> {
        input.validate()?;

        let intent = self.gateway.retrieve_intent(&input.payment_intent_id).await?;
        if !intent.is_succeeded() {
            return Err(ServiceError::PaymentNotSucceeded);
        }

        // A confirm that already ran cleared the cart, so a repeat lands here.
        let (cart, items) = self.require_cart(user_id).await?;

        self.claim_intent(&intent.id).await?;

        // The claim must not outlive a failed attempt: the intent is charged,
        // and the caller has to be able to retry once the fault clears.
        match self.place_order(user_id, &input, &intent, cart, items).await {
            Ok(view) => Ok(view),
            Err(err) => {
                self.release_claim(&intent.id).await;
                Err(err)
            }
        }
    }

    async fn place_order(
        &self,
        user_id: Uuid,
        input: &ConfirmInput,
        intent: &PaymentIntent,
        cart: cart::Model,
        items: Vec<cart_item::Model>,
    ) -> Result<OrderView, ServiceError> {
        let amounts = parse_intent_amounts(&intent.metadata)?;
        let product_names = self.product_names(&items).await?;
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let order_number = allocate_order_number(&txn, now).await?;
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            user_id: Set(user_id),
            status: Set(OrderStatus::Processing),
            payment_status: Set(PaymentStatus::Paid),
            payment_method: Set(Some("card".to_string())),
            subtotal: Set(amounts.subtotal),
            tax: Set(amounts.tax),
            shipping: Set(amounts.shipping),
            total: Set(amounts.total),
            currency: Set(self.settings.currency.clone()),
            gateway_payment_id: Set(Some(intent.id.clone())),
            gateway_customer_id: Set(intent.customer.clone()),
            receipt_url: Set(intent.receipt_url.clone()),
            shipping_address: Set(to_json(input.shipping_address.as_ref())?),
            billing_address: Set(to_json(input.billing_address.as_ref())?),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(items.len());
        for item in &items {
            let name = product_names
                .get(&item.product_id)
                .cloned()
                .unwrap_or_else(|| "Unavailable product".to_string());
            order_items.push(
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    product_id: Set(item.product_id),
                    name: Set(name),
                    unit_price: Set(item.unit_price),
                    quantity: Set(item.quantity),
                    variant_name: Set(item.variant_name.clone()),
                    variant_value: Set(item.variant_value.clone()),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?,
            );
        }

        record_status(
            &txn,
            order.id,
            OrderStatus::Processing,
            Some("Order created".to_string()),
            Some(user_id),
        )
        .await?;

        for item in &items {
            product::Entity::update_many()
                .col_expr(
                    product::Column::Sold,
                    Expr::col(product::Column::Sold).add(item.quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .exec(&txn)
                .await?;
        }

        self.clear_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        self.event_sender
            .send_or_log(Event::PaymentSucceeded {
                intent_id: intent.id.clone(),
            })
            .await;
        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;

        let status_history = crate::entities::order_status_history::Entity::find()
            .filter(crate::entities::order_status_history::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        Ok(OrderView {
            order,
            items: order_items,
            status_history,
        })
    }

    /// Saved card payment methods; empty when the user has no gateway customer.
    #[instrument(skip(self))]
    pub async fn payment_methods(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PaymentMethodCard>, ServiceError> {
        let user = self.require_user(user_id).await?;
        match user.stripe_customer_id {
            Some(customer_id) => self.gateway.list_payment_methods(&customer_id).await,
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn save_payment_method(
        &self,
        user_id: Uuid,
        payment_method_id: &str,
    ) -> Result<(), ServiceError> {
        let user = self.require_user(user_id).await?;
        let customer_id = user.stripe_customer_id.ok_or_else(|| {
            ServiceError::ValidationError("no gateway customer for this user".to_string())
        })?;
        self.gateway
            .attach_payment_method(payment_method_id, &customer_id)
            .await
    }

    /// Applies a gateway webhook event to local state.
    #[instrument(skip(self))]
    pub async fn record_gateway_event(
        &self,
        event_type: &str,
        intent_id: &str,
    ) -> Result<(), ServiceError> {
        match event_type {
            "payment_intent.succeeded" => {
                // Confirm the payment on a matching order that has not been
                // marked paid yet; already-paid orders are left alone.
                if let Some(order) = order::Entity::find()
                    .filter(order::Column::GatewayPaymentId.eq(intent_id))
                    .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
                    .one(&*self.db)
                    .await?
                {
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(PaymentStatus::Paid);
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&*self.db).await?;
                }
                self.event_sender
                    .send_or_log(Event::PaymentSucceeded {
                        intent_id: intent_id.to_string(),
                    })
                    .await;
            }
            "payment_intent.payment_failed" => {
                // Mark a matching unpaid order as failed; paid orders stay paid.
                if let Some(order) = order::Entity::find()
                    .filter(order::Column::GatewayPaymentId.eq(intent_id))
                    .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
                    .one(&*self.db)
                    .await?
                {
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(PaymentStatus::Failed);
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&*self.db).await?;
                }
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        intent_id: intent_id.to_string(),
                    })
                    .await;
            }
            other => {
                tracing::info!(event_type = other, "unhandled gateway event");
            }
        }
        Ok(())
    }

    /// Best-effort guard against concurrent double confirms of one intent.
    /// Degrades open when redis is unavailable; the emptied-cart check is the
    /// hard backstop.
    async fn claim_intent(&self, intent_id: &str) -> Result<(), ServiceError> {
        let key = format!("checkout:confirm:{}", intent_id);
        match self.redis.get_async_connection().await {
            Ok(mut conn) => {
                let set: Result<bool, redis::RedisError> = redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(CONFIRM_KEY_TTL_SECS)
                    .query_async(&mut conn)
                    .await;
                match set {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(ServiceError::Conflict(
                        "payment intent already processed".to_string(),
                    )),
                    Err(e) => {
                        warn!(error = %e, "redis error, skipping confirm idempotency check");
                        Ok(())
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable, skipping confirm idempotency check");
                Ok(())
            }
        }
    }

    /// Drops the confirm claim so a retry is not locked out until the key
    /// expires. Best effort; the claim TTL bounds the damage if this fails.
    async fn release_claim(&self, intent_id: &str) {
        let key = format!("checkout:confirm:{}", intent_id);
        match self.redis.get_async_connection().await {
            Ok(mut conn) => {
                let deleted: Result<(), redis::RedisError> =
                    redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
                if let Err(e) = deleted {
                    warn!(error = %e, intent_id, "failed to release confirm claim");
                }
            }
            Err(e) => {
                warn!(error = %e, intent_id, "redis unavailable, confirm claim not released");
            }
        }
    }

    async fn require_cart(
        &self,
        user_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::EmptyCart)?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        Ok((cart, items))
    }

    async fn require_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    /// Returns the user's gateway customer id, creating and persisting one on
    /// first use.
    async fn ensure_gateway_customer(&self, user: user::Model) -> Result<String, ServiceError> {
        if let Some(customer_id) = &user.stripe_customer_id {
            return Ok(customer_id.clone());
        }
        let customer = self
            .gateway
            .create_customer(&user.email, &user.name, &user.id.to_string())
            .await?;

        let customer_id = customer.id.clone();
        let mut active: user::ActiveModel = user.into();
        active.stripe_customer_id = Set(Some(customer.id));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(customer_id)
    }

    async fn clear_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: &cart::Model,
    ) -> Result<(), ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;
        let mut active: cart::ActiveModel = cart.clone().into();
        active.total_items = Set(0);
        active.total_price = Set(Decimal::ZERO);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;
        Ok(())
    }

    async fn product_names(
        &self,
        items: &[cart_item::Model],
    ) -> Result<HashMap<Uuid, String>, ServiceError> {
        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?;
        Ok(products.into_iter().map(|p| (p.id, p.name)).collect())
    }

    async fn summary_lines(
        &self,
        items: &[cart_item::Model],
    ) -> Result<Vec<SummaryLine>, ServiceError> {
        let names = self.product_names(items).await?;
        Ok(items
            .iter()
            .map(|item| SummaryLine {
                product_id: item.product_id,
                name: names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_else(|| "Unavailable product".to_string()),
                quantity: item.quantity,
                price: item.unit_price,
                variant: match (&item.variant_name, &item.variant_value) {
                    (Some(name), Some(value)) => Some(VariantSelection {
                        name: name.clone(),
                        value: value.clone(),
                    }),
                    _ => None,
                },
            })
            .collect())
    }
}

struct IntentAmounts {
    subtotal: Decimal,
    tax: Decimal,
    shipping: Decimal,
    total: Decimal,
}

/// The charged amounts live in the intent metadata written at intent
/// creation. An intent without them did not come from this service.
fn parse_intent_amounts(metadata: &HashMap<String, String>) -> Result<IntentAmounts, ServiceError> {
    let field = |key: &str| -> Result<Decimal, ServiceError> {
        metadata
            .get(key)
            .and_then(|v| v.parse::<Decimal>().ok())
            .ok_or_else(|| {
                ServiceError::GatewayError(format!("intent metadata missing `{}`", key))
            })
    };
    Ok(IntentAmounts {
        subtotal: field("subtotal")?,
        tax: field("tax")?,
        shipping: field("shipping")?,
        total: field("total")?,
    })
}

fn to_shipping(address: &Address) -> ShippingDetails {
    ShippingDetails {
        name: address.name.clone(),
        phone: address.phone.clone(),
        line1: address.street.clone(),
        city: address.city.clone(),
        state: address.state.clone(),
        country: address.country.clone(),
        postal_code: address.zip_code.clone(),
    }
}

fn to_json(address: Option<&Address>) -> Result<Option<serde_json::Value>, ServiceError> {
    address
        .map(|a| {
            serde_json::to_value(a)
                .map_err(|e| ServiceError::InternalError(format!("address encoding: {}", e)))
        })
        .transpose()
}

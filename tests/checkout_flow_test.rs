mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use std::sync::atomic::Ordering;

use common::TestApp;
use storefront_api::{
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        product::{self, ProductCategory},
        user::UserRole,
    },
    errors::ServiceError,
    services::carts::AddItemInput,
    services::checkout::{Address, ConfirmInput, CreateIntentInput},
};

fn no_addresses() -> CreateIntentInput {
    CreateIntentInput {
        shipping_address: None,
        billing_address: None,
    }
}

#[tokio::test]
async fn create_intent_on_empty_cart_never_reaches_the_gateway() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com", UserRole::User).await;

    let result = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await;

    assert_matches!(result, Err(ServiceError::EmptyCart));
    assert_eq!(app.gateway.intent_calls(), 0);
}

#[tokio::test]
async fn intent_amounts_follow_the_pricing_rules() {
    let app = TestApp::new().await;
    let user = app.seed_user("pricing@example.com", UserRole::User).await;
    let product = app
        .seed_product("Logo Tee", ProductCategory::Merch, dec!(30), 5)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 2,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();

    // subtotal 60, tax 4.80, shipping 10 (below the free threshold)
    assert_eq!(intent.order_summary.quote.subtotal, dec!(60));
    assert_eq!(intent.order_summary.quote.tax, dec!(4.80));
    assert_eq!(intent.order_summary.quote.shipping, dec!(10));
    assert_eq!(intent.amount, dec!(74.80));
    assert!(intent.client_secret.is_some());
    assert_eq!(intent.order_summary.items.len(), 1);
    assert_eq!(intent.order_summary.items[0].name, "Logo Tee");

    let stored = app.gateway.retrieve_intent_amount(&intent.payment_intent_id);
    assert_eq!(stored, Some(7480));
}

#[tokio::test]
async fn large_subtotal_ships_free() {
    let app = TestApp::new().await;
    let user = app.seed_user("freeship@example.com", UserRole::User).await;
    let product = app
        .seed_product("Rust Course", ProductCategory::Course, dec!(120), 0)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();

    assert_eq!(intent.order_summary.quote.shipping, dec!(0));
    assert_eq!(intent.amount, dec!(129.60));
}

#[tokio::test]
async fn confirm_rejects_an_unpaid_intent() {
    let app = TestApp::new().await;
    let user = app.seed_user("unpaid@example.com", UserRole::User).await;
    let product = app
        .seed_product("Ebook", ProductCategory::Ebook, dec!(15), 0)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();

    let result = app
        .state
        .services
        .checkout
        .confirm(
            user.id,
            ConfirmInput {
                payment_intent_id: intent.payment_intent_id,
                shipping_address: None,
                billing_address: None,
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::PaymentNotSucceeded));
}

#[tokio::test]
async fn confirm_creates_the_order_from_intent_metadata_and_clears_the_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("happy@example.com", UserRole::User).await;
    let product = app
        .seed_product("Sticker Pack", ProductCategory::Merch, dec!(30), 5)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 2,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();
    app.gateway.mark_succeeded(&intent.payment_intent_id);

    let order = app
        .state
        .services
        .checkout
        .confirm(
            user.id,
            ConfirmInput {
                payment_intent_id: intent.payment_intent_id.clone(),
                shipping_address: None,
                billing_address: None,
            },
        )
        .await
        .unwrap();

    // Amounts come from the intent metadata captured at intent creation.
    assert_eq!(order.order.subtotal, dec!(60));
    assert_eq!(order.order.tax, dec!(4.80));
    assert_eq!(order.order.shipping, dec!(10));
    assert_eq!(order.order.total, dec!(74.80));
    assert_eq!(order.order.status, OrderStatus::Processing);
    assert_eq!(order.order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.order.payment_method.as_deref(), Some("card"));
    assert!(order.order.order_number.starts_with("ORD"));
    assert_eq!(order.order.order_number.len(), 15);
    assert_eq!(
        order.order.gateway_payment_id.as_deref(),
        Some(intent.payment_intent_id.as_str())
    );
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.items[0].name, "Sticker Pack");
    assert_eq!(order.status_history.len(), 1);
    assert_eq!(order.status_history[0].notes.as_deref(), Some("Order created"));

    // Sold counter moved and the cart is empty again.
    let refreshed = product::Entity::find_by_id(product.product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.sold, 2);

    let summary = app.state.services.carts.summary(user.id).await.unwrap();
    assert_eq!(summary.total_items, 0);
    assert_eq!(summary.total_price, dec!(0));
}

#[tokio::test]
async fn confirming_the_same_intent_twice_fails_on_the_emptied_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("double@example.com", UserRole::User).await;
    let product = app
        .seed_product("Consultation Hour", ProductCategory::Consultation, dec!(200), 0)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();
    app.gateway.mark_succeeded(&intent.payment_intent_id);

    let confirm_input = || ConfirmInput {
        payment_intent_id: intent.payment_intent_id.clone(),
        shipping_address: None,
        billing_address: None,
    };

    app.state
        .services
        .checkout
        .confirm(user.id, confirm_input())
        .await
        .unwrap();

    let second = app
        .state
        .services
        .checkout
        .confirm(user.id, confirm_input())
        .await;
    assert_matches!(second, Err(ServiceError::EmptyCart));
}

#[tokio::test]
async fn a_confirm_that_fails_midway_can_be_retried() {
    let app = TestApp::new().await;
    let user = app.seed_user("retry@example.com", UserRole::User).await;
    let product = app
        .seed_product("Tote Bag", ProductCategory::Merch, dec!(18), 5)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();
    app.gateway.mark_succeeded(&intent.payment_intent_id);

    let confirm_input = || ConfirmInput {
        payment_intent_id: intent.payment_intent_id.clone(),
        shipping_address: None,
        billing_address: None,
    };

    // Take the order items table away so the creation transaction fails
    // after the intent was charged.
    app.state
        .db
        .execute_unprepared("ALTER TABLE order_items RENAME TO order_items_offline")
        .await
        .unwrap();
    let failed = app
        .state
        .services
        .checkout
        .confirm(user.id, confirm_input())
        .await;
    assert_matches!(failed, Err(ServiceError::DatabaseError(_)));

    // The cart survived the rollback and a retry goes through.
    let summary = app.state.services.carts.summary(user.id).await.unwrap();
    assert_eq!(summary.total_items, 1);

    app.state
        .db
        .execute_unprepared("ALTER TABLE order_items_offline RENAME TO order_items")
        .await
        .unwrap();
    let order = app
        .state
        .services
        .checkout
        .confirm(user.id, confirm_input())
        .await
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Processing);
    assert_eq!(order.items.len(), 1);
}

#[tokio::test]
async fn shipping_address_is_forwarded_to_the_gateway() {
    let app = TestApp::new().await;
    let user = app.seed_user("shipto@example.com", UserRole::User).await;
    let product = app
        .seed_product("Enamel Pin", ProductCategory::Merch, dec!(9), 5)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    app.state
        .services
        .checkout
        .create_intent(
            user.id,
            CreateIntentInput {
                shipping_address: Some(Address {
                    name: "Grace Hopper".to_string(),
                    email: "grace@example.com".to_string(),
                    phone: None,
                    street: "9 Harbor Way".to_string(),
                    city: "Arlington".to_string(),
                    state: Some("VA".to_string()),
                    country: "US".to_string(),
                    zip_code: "22202".to_string(),
                }),
                billing_address: None,
            },
        )
        .await
        .unwrap();

    let shipping = app.gateway.last_shipping.lock().unwrap().clone().unwrap();
    assert_eq!(shipping.name, "Grace Hopper");
    assert_eq!(shipping.line1, "9 Harbor Way");
    assert_eq!(shipping.postal_code, "22202");
}

#[tokio::test]
async fn webhook_success_confirms_an_unpaid_order() {
    let app = TestApp::new().await;
    let user = app.seed_user("webhook@example.com", UserRole::User).await;
    let product = app
        .seed_product("Ebook Three", ProductCategory::Ebook, dec!(25), 0)
        .await;

    app.state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: product.product.id,
                quantity: 1,
                variant: None,
            },
        )
        .await
        .unwrap();

    let intent = app
        .state
        .services
        .checkout
        .create_intent(user.id, no_addresses())
        .await
        .unwrap();
    app.gateway.mark_succeeded(&intent.payment_intent_id);

    let order = app
        .state
        .services
        .checkout
        .confirm(
            user.id,
            ConfirmInput {
                payment_intent_id: intent.payment_intent_id.clone(),
                shipping_address: None,
                billing_address: None,
            },
        )
        .await
        .unwrap();

    // Simulate a confirm that raced the gateway: the order exists but the
    // payment was still pending when it was written.
    let mut active: order::ActiveModel = order.order.clone().into();
    active.payment_status = Set(PaymentStatus::Pending);
    active.update(&*app.state.db).await.unwrap();

    app.state
        .services
        .checkout
        .record_gateway_event("payment_intent.succeeded", &intent.payment_intent_id)
        .await
        .unwrap();

    let refreshed = order::Entity::find_by_id(order.order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn gateway_customer_is_created_once_and_persisted() {
    let app = TestApp::new().await;
    let user = app.seed_user("customer@example.com", UserRole::User).await;
    let product = app
        .seed_product("Ebook Two", ProductCategory::Ebook, dec!(20), 0)
        .await;

    for _ in 0..2 {
        app.state
            .services
            .carts
            .add_item(
                user.id,
                AddItemInput {
                    product_id: product.product.id,
                    quantity: 1,
                    variant: None,
                },
            )
            .await
            .unwrap();
        app.state
            .services
            .checkout
            .create_intent(user.id, no_addresses())
            .await
            .unwrap();
        app.state.services.carts.clear(user.id).await.unwrap();
    }

    let refreshed = storefront_api::entities::user::Entity::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        refreshed.stripe_customer_id.as_deref(),
        Some(format!("cus_{}", user.id).as_str())
    );
    assert_eq!(app.gateway.customer_calls.load(Ordering::SeqCst), 1);
}

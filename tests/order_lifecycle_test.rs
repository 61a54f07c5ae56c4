mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;
use storefront_api::{
    auth::AuthUser,
    entities::{
        order::{OrderStatus, PaymentStatus},
        product::ProductCategory,
        user::{self, UserRole},
    },
    errors::ServiceError,
    services::carts::AddItemInput,
    services::checkout::{ConfirmInput, CreateIntentInput},
    services::orders::OrderView,
};

fn principal(user: &user::Model) -> AuthUser {
    AuthUser {
        user_id: user.id,
        role: user.role,
        token_id: Uuid::new_v4().to_string(),
    }
}

/// Runs a full checkout for the user and returns the resulting order.
async fn place_order(app: &TestApp, user: &user::Model) -> OrderView {
    let product = app
        .seed_product(
            &format!("Widget {}", Uuid::new_v4()),
            ProductCategory::Merch,
            dec!(25),
            100,
        )
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
        .create_intent(
            user.id,
            CreateIntentInput {
                shipping_address: None,
                billing_address: None,
            },
        )
        .await
        .unwrap();
    app.gateway.mark_succeeded(&intent.payment_intent_id);

    app.state
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
        .await
        .unwrap()
}

#[tokio::test]
async fn owner_can_cancel_a_processing_order() {
    let app = TestApp::new().await;
    let user = app.seed_user("cancel@example.com", UserRole::User).await;
    let order = place_order(&app, &user).await;

    let cancelled = app
        .state
        .services
        .orders
        .cancel(order.order.id, &principal(&user))
        .await
        .unwrap();

    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert!(cancelled.order.cancelled_at.is_some());
    assert_eq!(cancelled.status_history.len(), 2);
}

#[tokio::test]
async fn other_users_cannot_read_or_cancel_an_order() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com", UserRole::User).await;
    let stranger = app.seed_user("stranger@example.com", UserRole::User).await;
    let order = place_order(&app, &owner).await;

    let read = app
        .state
        .services
        .orders
        .get(order.order.id, &principal(&stranger))
        .await;
    assert_matches!(read, Err(ServiceError::Forbidden(_)));

    let cancel = app
        .state
        .services
        .orders
        .cancel(order.order.id, &principal(&stranger))
        .await;
    assert_matches!(cancel, Err(ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn admins_can_read_any_order() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owned@example.com", UserRole::User).await;
    let admin = app.seed_user("admin@example.com", UserRole::Admin).await;
    let order = place_order(&app, &owner).await;

    let read = app
        .state
        .services
        .orders
        .get(order.order.id, &principal(&admin))
        .await;
    assert!(read.is_ok());
}

#[tokio::test]
async fn admin_progression_stamps_the_terminal_dates() {
    let app = TestApp::new().await;
    let user = app.seed_user("progress@example.com", UserRole::User).await;
    let admin = app.seed_user("admin2@example.com", UserRole::Admin).await;
    let order = place_order(&app, &user).await;

    let shipped = app
        .state
        .services
        .orders
        .set_status(order.order.id, OrderStatus::Shipped, None, admin.id)
        .await
        .unwrap();
    assert_eq!(shipped.order.status, OrderStatus::Shipped);
    assert!(shipped.order.delivered_at.is_none());

    let delivered = app
        .state
        .services
        .orders
        .set_status(
            order.order.id,
            OrderStatus::Delivered,
            Some("Left at the door".to_string()),
            admin.id,
        )
        .await
        .unwrap();
    assert_eq!(delivered.order.status, OrderStatus::Delivered);
    assert!(delivered.order.delivered_at.is_some());
    assert_eq!(delivered.status_history.len(), 3);
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled_by_the_customer() {
    let app = TestApp::new().await;
    let user = app.seed_user("late@example.com", UserRole::User).await;
    let admin = app.seed_user("admin3@example.com", UserRole::Admin).await;
    let order = place_order(&app, &user).await;

    app.state
        .services
        .orders
        .set_status(order.order.id, OrderStatus::Shipped, None, admin.id)
        .await
        .unwrap();

    let result = app
        .state
        .services
        .orders
        .cancel(order.order.id, &principal(&user))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn backward_transitions_are_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("backward@example.com", UserRole::User).await;
    let admin = app.seed_user("admin4@example.com", UserRole::Admin).await;
    let order = place_order(&app, &user).await;

    let result = app
        .state
        .services
        .orders
        .set_status(order.order.id, OrderStatus::Pending, None, admin.id)
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn refunding_marks_the_payment_refunded() {
    let app = TestApp::new().await;
    let user = app.seed_user("refund@example.com", UserRole::User).await;
    let admin = app.seed_user("admin5@example.com", UserRole::Admin).await;
    let order = place_order(&app, &user).await;

    let refunded = app
        .state
        .services
        .orders
        .set_status(order.order.id, OrderStatus::Refunded, None, admin.id)
        .await
        .unwrap();
    assert_eq!(refunded.order.status, OrderStatus::Refunded);
    assert_eq!(refunded.order.payment_status, PaymentStatus::Refunded);
    assert!(refunded.order.refunded_at.is_some());
}

#[tokio::test]
async fn order_numbers_increment_within_a_day() {
    let app = TestApp::new().await;
    let user = app.seed_user("seq@example.com", UserRole::User).await;

    let first = place_order(&app, &user).await;
    let second = place_order(&app, &user).await;

    let prefix = &first.order.order_number[..11];
    assert_eq!(&second.order.order_number[..11], prefix);

    let first_seq: u32 = first.order.order_number[11..].parse().unwrap();
    let second_seq: u32 = second.order.order_number[11..].parse().unwrap();
    assert_eq!(second_seq, first_seq + 1);
}

#[tokio::test]
async fn listing_is_scoped_to_the_user() {
    let app = TestApp::new().await;
    let alice = app.seed_user("alice@example.com", UserRole::User).await;
    let bob = app.seed_user("bob@example.com", UserRole::User).await;
    place_order(&app, &alice).await;
    place_order(&app, &alice).await;
    place_order(&app, &bob).await;

    let (orders, total) = app
        .state
        .services
        .orders
        .list_for_user(alice.id, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(orders.iter().all(|o| o.order.user_id == alice.id));

    let (_, all_total) = app
        .state
        .services
        .orders
        .list_all(
            storefront_api::services::orders::OrderFilter {
                status: None,
                payment_status: None,
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(all_total, 3);
}

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{TestApp, TEST_PASSWORD};
use storefront_api::entities::{product::ProductCategory, user::UserRole};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_request(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn register_returns_a_token_inside_the_success_envelope() {
    let app = TestApp::new().await;

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/register",
            json!({
                "name": "Ada",
                "email": "ada@example.com",
                "password": "Sup3rSecret"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["user"]["email"], json!("ada@example.com"));
    // The hash never leaves the server.
    assert!(body["data"]["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn login_failures_are_uniform_401s() {
    let app = TestApp::new().await;
    app.seed_user("known@example.com", UserRole::User).await;

    for (email, password) in [
        ("known@example.com", "WrongPass1"),
        ("unknown@example.com", TEST_PASSWORD),
    ] {
        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/login",
                json!({ "email": email, "password": password }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["message"], json!("Invalid credentials"));
        assert_eq!(body["error"]["status"], json!(401));
    }
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = TestApp::new().await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/api/v1/cart")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let app = TestApp::new().await;
    let user = app.seed_user("plain@example.com", UserRole::User).await;
    let token = app.token_for(&user);

    let response = app
        .router()
        .oneshot(authed_request(
            Method::GET,
            "/api/v1/admin/dashboard",
            &token,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_dashboard_is_reachable_for_admins() {
    let app = TestApp::new().await;
    let admin = app.seed_user("boss@example.com", UserRole::Admin).await;
    let token = app.token_for(&admin);

    let response = app
        .router()
        .oneshot(authed_request(
            Method::GET,
            "/api/v1/admin/dashboard",
            &token,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert!(body["data"]["total_users"].is_number());
}

#[tokio::test]
async fn product_listing_is_public_and_paginated() {
    let app = TestApp::new().await;
    app.seed_product("Public Tee", ProductCategory::Merch, dec!(19.99), 3)
        .await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/api/v1/products?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["pagination"]["limit"], json!(5));
    assert_eq!(body["data"]["pagination"]["total"], json!(1));
    assert_eq!(body["data"]["items"][0]["is_available"], json!(true));
}

#[tokio::test]
async fn unknown_product_is_a_structured_404() {
    let app = TestApp::new().await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(&format!("/api/v1/products/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["message"], json!("Product not found"));
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use uuid::Uuid;

use storefront_api::{
    auth::{hash_password, AuthService},
    config::AppConfig,
    entities::{
        product::ProductCategory,
        user::{self, UserRole},
    },
    errors::ServiceError,
    events::EventSender,
    handlers::AppServices,
    payments::{GatewayCustomer, PaymentGateway, PaymentIntent, PaymentMethodCard, ShippingDetails},
    services::catalog::{CreateProductInput, CreateVariantInput, ProductView},
    AppState,
};

pub const TEST_PASSWORD: &str = "Passw0rdXy";

/// In-memory payment gateway stand-in. Intents live in a map and only
/// succeed when a test flips them with [`StubGateway::mark_succeeded`].
pub struct StubGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    counter: AtomicUsize,
    pub create_intent_calls: AtomicUsize,
    pub customer_calls: AtomicUsize,
    pub last_shipping: Mutex<Option<ShippingDetails>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            counter: AtomicUsize::new(0),
            create_intent_calls: AtomicUsize::new(0),
            customer_calls: AtomicUsize::new(0),
            last_shipping: Mutex::new(None),
        }
    }

    pub fn mark_succeeded(&self, intent_id: &str) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(intent_id) {
            intent.status = "succeeded".to_string();
            intent.receipt_url = Some(format!("https://receipts.test/{}", intent_id));
        }
    }

    pub fn intent_calls(&self) -> usize {
        self.create_intent_calls.load(Ordering::SeqCst)
    }

    /// The minor-unit amount recorded for an intent, if it exists.
    pub fn retrieve_intent_amount(&self, intent_id: &str) -> Option<i64> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .map(|i| i.amount)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_customer(
        &self,
        _email: &str,
        _name: &str,
        user_id: &str,
    ) -> Result<GatewayCustomer, ServiceError> {
        self.customer_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayCustomer {
            id: format!("cus_{}", user_id),
        })
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        customer_id: &str,
        metadata: HashMap<String, String>,
        shipping: Option<ShippingDetails>,
    ) -> Result<PaymentIntent, ServiceError> {
        self.create_intent_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_shipping.lock().unwrap() = shipping;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let intent = PaymentIntent {
            id: format!("pi_test_{}", n),
            client_secret: Some(format!("pi_test_{}_secret", n)),
            status: "requires_payment_method".to_string(),
            amount: amount_cents,
            currency: currency.to_string(),
            customer: Some(customer_id.to_string()),
            metadata,
            receipt_url: None,
        };
        self.intents
            .lock()
            .unwrap()
            .insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ServiceError::GatewayError("no such payment intent".to_string()))
    }

    async fn list_payment_methods(
        &self,
        _customer_id: &str,
    ) -> Result<Vec<PaymentMethodCard>, ServiceError> {
        Ok(Vec::new())
    }

    async fn attach_payment_method(
        &self,
        _payment_method_id: &str,
        _customer_id: &str,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Application state over a fresh in-memory SQLite database.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub gateway: Arc<StubGateway>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        redis_url: "redis://127.0.0.1:1".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18080,
        jwt_secret: "integration-test-signing-secret-0123456789".to_string(),
        jwt_expiration_secs: 3600,
        stripe_secret_key: "sk_test_stub".to_string(),
        stripe_webhook_secret: None,
        stripe_api_base: "http://localhost:0".to_string(),
        webhook_tolerance_secs: 300,
        currency: "usd".to_string(),
        tax_rate: Decimal::new(8, 2),
        free_shipping_threshold: Decimal::from(100),
        shipping_fee: Decimal::from(10),
        cors_origins: vec![],
        log_level: "warn".to_string(),
        log_json: false,
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = test_config();

        // A single connection keeps every query on the same in-memory database.
        let mut options = ConnectOptions::new(cfg.database_url.clone());
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(options)
            .await
            .expect("failed to open test database");
        storefront_api::db::run_migrations(&db)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(db);

        // Port 1 is never a redis server; redis-backed paths degrade open.
        let redis = Arc::new(redis::Client::open(cfg.redis_url.clone()).unwrap());
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        tokio::spawn(storefront_api::events::process_events(event_rx));

        let auth = Arc::new(AuthService::new(
            &cfg.jwt_secret,
            cfg.jwt_expiration_secs,
            redis.clone(),
        ));
        let gateway = Arc::new(StubGateway::new());
        let services = AppServices::new(
            db.clone(),
            event_sender,
            redis.clone(),
            auth.clone(),
            gateway.clone(),
            &cfg,
        );

        let state = Arc::new(AppState {
            db,
            config: cfg,
            auth,
            redis,
            services,
        });

        Self { state, gateway }
    }

    /// The full `/api/v1` router over this app's state.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes(self.state.clone()))
            .with_state(self.state.clone())
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state
            .auth
            .generate_token(user)
            .expect("failed to issue token")
    }

    pub async fn seed_user(&self, email: &str, role: UserRole) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test User".to_string()),
            email: Set(email.to_string()),
            password_hash: Set(hash_password(TEST_PASSWORD).unwrap()),
            role: Set(role),
            stripe_customer_id: Set(None),
            last_login: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed user")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        category: ProductCategory,
        price: Decimal,
        stock: i32,
    ) -> ProductView {
        self.seed_product_with_variants(name, category, price, stock, vec![])
            .await
    }

    pub async fn seed_product_with_variants(
        &self,
        name: &str,
        category: ProductCategory,
        price: Decimal,
        stock: i32,
        variants: Vec<CreateVariantInput>,
    ) -> ProductView {
        let admin = self
            .seed_user(&format!("seed-{}@example.com", Uuid::new_v4()), UserRole::Admin)
            .await;
        let slug = name.to_lowercase().replace(' ', "-");
        self.state
            .services
            .catalog
            .create(
                CreateProductInput {
                    name: name.to_string(),
                    slug,
                    description: format!("{} description", name),
                    category,
                    price,
                    compare_price: None,
                    stock,
                    is_active: true,
                    is_featured: false,
                    thumbnail: None,
                    variants,
                },
                admin.id,
            )
            .await
            .expect("failed to seed product")
    }
}

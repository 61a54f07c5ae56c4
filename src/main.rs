use std::sync::Arc;

use anyhow::Context;
use axum::{http::HeaderValue, Router};
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg);

    let db = api::db::establish_connection(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    api::db::run_migrations(&db)
        .await
        .context("failed to run migrations")?;
    let db = Arc::new(db);

    let redis = Arc::new(
        redis::Client::open(cfg.redis_url.clone()).context("invalid redis url")?,
    );

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let auth = Arc::new(api::auth::AuthService::new(
        &cfg.jwt_secret,
        cfg.jwt_expiration_secs,
        redis.clone(),
    ));

    let gateway: Arc<dyn api::payments::PaymentGateway> = Arc::new(
        api::payments::stripe::StripeGateway::new(
            cfg.stripe_api_base.clone(),
            cfg.stripe_secret_key.clone(),
        ),
    );

    let services = api::handlers::AppServices::new(
        db.clone(),
        event_sender,
        redis.clone(),
        auth.clone(),
        gateway,
        &cfg,
    );

    let state = Arc::new(api::AppState {
        db,
        config: cfg.clone(),
        auth,
        redis,
        services,
    });

    let cors = build_cors(&cfg.cors_origins);

    let app = Router::new()
        .nest("/api/v1", api::api_v1_routes(state.clone()))
        .merge(api::openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = cfg.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "storefront-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    if parsed.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foundrcard_backend::auth::{AuthService, GoogleTokenVerifier, Reconciler, SessionIssuer};
use foundrcard_backend::cache::InMemoryUserCache;
use foundrcard_backend::config::Config;
use foundrcard_backend::store::SqliteUserStore;
use foundrcard_backend::{logging, routes, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FoundrCard backend");

    let store = Arc::new(SqliteUserStore::new(&config.database.url)?);
    let cache = Arc::new(InMemoryUserCache::new());

    let verifier =
        GoogleTokenVerifier::new(&config.google.certs_url, &config.google.client_id).await?;
    let reconciler = Reconciler::new(
        store.clone(),
        cache.clone(),
        Duration::from_secs(config.cache.user_ttl_secs),
    );
    let issuer = SessionIssuer::new(
        &config.jwt.secret,
        &config.jwt.issuer,
        config.jwt.access_lifetime_secs,
        config.jwt.refresh_lifetime_secs,
    );
    let auth = AuthService::new(verifier, reconciler, issuer, store.clone());

    let state = Arc::new(AppState {
        config: config.clone(),
        auth,
        store,
        cache,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::auth::router(state.clone()))
        .merge(routes::users::router(state.clone()))
        .layer(axum::middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

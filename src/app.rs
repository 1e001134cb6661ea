use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{select_identity_provider, IdentityProvider, PrincipalCache, SqliteIdentityStore};
use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus};
use crate::routes::{auth, health, rbac, tickets};
use crate::session::SessionCodec;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sessions: Arc<SessionCodec>,
    pub identity: Arc<dyn IdentityProvider>,
    pub principal_cache: PrincipalCache,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AuthConfig, event_bus: EventBus) -> Result<Self, AppError> {
        let codec = SessionCodec::new(&config);
        let cache = PrincipalCache::new(config.principal_cache_ttl, config.principal_cache_capacity);
        let store = Arc::new(SqliteIdentityStore::new(pool.clone()));

        let identity = select_identity_provider(&config, store, codec.clone(), cache.clone())?;
        tracing::info!(provider = identity.name(), environment = ?config.environment, "identity provider selected");

        Ok(Self {
            pool,
            sessions: Arc::new(codec),
            identity,
            principal_cache: cache,
            event_bus,
        })
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AuthConfig::from_env()?;
    create_app_with_config(pool, config).await
}

pub async fn create_app_with_config(pool: SqlitePool, config: AuthConfig) -> Result<Router, AppError> {
    let (event_bus, audit_rx) = init_event_bus();
    tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

    let state = AppState::new(pool, config, event_bus)?;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/tickets", tickets::routes())
        .nest("/rbac", rbac::routes())
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

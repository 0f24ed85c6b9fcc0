use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{integrity, Authorizer, SqlitePermissionStore};
use crate::config::AuthzSettings;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, contacts, health, rbac, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub authz: Arc<Authorizer>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, authz: Authorizer, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            authz: Arc::new(authz),
            event_bus,
        }
    }
}

/// Builds the router using `JWT_*` and `PERMISSION_CACHE` from the environment.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let settings = AuthzSettings::from_env()?;
    create_app_with(pool, jwt_config, settings).await
}

pub async fn create_app_with(
    pool: SqlitePool,
    jwt_config: JwtConfig,
    settings: AuthzSettings,
) -> Result<Router, AppError> {
    let store = Arc::new(SqlitePermissionStore::new(pool.clone()));
    let authz = Authorizer::build(store, settings).await?;

    let orphans = integrity::report_orphans(&pool).await?;
    if orphans > 0 {
        tracing::warn!(orphans, "RBAC integrity check found dangling references");
    }

    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, authz, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/me/permissions", get(auth::my_permissions))
        .route("/logout", post(auth::logout));

    let contact_routes = Router::new()
        .route("/", get(contacts::list_contacts).post(contacts::create_contact))
        .route(
            "/:id",
            get(contacts::get_contact)
                .put(contacts::update_contact)
                .delete(contacts::delete_contact),
        );

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        );

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/contacts", contact_routes)
        .nest("/users", user_routes)
        .nest("/rbac", rbac::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

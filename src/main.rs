mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod notifications;
mod outbox;
mod store;
mod tickets;
mod wizard;
mod workflow;

use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool (with schema
/// bootstrap), the double-submit cache and the outbox dispatcher, then
/// serves the Axum router.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "av10julio_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool and bootstrap the tables
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Double-submit guard: recent (tipo, email) submissions, short TTL
    let recent_submission_cache = Cache::builder()
        .time_to_live(Duration::from_secs(config.dedup_ttl_secs))
        .max_capacity(10_000)
        .build();
    tracing::info!("Submission deduplication cache initialized");

    // Outbox dispatcher: turns pending workflow events into notifications
    tokio::spawn(outbox::run_dispatcher(db.pool.clone(), config.clone()));

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        recent_submission_cache,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // Registration wizard
        .route(
            "/api/v1/solicitudes/:tipo/validar/:paso",
            post(handlers::validar_paso),
        )
        .route("/api/v1/solicitudes/:tipo", post(handlers::enviar_solicitud))
        // Admin review console
        .route(
            "/api/v1/admin/solicitudes/:tipo",
            get(handlers::listar_solicitudes),
        )
        .route(
            "/api/v1/admin/solicitudes/:tipo/:id",
            get(handlers::obtener_solicitud),
        )
        .route(
            "/api/v1/admin/solicitudes/:tipo/:id/avanzar",
            post(handlers::avanzar_etapa),
        )
        .route(
            "/api/v1/admin/solicitudes/:tipo/:id/aprobar",
            post(handlers::aprobar_solicitud),
        )
        .route(
            "/api/v1/admin/solicitudes/:tipo/:id/rechazar",
            post(handlers::rechazar_solicitud),
        )
        // Public storefront & reference data
        .route("/api/v1/empresas/:id", get(handlers::obtener_empresa))
        .route(
            "/api/v1/referencias/:coleccion",
            get(handlers::listar_referencias),
        )
        // Notifications
        .route(
            "/api/v1/notificaciones/usuario/:user_id",
            get(handlers::listar_notificaciones),
        )
        .route(
            "/api/v1/notificaciones/usuario/:user_id/no-leidas",
            get(handlers::contar_no_leidas),
        )
        .route(
            "/api/v1/notificaciones/:id/leer",
            post(handlers::marcar_leida),
        )
        // Support tickets
        .route("/api/v1/tickets", post(handlers::crear_ticket))
        .route("/api/v1/admin/tickets", get(handlers::listar_tickets))
        .route(
            "/api/v1/admin/tickets/:id/responder",
            post(handlers::responder_ticket),
        )
        .route(
            "/api/v1/admin/tickets/:id/resolver",
            post(handlers::resolver_ticket),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB max payload (forms only)
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

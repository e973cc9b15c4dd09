//! InvoiceFlow API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Authentication and authorization
//! - Rate limiting (global token bucket, per-source login lockout)
//! - Request routing
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;
mod telemetry;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use invoiceflow_common::{
    auth::{hash_password, JwtManager, Role},
    config::AppConfig,
    db::{DbPool, Repository},
    errors::AppError,
    metrics,
    notifications::create_notifier,
    ocr::{create_extractor, OcrIngestionService},
    rate_limit::AttemptLimiter,
    workflow::WorkflowEngine,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub repo: Repository,
    pub engine: Arc<WorkflowEngine>,
    pub ingestion: Arc<OcrIngestionService>,
    pub login_limiter: Arc<AttemptLimiter>,
    pub jwt: Arc<JwtManager>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    // Initialize tracing
    let tracer_provider = telemetry::init(&config.observability)?;

    info!("Starting InvoiceFlow API Gateway v{}", invoiceflow_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .set_buckets_for_metric(
                Matcher::Suffix("request_duration_seconds".to_string()),
                metrics::LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Suffix("ocr_duration_seconds".to_string()),
                metrics::OCR_BUCKETS,
            )?
            .install()?;
        info!(port = config.observability.metrics_port, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    if config.database.run_migrations {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations")
            .run(db.write().get_postgres_connection_pool())
            .await?;
        info!("Database migrations completed");
    }

    let repo = Repository::new(db.clone());
    bootstrap_admin(&repo, &config).await?;

    let jwt_secret = config
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| AppError::Configuration {
            message: "auth.jwt_secret must be set".to_string(),
        })?;
    let jwt = Arc::new(JwtManager::new(jwt_secret, config.auth.jwt_expiration_secs));

    // Workflow services
    let store = Arc::new(repo.clone());
    let notifier = create_notifier(&config.notifications)?;
    let engine = Arc::new(WorkflowEngine::new(store.clone(), notifier));
    let extractor = create_extractor(&config.ocr)?;
    let ingestion = Arc::new(OcrIngestionService::new(extractor, store, engine.clone()));

    let login_limiter = Arc::new(AttemptLimiter::from_config(&config.login_throttle));
    spawn_limiter_sweep(
        login_limiter.clone(),
        Duration::from_secs(config.login_throttle.cleanup_interval_secs.max(1)),
    );

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        repo,
        engine,
        ingestion,
        login_limiter,
        jwt,
    };

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            warn!(error = %e, "Failed to flush traces");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Create an `admin` account when the user table is empty
async fn bootstrap_admin(repo: &Repository, config: &AppConfig) -> Result<(), AppError> {
    let Some(password) = config.auth.bootstrap_admin_password.as_deref() else {
        return Ok(());
    };
    if repo.count_users().await? > 0 {
        return Ok(());
    }

    repo.create_user("admin", None, hash_password(password)?, Role::Admin)
        .await?;
    warn!("Created bootstrap admin account; change its password");
    Ok(())
}

/// Periodically drop login-attempt entries that no longer matter
fn spawn_limiter_sweep(limiter: Arc<AttemptLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = limiter.cleanup_expired_entries();
            if removed > 0 {
                debug!(removed, tracked = limiter.tracked_sources(), "Swept login attempts");
            }
        }
    });
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router, AppError> {
    use handlers::{auth, departments, health, invoices, lpos, ocr, projects, reports, vendors};

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = DefaultBodyLimit::max(state.config.storage.max_upload_bytes);

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))

        // Authentication
        .route("/auth/login", post(auth::login))

        // Invoice endpoints
        .route("/invoices", post(invoices::create_invoice).get(invoices::list_invoices))
        .route("/invoices/ocr", post(ocr::upload_invoice).layer(upload_limit))
        .route(
            "/invoices/{id}",
            get(invoices::get_invoice)
                .patch(invoices::update_invoice)
                .delete(invoices::delete_invoice),
        )
        .route(
            "/invoices/{id}/transitions",
            post(invoices::transition_invoice).get(invoices::allowed_transitions),
        )
        .route("/invoices/{id}/history", get(invoices::invoice_history))
        .route(
            "/invoices/{id}/comments",
            post(invoices::add_comment).get(invoices::list_comments),
        )

        // Reference data
        .route("/projects", post(projects::create_project).get(projects::list_projects))
        .route(
            "/projects/{id}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/vendors", post(vendors::create_vendor).get(vendors::list_vendors))
        .route(
            "/vendors/{id}",
            get(vendors::get_vendor)
                .put(vendors::update_vendor)
                .delete(vendors::delete_vendor),
        )
        .route("/lpos", post(lpos::create_lpo).get(lpos::list_lpos))
        .route(
            "/lpos/{id}",
            get(lpos::get_lpo).put(lpos::update_lpo).delete(lpos::delete_lpo),
        )
        .route(
            "/departments",
            post(departments::create_department).get(departments::list_departments),
        )
        .route(
            "/departments/{id}",
            get(departments::get_department)
                .put(departments::update_department)
                .delete(departments::delete_department),
        )
        .route("/departments/{id}/children", get(departments::department_children))

        // Reports
        .route("/reports/status-summary", get(reports::status_summary))
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        )?;
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    Ok(Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use actix_cors::Cors;
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use utoipa_swagger_ui::SwaggerUi;

use fabula::openapi::ApiDoc;
use fabula::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use fabula::repo::inmem::InMemRepo;
use fabula::routes::{config, AppState};
use fabula::security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker, etc.)
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Validate required environment variables
    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping fabula server");
    info!(
        "Snapshot directory: {}",
        std::env::var("FABULA_DATA_DIR").unwrap_or_else(|_| "data".to_string())
    );

    let repo = InMemRepo::new();
    info!("Using in-memory repository backend");

    let limits = RateLimiterFacade::new(
        InMemoryRateLimiter::new(true),
        RateLimitConfig::from_env(),
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local SPA dev servers
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            // If FRONTEND_URL env var is provided and not already covered, add it.
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        let handle = metrics_handle.clone();
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .route(
                "/metrics",
                web::get().to(move || {
                    let handle = handle.clone();
                    async move {
                        HttpResponse::Ok()
                            .content_type("text/plain; version=0.0.4")
                            .body(handle.render())
                    }
                }),
            )
            .app_data(web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                limits: limits.clone(),
            }))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080 (all interfaces)");

    server.run().await.context("server terminated")
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    let required = vec!["JWT_SECRET"];

    let mut missing = Vec::new();
    for var in required {
        if env::var(var).is_err() {
            missing.push(var);
        }
    }

    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {:?}", missing);
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    // Validate JWT_SECRET is sufficiently long
    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }
}

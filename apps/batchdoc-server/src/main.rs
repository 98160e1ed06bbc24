//! Batch Record Generator Server
//!
//! Turns an uploaded spreadsheet and a Word template into one filled
//! document per selected row. Provides REST API endpoints for:
//!
//! - Record preview with text and field filters
//! - Template placeholder listing
//! - Batch generation (JSON report or direct download, zipped when needed)
//!
//! ## Architecture
//!
//! Requests are stateless: uploads live in memory for one request and the
//! pipeline in `batchdoc-core` runs on the blocking pool under a timeout.
//! The server adds:
//!
//! - Rate limiting via tower-governor
//! - Upload size limits
//! - Request tracing

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use batchdoc_core::BatchConfig;
use clap::Parser;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod form;

use api::{
    handle_generate, handle_generate_download, handle_health, handle_preview,
    handle_template_fields,
};

/// Command-line arguments for the batch record server
#[derive(Parser, Debug)]
#[command(name = "batchdoc-server")]
#[command(about = "Batch record generator: spreadsheet rows to filled Word documents")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Generation timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Rate limit: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// Maximum request body size in megabytes
    #[arg(long, default_value = "25")]
    max_upload_mb: usize,

    /// JSON configuration file (sheet, aliases, field formats, ...)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Generation timeout in milliseconds
    pub timeout_ms: u64,
    /// Configuration requests start from
    pub config: Arc<BatchConfig>,
}

/// Routes plus the layers every deployment needs
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handle_health))
        // API endpoints
        .route("/api/preview", post(handle_preview))
        .route("/api/template/fields", post(handle_template_fields))
        .route("/api/generate", post(handle_generate))
        .route("/api/generate/download", post(handle_generate_download))
        // Apply middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => BatchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BatchConfig::default(),
    };

    if args.print_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    info!("Starting batch record server on {}:{}", args.host, args.port);

    // Create rate limiter configuration
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit * 2)
            .finish()
            .context("Failed to create rate limiter config")?,
    );

    // Create shared state
    let state = AppState {
        timeout_ms: args.timeout_ms,
        config: Arc::new(config),
    };

    let app = router(state, args.max_upload_mb * 1024 * 1024).layer(GovernorLayer {
        config: governor_conf,
    });

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);
    info!("Generation timeout: {}ms", args.timeout_ms);
    info!("Upload limit: {}MB", args.max_upload_mb);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

//! # wavstore: upload, download and stream WAV audio files
//!
//! `wavstore` is a small HTTP service that accepts audio file uploads, keeps them in a flat
//! directory on local disk, and serves them back by filename.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `POST` | `/upload/` | Multipart upload (field `file`), stored under its filename |
//! | `GET` | `/download/{filename}` | Full file as an `audio/wav` attachment |
//! | `GET` | `/stream/{filename}` | Same content for playback, with byte-range support |
//! | `GET` | `/healthz` | Liveness check |
//! | `GET` | `/openapi.json`, `/docs` | OpenAPI document and interactive docs |
//! | `GET` | `/internal/metrics` | Prometheus metrics, when enabled |
//!
//! Files are keyed by the filename supplied at upload. Uploading the same name twice replaces
//! the earlier file. Writes go to a temp file and are renamed into place, so a download never
//! sees half an upload.
//!
//! ## Architecture
//!
//! Built on [Axum](https://github.com/tokio-rs/axum). Handlers live in [`api`], persistence
//! behind the [`storage::FileStorageBackend`] trait, and everything a handler needs is carried in
//! [`AppState`], constructed once from [`Config`] at startup.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use wavstore::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = wavstore::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     wavstore::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod range;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use storage::{FileStorage, LocalFileStorage};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::openapi::ApiDoc;

/// Headroom on top of `max_file_size` for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .storage(storage)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: FileStorage,
}

/// Build the application router.
///
/// The upload route gets a body limit derived from `storage.max_file_size`; oversized bodies are
/// cut off while streaming and reported as 413.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.config.storage.max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/upload/",
            post(api::handlers::audio::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/download/{filename}", get(api::handlers::audio::download_file))
        .route("/stream/{filename}", get(api::handlers::audio::stream_file))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns the router and configuration.
///
/// 1. **Create**: [`Application::new`] opens the storage directory (creating it if absent) and
///    builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting wavstore with configuration: {:#?}", config);

        let storage = LocalFileStorage::open(&config.storage.directory).await?;
        info!("Storing files in {}", config.storage.directory.display());

        let app_state = AppState::builder().config(config.clone()).storage(storage).build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "wavstore listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

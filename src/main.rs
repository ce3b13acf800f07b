//! multipart-receiver server binary.
//!
//! Serves the embedded upload form and accepts multipart uploads into a
//! target directory, deduplicating by content hash. The main entry point
//! prepares the directories, builds the Axum router and runs the HTTP
//! listener until a termination signal arrives.

mod atomic;
mod background;
mod config;
mod digest;
mod error;
mod frontend;
mod http;
mod locking;
mod logging;
mod storage;
mod upload;
mod version;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::middleware;
use axum::routing::get;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::{fs, signal};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::frontend::{EmbeddedAssets, SharedAssets};
use crate::http::{build_cors_layer, client_ip};
use crate::storage::Storage;
use crate::upload::Uploader;

shadow!(build);

/// Starts the receiver and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let temp_dir = args.temp_dir();
    let storage = Storage::new(args.target_dir()?);
    info!(
        temp_dir = ?temp_dir,
        target_dir = ?storage.root_path(),
        "ensuring tmp and data directories"
    );
    fs::create_dir_all(&temp_dir).await?;
    storage.ensure_root().await?;

    let uploader = Arc::new(Uploader::new(
        temp_dir,
        storage,
        Duration::from_secs(args.lock_timeout_secs),
    ));
    spawn_background_tasks(
        uploader.temp_dir().to_path_buf(),
        Duration::from_secs(args.temp_ttl_secs),
    );

    let assets: SharedAssets = Arc::new(EmbeddedAssets);
    let mut app = build_router(uploader, assets);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Starting server. Listening on http://{}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

/// Registers the routes and shared state.
pub(crate) fn build_router(uploader: Arc<Uploader>, assets: SharedAssets) -> Router {
    Router::new()
        .route(
            "/upload",
            get(frontend::upload_form)
                .post(upload::receive_upload)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/version", get(version::get_version_info))
        .fallback(frontend::serve_asset)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = %client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(uploader))
        .layer(Extension(assets))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}

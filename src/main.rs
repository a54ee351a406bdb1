//! Notebook cells server.
//!
//! Serves the contents API, cell rendering and toolbar definitions for the
//! notebook front end. The modules live in the library crate:
//!
//! - `cells`: cell lifecycle, attachments and JSON round trip
//! - `markdown` / `math`: the Markdown rendering pipeline
//! - `notebook` / `toolbar`: the document and its actions
//! - `contents`: notebooks and files on disk
//! - `handlers`: HTTP route handlers

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notebook_cells::{handlers, AppState, Config};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr.clone();
    let static_dir = config.static_dir.clone();

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "failed to open notebook directory");
            std::process::exit(1);
        }
    };

    let mut app = Router::new()
        // Contents routes
        .route(
            "/api/contents",
            get(handlers::get_root_contents).post(handlers::create_root_contents),
        )
        .route(
            "/api/contents/{*path}",
            get(handlers::get_contents)
                .put(handlers::save_contents)
                .patch(handlers::rename_contents)
                .post(handlers::create_contents)
                .delete(handlers::delete_contents),
        )
        // Version routes
        .route(
            "/api/versions/{*path}",
            get(handlers::get_versions)
                .post(handlers::create_version)
                .put(handlers::reset_version),
        )
        .route("/api/version-diff/{*path}", get(handlers::version_diff))
        // Cell routes
        .route("/api/cells/render", post(handlers::render_cell))
        .route("/api/cells/serialize", post(handlers::serialize_cell))
        .route("/api/toolbar", get(handlers::toolbars))
        .with_state(state.clone());

    if let Some(dir) = &static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    info!("Notebook server running at http://{}", bind_addr);
    info!(dir = %state.contents.root().display(), "serving notebooks");
    if let Some(dir) = &static_dir {
        info!(dir = %dir.display(), "serving static assets");
    }
    if state.config.git_available {
        info!("Version management: ENABLED");
    } else {
        info!("Version management: DISABLED (set NOTEBOOK_GIT_AVAILABLE=1 to enable)");
    }

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
    }
}

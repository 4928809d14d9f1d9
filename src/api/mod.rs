//! Control API (C12): an axum router exposing the runtime's subsystems over
//! REST, gated by an optional bearer token.

pub mod auth;
pub mod routes;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::runtime::Runtime;

pub fn build_router(runtime: Arc<Runtime>, assets_dir: Option<std::path::PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/status", get(routes::status))
        .route("/config", get(routes::get_config).put(routes::put_config).post(routes::put_config))
        .route("/time", post(routes::set_time))
        .route("/wifi/scan", get(routes::wifi_scan))
        .route("/can/stats", get(routes::can_stats))
        .route("/storage/stats", get(routes::storage_stats))
        .route("/buffers", get(routes::buffers))
        .route("/files", get(routes::list_files))
        .route("/files/:id/download", get(routes::download_file))
        .route("/files/:id/mark_downloaded", post(routes::mark_downloaded))
        .route("/files/:id/delete", post(routes::delete_file))
        .route("/control/start_logging", post(routes::start_logging))
        .route("/control/stop_logging", post(routes::stop_logging))
        .route("/control/close_active_file", post(routes::close_active_file))
        .layer(middleware::from_fn_with_state(runtime.clone(), auth::require_token))
        .layer(cors)
        .with_state(runtime);

    let mut router = Router::new().nest("/api", api);
    if let Some(dir) = assets_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeOptions};

    fn runtime() -> Arc<Runtime> {
        let dir = tempfile::tempdir().unwrap();
        let opts = RuntimeOptions {
            storage_root: dir.path().to_path_buf(),
            config_path: dir.path().join("config.bin"),
            virtual_capacity_bytes: Some(1024 * 1024),
        };
        std::mem::forget(dir);
        Runtime::new(opts).unwrap()
    }

    #[test]
    fn router_builds_without_panicking() {
        let _ = build_router(runtime(), None);
    }
}

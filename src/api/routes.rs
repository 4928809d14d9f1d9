//! REST handlers. Thin by design: each one calls into the [`Runtime`] and
//! serializes the result, keeping protocol framing separate from the
//! subsystems it exposes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::StatusEntry;
use crate::config::Config;
use crate::runtime::Runtime;

type RuntimeState = State<Arc<Runtime>>;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[derive(Serialize)]
pub struct StatusResponse {
    uptime_sec: u64,
    server_time: String,
    wifi_connected: bool,
    ip: Option<String>,
    ssid: Option<String>,
    logging: LoggingStatus,
    storage: crate::stats::StorageStats,
    can: Vec<crate::stats::CanBusStats>,
}

#[derive(Serialize)]
pub struct LoggingStatus {
    started: bool,
}

pub async fn status(State(runtime): RuntimeState) -> Response {
    let storage = match runtime.storage_stats() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let started = runtime
        .writer
        .buses()
        .iter()
        .any(|b| b.is_enabled());

    let wall_ms = runtime.time.now_wall_ms();
    let server_time = chrono::DateTime::from_timestamp_millis(wall_ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    let body = StatusResponse {
        uptime_sec: runtime.time.now_us() / 1_000_000,
        server_time,
        wifi_connected: runtime.supervisor.is_connected(),
        ip: runtime.supervisor.ip().map(|ip| ip.to_string()),
        ssid: runtime.supervisor.ssid(),
        logging: LoggingStatus { started },
        storage,
        can: runtime.can_stats(),
    };
    Json(body).into_response()
}

pub async fn get_config(State(runtime): RuntimeState) -> Response {
    Json(runtime.config_snapshot().as_ref().clone()).into_response()
}

pub async fn put_config(State(runtime): RuntimeState, Json(config): Json<Config>) -> Response {
    match runtime.apply_config(config) {
        Ok(()) => {
            runtime
                .supervisor
                .on_disconnected(); // force re-association against the new Wi-Fi settings
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct SetTimeRequest {
    epoch: u64,
}

pub async fn set_time(State(runtime): RuntimeState, Json(req): Json<SetTimeRequest>) -> Response {
    runtime.set_wall_seconds(req.epoch);
    StatusCode::OK.into_response()
}

pub async fn wifi_scan(State(runtime): RuntimeState) -> Response {
    Json(runtime.supervisor.scan_results()).into_response()
}

pub async fn can_stats(State(runtime): RuntimeState) -> Response {
    Json(runtime.can_stats()).into_response()
}

pub async fn storage_stats(State(runtime): RuntimeState) -> Response {
    match runtime.storage_stats() {
        Ok(s) => Json(s).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn buffers(State(runtime): RuntimeState) -> Response {
    Json(runtime.writer_stats()).into_response()
}

pub async fn list_files(State(runtime): RuntimeState) -> Response {
    Json(runtime.catalog.entries()).into_response()
}

fn find_entry_by_id(entries: &[StatusEntry], id: &str) -> Option<StatusEntry> {
    entries.iter().find(|e| e.path.trim_start_matches('/') == id || e.path == id).cloned()
}

pub async fn download_file(State(runtime): RuntimeState, Path(id): Path<String>) -> Response {
    let entries = runtime.catalog.entries();
    let Some(entry) = find_entry_by_id(&entries, &id) else {
        return error_response(StatusCode::NOT_FOUND, "file not found");
    };
    let full_path = runtime.storage.resolve(&entry.path);
    match tokio::fs::read(&full_path).await {
        Ok(bytes) => {
            runtime.catalog.mark_downloaded(&entry.path);
            let filename = entry.path.trim_start_matches('/').to_string();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                )
                .body(Body::from(bytes))
                .unwrap()
        }
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

pub async fn mark_downloaded(State(runtime): RuntimeState, Path(id): Path<String>) -> Response {
    let entries = runtime.catalog.entries();
    let Some(entry) = find_entry_by_id(&entries, &id) else {
        return error_response(StatusCode::NOT_FOUND, "file not found");
    };
    runtime.catalog.mark_downloaded(&entry.path);
    StatusCode::OK.into_response()
}

pub async fn delete_file(State(runtime): RuntimeState, Path(id): Path<String>) -> Response {
    let entries = runtime.catalog.entries();
    let Some(entry) = find_entry_by_id(&entries, &id) else {
        return error_response(StatusCode::NOT_FOUND, "file not found");
    };
    if entry.is_active() {
        return error_response(StatusCode::BAD_REQUEST, "cannot delete an active file");
    }
    let _ = runtime.storage.remove(&entry.path);
    runtime.catalog.remove(&entry.path);
    StatusCode::OK.into_response()
}

pub async fn start_logging(State(runtime): RuntimeState) -> Response {
    runtime.start_logging();
    StatusCode::OK.into_response()
}

pub async fn stop_logging(State(runtime): RuntimeState) -> Response {
    runtime.stop_logging();
    StatusCode::OK.into_response()
}

pub async fn close_active_file(State(runtime): RuntimeState) -> Response {
    runtime.close_active_files();
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StatusEntry, FLAG_ACTIVE};

    fn entry(path: &str, flags: u8) -> StatusEntry {
        StatusEntry {
            path: path.to_string(),
            bus_id: 0,
            start_ms: 0,
            end_ms: 0,
            size_bytes: 0,
            crc32: 0,
            flags,
        }
    }

    #[test]
    fn find_entry_by_id_matches_with_or_without_leading_slash() {
        let entries = vec![entry("/log_1_bus1_can1.sav", 0)];
        assert!(find_entry_by_id(&entries, "log_1_bus1_can1.sav").is_some());
        assert!(find_entry_by_id(&entries, "/log_1_bus1_can1.sav").is_some());
        assert!(find_entry_by_id(&entries, "nope.sav").is_none());
    }

    #[test]
    fn active_flag_is_detected_for_delete_guard() {
        let e = entry("/a.sav", FLAG_ACTIVE);
        assert!(e.is_active());
    }
}

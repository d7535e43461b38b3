//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::audio::device::{list_output_devices, AudioDeviceInfo};
use crate::session::{Capability, PipelineStats, SessionInfo};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Pipeline status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub stats: PipelineStats,
    pub uptime_seconds: u64,
}

/// Get counters
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        stats: state.sessions.stats(),
        uptime_seconds: state.started.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Get available output devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = tokio::task::spawn_blocking(list_output_devices)
        .await
        .unwrap_or_default();
    Json(ApiResponse::ok(devices))
}

/// Get all sessions
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<SessionInfo>>> {
    Json(ApiResponse::ok(state.sessions.sessions()))
}

/// Get one session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> (StatusCode, Json<ApiResponse<SessionInfo>>) {
    match state.sessions.session_info(id) {
        Some(info) => (StatusCode::OK, Json(ApiResponse::ok(info))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session not found: {}", id))),
        ),
    }
}

/// Capability toggle body
#[derive(serde::Deserialize)]
pub struct CapabilityRequest {
    pub enabled: bool,
}

fn set_capability(
    state: &AppState,
    id: u64,
    capability: Capability,
    enabled: bool,
) -> (StatusCode, Json<ApiResponse<()>>) {
    if state.sessions.set_capability(id, capability, enabled) {
        (StatusCode::OK, Json(ApiResponse::ok(())))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session not found: {}", id))),
        )
    }
}

pub async fn set_listen(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<CapabilityRequest>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    set_capability(&state, id, Capability::Listen, req.enabled)
}

pub async fn set_save(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<CapabilityRequest>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    set_capability(&state, id, Capability::Save, req.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::{OutputFactory, OutputHandle, SessionOutput};
    use crate::error::AudioError;
    use crate::session::SessionManager;
    use crate::ui::server::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct NullHandle;

    impl OutputHandle for NullHandle {
        fn is_running(&self) -> bool {
            true
        }
    }

    struct NullOutputFactory;

    impl OutputFactory for NullOutputFactory {
        fn open(&self, _output: SessionOutput) -> Result<Box<dyn OutputHandle>, AudioError> {
            Ok(Box::new(NullHandle))
        }
    }

    fn state() -> Arc<AppState> {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(NullOutputFactory),
            std::env::temp_dir(),
        ));
        Arc::new(AppState::new(sessions))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_counters() {
        let state = state();
        state.sessions.ensure_session(3);

        let response = router(state)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["sessions"], 1);
        assert_eq!(json["data"]["decoded_frames"], 0);
        assert_eq!(json["data"]["decode_errors"], 0);
    }

    #[tokio::test]
    async fn test_toggle_listen() {
        let state = state();
        state.sessions.ensure_session(3);

        let response = router(state.clone())
            .oneshot(
                Request::put("/api/sessions/3/listen")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let info = state.sessions.session_info(3).unwrap();
        assert!(info.listen);
        assert!(!info.save);
    }

    #[tokio::test]
    async fn test_toggle_unknown_session_is_404() {
        let response = router(state())
            .oneshot(
                Request::put("/api/sessions/99/save")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let state = state();
        state.sessions.ensure_session(9);
        state.sessions.ensure_session(7);

        let response = router(state)
            .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        let ids: Vec<u64> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![7, 9]);
    }
}

use axum::{
    Json, Router,
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

use super::heartbeat::HeartbeatMonitor;
use super::store::RegistryStore;
use super::types::Registration;

// HTTP 处理函数共享的状态
#[derive(Debug, Clone)]
pub struct RegistryState {
    pub store: Arc<RegistryStore>,
    pub monitor: Arc<HeartbeatMonitor>,
}

pub fn create_router(state: RegistryState) -> Router {
    Router::new()
        .route("/services", post(register).delete(deregister).get(list))
        .route("/services/providers", get(providers))
        .with_state(state)
}

// POST /services：请求体为 JSON 格式的注册信息
async fn register(State(state): State<RegistryState>, body: Bytes) -> StatusCode {
    let reg: Registration = match serde_json::from_slice(&body) {
        Ok(reg) => reg,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed registration body");
            return StatusCode::BAD_REQUEST;
        }
    };

    // 被心跳摘除后自行重新注册的服务同样可能错过了撤销
    let result = if state.monitor.forget(&reg.service_url) {
        state.store.readmit(reg).await
    } else {
        state.store.add(reg).await
    };
    match result {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Registration completed with errors");
            StatusCode::BAD_REQUEST
        }
    }
}

// DELETE /services：请求体为纯文本的 ServiceURL
async fn deregister(State(state): State<RegistryState>, body: Bytes) -> StatusCode {
    let url = match String::from_utf8(body.to_vec()) {
        Ok(url) => url.trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read deregistration body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    tracing::info!(url = %url, "Removing service");
    let was_evicted = state.monitor.forget(&url);
    match state.store.remove(&url).await {
        Ok(_) => StatusCode::OK,
        // 心跳已经摘除过，注销视为成功
        Err(e) if e.is_not_found() && was_evicted => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to remove service");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn list(State(state): State<RegistryState>) -> Json<Vec<Registration>> {
    Json(state.store.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct ProvidersQuery {
    url: String,
}

// GET /services/providers?url=...：依赖方发现序号缺口后用来重新同步
async fn providers(State(state): State<RegistryState>, Query(query): Query<ProvidersQuery>) -> Response {
    match state.store.provider_snapshot(&query.url).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            tracing::debug!(url = %query.url, error = %e, "Provider snapshot unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

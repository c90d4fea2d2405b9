use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use bytes::Bytes;
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{ClientError, ProviderCache, RegistryClient};
use crate::services::registry::{Patch, Registration, ServiceName};

const MAX_RESYNC_ATTEMPTS: u32 = 3;

// 更新与心跳处理函数共享的状态
#[derive(Debug, Clone)]
struct DependentState {
    cache: Arc<ProviderCache>,
    client: RegistryClient,
    service_url: String,
    resyncing: Arc<AtomicBool>,
    task_tracker: TaskTracker,
}

/// 一个已注册的服务进程。
///
/// 负责对外提供心跳和补丁接收接口、向注册中心注册，并在关闭时注销。
#[derive(Debug)]
pub struct ServiceHost {
    registration: Registration,
    client: RegistryClient,
    cache: Arc<ProviderCache>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task_tracker: TaskTracker,
}

impl ServiceHost {
    /// 绑定 `host:port` 后启动，见 [`ServiceHost::start`]
    pub async fn bind(
        host: &str,
        port: u16,
        registration: Registration,
        routes: Router,
        client: RegistryClient,
    ) -> Result<Self, ClientError> {
        let listener = TcpListener::bind((host, port)).await?;
        Self::start(listener, registration, routes, client).await
    }

    /// 在 `listener` 上提供 `routes` 以及注册信息中声明的心跳、更新接口，然后向注册中心注册。
    /// 注册失败时服务器会被关闭并返回错误。
    pub async fn start(
        listener: TcpListener,
        registration: Registration,
        routes: Router,
        client: RegistryClient,
    ) -> Result<Self, ClientError> {
        let heartbeat_path = url_path(&registration.heartbeat_url)?;
        let update_path = url_path(&registration.service_update_url)?;
        if heartbeat_path == update_path {
            return Err(ClientError::InvalidUrl {
                url: registration.heartbeat_url.clone(),
                reason: "heartbeat and update endpoints share a path".to_string(),
            });
        }

        let cache = Arc::new(ProviderCache::new());
        let task_tracker = TaskTracker::new();
        let state = DependentState {
            cache: cache.clone(),
            client: client.clone(),
            service_url: registration.service_url.clone(),
            resyncing: Arc::new(AtomicBool::new(false)),
            task_tracker: task_tracker.clone(),
        };
        let app = routes.merge(
            Router::new()
                .route(&heartbeat_path, get(heartbeat))
                .route(&update_path, post(receive_patch))
                .with_state(state),
        );

        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let service_name = registration.service_name;
        task_tracker.spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(service_name = %service_name, error = %e, "Service server stopped with error");
            }
        });

        if let Err(e) = client.register(&registration).await {
            // 注册中心已应答时注册信息可能已被保留，撤回后再关闭
            if matches!(e, ClientError::Status { .. }) {
                if let Err(deregister_err) = client.deregister(&registration.service_url).await {
                    tracing::warn!(error = %deregister_err, "Failed to withdraw rejected registration");
                }
            }
            shutdown.cancel();
            task_tracker.close();
            task_tracker.wait().await;
            return Err(e);
        }

        tracing::info!(
            service_name = %registration.service_name,
            local_addr = %local_addr,
            "Service started"
        );

        Ok(Self {
            registration,
            client,
            cache,
            local_addr,
            shutdown,
            task_tracker,
        })
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cache(&self) -> &Arc<ProviderCache> {
        &self.cache
    }

    // 服务停止时被取消
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn provider(&self, name: ServiceName) -> Result<String, ClientError> {
        self.cache.get(name).await
    }

    /// 向注册中心注销并优雅关闭服务器；注销失败也会关闭服务器
    pub async fn shutdown(self) -> Result<(), ClientError> {
        let result = self.client.deregister(&self.registration.service_url).await;
        if let Err(ref e) = result {
            tracing::warn!(error = %e, "Failed to deregister service");
        }

        self.shutdown.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        tracing::info!(service_name = %self.registration.service_name, "Service stopped");
        result
    }
}

fn url_path(url: &str) -> Result<String, ClientError> {
    reqwest::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .map_err(|e| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn receive_patch(State(state): State<DependentState>, body: Bytes) -> StatusCode {
    let patch: Patch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed patch body");
            return StatusCode::BAD_REQUEST;
        }
    };

    let outcome = state.cache.update(&patch).await;
    tracing::debug!(
        sequence = patch.sequence,
        added = patch.added.len(),
        removed = patch.removed.len(),
        outcome = ?outcome,
        "Update received"
    );

    if outcome.needs_resync() && !state.resyncing.swap(true, Ordering::SeqCst) {
        tracing::info!(outcome = ?outcome, "Patch sequence broken, resyncing providers");
        let tracker = state.task_tracker.clone();
        tracker.spawn(resync(state));
    }

    StatusCode::OK
}

async fn resync(state: DependentState) {
    for attempt in 1..=MAX_RESYNC_ATTEMPTS {
        match state.client.fetch_providers(&state.service_url).await {
            Ok(snapshot) => {
                if state.cache.replace(&snapshot).await {
                    break;
                }
                tracing::debug!(attempt, "Snapshot older than applied patches, retrying");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to resync providers");
                break;
            }
        }
    }
    state.resyncing.store(false, Ordering::SeqCst);
}

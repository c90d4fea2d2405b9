use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::services::registry::{HeartbeatMonitor, RegistryState, RegistryStore, create_router};

// 按配置创建注册表和心跳监控器（尚未启动）
pub fn build_state(config: &Config) -> Result<RegistryState, reqwest::Error> {
    let client = config.http_client()?;
    let store = Arc::new(RegistryStore::new(client.clone()));
    let monitor = Arc::new(HeartbeatMonitor::new(
        store.clone(),
        client,
        config.heartbeat_config(),
    ));
    Ok(RegistryState { store, monitor })
}

/// 在 `listener` 上提供注册接口，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: RegistryState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.listen_addr()?;

    // 初始化服务注册表与心跳检测
    let state = build_state(&config)?;
    state.monitor.start();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, registry_id = %state.store.notifier().registry_id(), "Registry server listening");

    serve(listener, state.clone(), shutdown_signal()).await?;

    // 等待进行中的一轮心跳结束
    state.monitor.shutdown().await;
    tracing::info!("Shutting down registry service");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

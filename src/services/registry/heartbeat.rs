use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::store::RegistryStore;
use super::types::Registration;

// 心跳检测配置
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub retry_interval: Duration,
    // 被摘除的服务在之后多少轮内继续探测
    pub recovery_cycles: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
            recovery_cycles: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct Evicted {
    registration: Registration,
    cycles_left: u32,
}

/// 周期性探测所有已注册服务的心跳地址。
///
/// 每一轮并发探测全部服务，等本轮全部结束后再休眠 `interval`。
/// 探测失败通过 `RegistryStore::remove` 摘除，恢复后通过 `RegistryStore::add` 重新加入。
#[derive(Debug)]
pub struct HeartbeatMonitor {
    store: Arc<RegistryStore>,
    client: reqwest::Client,
    config: HeartbeatConfig,
    // ServiceURL -> 被心跳摘除、仍在等待恢复的注册信息
    evicted: DashMap<String, Evicted>,
    started: AtomicBool,
    task_tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl HeartbeatMonitor {
    pub fn new(store: Arc<RegistryStore>, client: reqwest::Client, config: HeartbeatConfig) -> Self {
        Self {
            store,
            client,
            config,
            evicted: DashMap::new(),
            started: AtomicBool::new(false),
            task_tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 启动后台循环，每个实例只会启动一次；返回本次调用是否真正启动了循环
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Heartbeat monitor already running");
            return false;
        }

        let monitor = Arc::clone(self);
        self.task_tracker.spawn(async move {
            monitor.run().await;
        });
        true
    }

    // 不会打断进行中的一轮，只是不再开始下一轮
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// 服务主动注销时调用，避免之后被心跳恢复逻辑重新加入
    pub fn forget(&self, service_url: &str) -> bool {
        let forgotten = self.evicted.remove(service_url).is_some();
        if forgotten {
            tracing::debug!(url = %service_url, "Dropped evicted service from recovery list");
        }
        forgotten
    }

    pub fn is_evicted(&self, service_url: &str) -> bool {
        self.evicted.contains_key(service_url)
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    async fn run(&self) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Heartbeat monitor started"
        );

        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Heartbeat monitor stopped");
    }

    /// 执行一轮检测：并发探测所有在册服务和待恢复服务，全部结束后返回
    pub async fn run_cycle(&self) {
        let live = self.store.snapshot().await;

        // 已经重新注册的服务不再算作待恢复
        self.evicted
            .retain(|url, _| !live.iter().any(|reg| &reg.service_url == url));
        let suspended: Vec<Registration> = self
            .evicted
            .iter()
            .map(|entry| entry.value().registration.clone())
            .collect();

        tracing::debug!(
            live = live.len(),
            suspended = suspended.len(),
            "Executing heartbeat cycle..."
        );

        let checks = live
            .into_iter()
            .map(|reg| (reg, false))
            .chain(suspended.into_iter().map(|reg| (reg, true)))
            .map(|(reg, previously_evicted)| self.check(reg, previously_evicted));
        join_all(checks).await;
    }

    async fn check(&self, reg: Registration, previously_evicted: bool) {
        let mut removed = previously_evicted;

        for attempt in 1..=self.config.max_attempts {
            if self.probe(&reg).await {
                tracing::debug!(
                    service_name = %reg.service_name,
                    url = %reg.service_url,
                    "Heartbeat check passed"
                );
                if removed {
                    self.restore(reg).await;
                }
                return;
            }

            tracing::warn!(
                service_name = %reg.service_name,
                url = %reg.service_url,
                attempt,
                "Heartbeat check failed"
            );

            // 只有窗口内第一次失败会摘除服务
            if !removed {
                match self.store.remove(&reg.service_url).await {
                    Ok(_) => {
                        removed = true;
                        self.evicted.insert(
                            reg.service_url.clone(),
                            Evicted {
                                registration: reg.clone(),
                                cycles_left: self.config.recovery_cycles,
                            },
                        );
                    }
                    Err(e) => {
                        // 已被主动注销，不再探测
                        tracing::debug!(url = %reg.service_url, error = %e, "Service already gone");
                        return;
                    }
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }

        let exhausted = if previously_evicted {
            self.evicted
                .get_mut(&reg.service_url)
                .map(|mut entry| {
                    entry.cycles_left = entry.cycles_left.saturating_sub(1);
                    entry.cycles_left == 0
                })
                .unwrap_or(false)
        } else {
            self.config.recovery_cycles == 0
        };

        if exhausted && self.evicted.remove(&reg.service_url).is_some() {
            tracing::info!(
                service_name = %reg.service_name,
                url = %reg.service_url,
                "Service did not recover, giving up"
            );
        }
    }

    async fn probe(&self, reg: &Registration) -> bool {
        match self.client.get(&reg.heartbeat_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %reg.heartbeat_url, error = %e, "Heartbeat probe error");
                false
            }
        }
    }

    async fn restore(&self, reg: Registration) {
        // 期间被主动注销过的服务不恢复
        if self.evicted.remove(&reg.service_url).is_none() {
            return;
        }

        tracing::info!(
            service_name = %reg.service_name,
            url = %reg.service_url,
            "Service recovered, re-registering"
        );
        if let Err(e) = self.store.readmit(reg).await {
            tracing::warn!(error = %e, "Re-registration after recovery had delivery failures");
        }
    }
}

use rand::seq::IndexedRandom;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::ClientError;
use crate::services::registry::{Patch, PatchEntry, ProviderSnapshot, ServiceName};

/// 应用补丁的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// 序号连续，已应用
    Applied,
    /// 未编号的补丁，直接应用
    Unversioned,
    /// 序号不大于已应用的序号，已忽略
    Stale { last: u64, received: u64 },
    /// 序号不连续，已应用但需要重新同步
    Gap { expected: u64, received: u64 },
    /// 注册中心实例发生变化（例如重启），已应用但需要重新同步
    RegistryChanged,
}

impl PatchOutcome {
    pub fn needs_resync(&self) -> bool {
        matches!(self, PatchOutcome::Gap { .. } | PatchOutcome::RegistryChanged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    registry_id: Uuid,
    last: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    services: HashMap<ServiceName, Vec<String>>,
    cursor: Option<Cursor>,
}

impl CacheState {
    fn insert(&mut self, entry: &PatchEntry) {
        let urls = self.services.entry(entry.name).or_default();
        if !urls.contains(&entry.url) {
            urls.push(entry.url.clone());
        }
    }

    fn remove(&mut self, entry: &PatchEntry) {
        if let Some(urls) = self.services.get_mut(&entry.name) {
            if let Some(index) = urls.iter().position(|url| url == &entry.url) {
                urls.remove(index);
            }
            if urls.is_empty() {
                self.services.remove(&entry.name);
            }
        }
    }
}

/// 服务进程本地的提供者缓存（服务名 -> 提供者地址列表），只通过补丁修改
#[derive(Debug, Default)]
pub struct ProviderCache {
    state: RwLock<CacheState>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用补丁：先处理新增（按 (服务名, 地址) 去重），再处理删除（删除第一个匹配项）
    pub async fn update(&self, patch: &Patch) -> PatchOutcome {
        let mut state = self.state.write().await;

        let outcome = match patch.registry_id {
            Some(registry_id) if patch.sequence > 0 => {
                let outcome = match state.cursor {
                    Some(cursor) if cursor.registry_id != registry_id => PatchOutcome::RegistryChanged,
                    Some(cursor) if patch.sequence <= cursor.last => {
                        return PatchOutcome::Stale {
                            last: cursor.last,
                            received: patch.sequence,
                        };
                    }
                    Some(cursor) if patch.sequence == cursor.last + 1 => PatchOutcome::Applied,
                    Some(cursor) => PatchOutcome::Gap {
                        expected: cursor.last + 1,
                        received: patch.sequence,
                    },
                    None if patch.sequence == 1 => PatchOutcome::Applied,
                    // 第一个收到的补丁不是 1 号，可能漏掉了追赶补丁
                    None => PatchOutcome::Gap {
                        expected: 1,
                        received: patch.sequence,
                    },
                };
                state.cursor = Some(Cursor {
                    registry_id,
                    last: patch.sequence,
                });
                outcome
            }
            _ => PatchOutcome::Unversioned,
        };

        for entry in &patch.added {
            state.insert(entry);
        }
        for entry in &patch.removed {
            state.remove(entry);
        }

        outcome
    }

    /// 用注册中心给出的完整视图替换所依赖服务的提供者列表。
    ///
    /// 返回 `false` 表示快照比已应用的补丁更旧，此时缓存保持不变，调用方应再次同步。
    pub async fn replace(&self, snapshot: &ProviderSnapshot) -> bool {
        let mut state = self.state.write().await;

        let complete = match state.cursor {
            Some(cursor) if cursor.registry_id == snapshot.registry_id => snapshot.sequence >= cursor.last,
            _ => true,
        };
        if !complete {
            tracing::debug!(sequence = snapshot.sequence, "Ignoring snapshot older than applied patches");
            return false;
        }

        for name in &snapshot.required_services {
            state.services.remove(name);
        }
        for entry in &snapshot.providers {
            state.insert(entry);
        }
        state.cursor = Some(Cursor {
            registry_id: snapshot.registry_id,
            last: snapshot.sequence,
        });

        tracing::debug!(
            sequence = snapshot.sequence,
            providers = snapshot.providers.len(),
            "Replaced provider cache from registry snapshot"
        );
        true
    }

    /// 随机选择一个提供者
    pub async fn get(&self, name: ServiceName) -> Result<String, ClientError> {
        let state = self.state.read().await;
        state
            .services
            .get(&name)
            .and_then(|urls| urls.choose(&mut rand::rng()))
            .cloned()
            .ok_or(ClientError::NoProviders(name))
    }

    // 按线上名称（例如 "LogService"）查找
    pub async fn get_named(&self, name: &str) -> Result<String, ClientError> {
        let name = name
            .parse::<ServiceName>()
            .map_err(|_| ClientError::UnknownService(name.to_string()))?;
        self.get(name).await
    }

    pub async fn providers(&self, name: ServiceName) -> Vec<String> {
        let state = self.state.read().await;
        state.services.get(&name).cloned().unwrap_or_default()
    }

    pub async fn last_sequence(&self) -> Option<u64> {
        self.state.read().await.cursor.map(|cursor| cursor.last)
    }
}

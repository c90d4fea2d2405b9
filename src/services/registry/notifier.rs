use dashmap::DashMap;
use futures::future::join_all;
use uuid::Uuid;

use super::error::RegistryError;
use super::types::{Patch, Registration};

// 一次广播的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 向依赖方推送变更。
///
/// 每个依赖方（按 ServiceUpdateURL 区分）拥有独立递增的序号，投递失败也会消耗序号，
/// 依赖方据此发现缺口并主动重新同步。
#[derive(Debug)]
pub struct Notifier {
    registry_id: Uuid,
    client: reqwest::Client,
    // ServiceUpdateURL -> 最近一次分配的序号
    sequences: DashMap<String, u64>,
}

impl Notifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            registry_id: Uuid::new_v4(),
            client,
            sequences: DashMap::new(),
        }
    }

    pub fn registry_id(&self) -> Uuid {
        self.registry_id
    }

    pub fn current_sequence(&self, update_url: &str) -> u64 {
        self.sequences.get(update_url).map(|seq| *seq).unwrap_or(0)
    }

    fn next_sequence(&self, update_url: &str) -> u64 {
        let mut seq = self.sequences.entry(update_url.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    // 消耗一个序号但不投递，下一次投递在依赖方看来就是缺口
    pub fn skip_sequence(&self, update_url: &str) -> u64 {
        let skipped = self.next_sequence(update_url);
        tracing::debug!(url = %update_url, skipped, "Skipped patch sequence");
        skipped
    }

    // 给补丁编号并以 JSON POST 投递，返回使用的序号
    pub async fn send_patch(&self, mut patch: Patch, update_url: &str) -> Result<u64, RegistryError> {
        patch.registry_id = Some(self.registry_id);
        patch.sequence = self.next_sequence(update_url);

        let response = self
            .client
            .post(update_url)
            .json(&patch)
            .send()
            .await
            .map_err(|source| RegistryError::Delivery {
                url: update_url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RegistryError::Rejected {
                url: update_url.to_string(),
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(
            url = %update_url,
            sequence = patch.sequence,
            added = patch.added.len(),
            removed = patch.removed.len(),
            "Delivered patch"
        );
        Ok(patch.sequence)
    }

    /// 按依赖关系过滤 `full_patch` 并并发投递给 `targets`。
    /// 单个依赖方失败只记录日志，不影响其他依赖方，也不重试。
    pub async fn notify(&self, full_patch: &Patch, targets: &[Registration]) -> NotifyReport {
        let deliveries = targets
            .iter()
            .filter_map(|reg| {
                let patch = full_patch.filter_for(&reg.required_services);
                (!patch.is_empty()).then_some((reg, patch))
            })
            .map(|(reg, patch)| async move {
                match self.send_patch(patch, &reg.service_update_url).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            service_name = %reg.service_name,
                            url = %reg.service_update_url,
                            error = %e,
                            "Failed to notify dependent"
                        );
                        false
                    }
                }
            });

        let results = join_all(deliveries).await;
        let delivered = results.iter().filter(|ok| **ok).count();
        NotifyReport {
            delivered,
            failed: results.len() - delivered,
        }
    }
}

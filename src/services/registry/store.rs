use tokio::sync::RwLock;

use super::error::RegistryError;
use super::notifier::Notifier;
use super::types::{Patch, PatchEntry, ProviderSnapshot, Registration, ServiceName};

/// 注册中心的权威注册表。
///
/// 结构性修改只在写锁内完成；所有网络调用都在释放锁之后进行，
/// 调用方需要容忍略微过期的快照。
#[derive(Debug)]
pub struct RegistryStore {
    registrations: RwLock<Vec<Registration>>,
    notifier: Notifier,
}

impl RegistryStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            notifier: Notifier::new(client),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn snapshot(&self) -> Vec<Registration> {
        self.registrations.read().await.clone()
    }

    pub async fn get(&self, service_url: &str) -> Option<Registration> {
        self.registrations
            .read()
            .await
            .iter()
            .find(|reg| reg.service_url == service_url)
            .cloned()
    }

    pub async fn contains(&self, service_url: &str) -> bool {
        self.get(service_url).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 添加（或按 ServiceURL 覆盖）一条注册信息，然后：
    /// 1. 把已存在的依赖提供者作为追赶补丁直接发给新服务；
    /// 2. 向所有依赖该服务的已注册服务广播新增。
    ///
    /// 任一投递失败都会返回错误，但注册信息保留。
    pub async fn add(&self, reg: Registration) -> Result<(), RegistryError> {
        self.admit(reg, false).await
    }

    /// 重新接纳一个曾被心跳摘除的服务。
    ///
    /// 摘除期间发生的撤销不会推送给它，因此先跳过一个序号再发送追赶补丁（即使为空），
    /// 依赖方据此发现缺口并拉取完整视图。
    pub async fn readmit(&self, reg: Registration) -> Result<(), RegistryError> {
        self.notifier.skip_sequence(&reg.service_update_url);
        self.admit(reg, true).await
    }

    async fn admit(&self, reg: Registration, rejoining: bool) -> Result<(), RegistryError> {
        tracing::info!(
            service_name = %reg.service_name,
            url = %reg.service_url,
            rejoining,
            "Adding service"
        );

        let previous = {
            let mut registrations = self.registrations.write().await;
            match registrations
                .iter_mut()
                .find(|existing| existing.service_url == reg.service_url)
            {
                Some(existing) => Some(std::mem::replace(existing, reg.clone())),
                None => {
                    registrations.push(reg.clone());
                    None
                }
            }
        };

        if let Some(ref previous) = previous {
            tracing::debug!(
                service_name = %previous.service_name,
                url = %previous.service_url,
                "Replaced existing registration for the same URL"
            );
        }

        let catch_up = self.send_required_services(&reg, rejoining).await;

        let mut patch = Patch::added(vec![reg.entry()]);
        // 同一地址换了服务名，旧条目需要一并撤销
        if let Some(previous) = previous.filter(|p| p.service_name != reg.service_name) {
            patch.removed.push(previous.entry());
        }
        let targets = self.snapshot().await;
        let report = self.notifier.notify(&patch, &targets).await;

        catch_up?;
        if report.failed > 0 {
            return Err(RegistryError::Broadcast {
                failed: report.failed,
            });
        }
        Ok(())
    }

    /// 删除 ServiceURL 匹配的注册信息并向剩余服务广播撤销。
    /// 广播失败只记录日志，删除本身总会完成。
    pub async fn remove(&self, service_url: &str) -> Result<Registration, RegistryError> {
        let removed = {
            let mut registrations = self.registrations.write().await;
            let index = registrations
                .iter()
                .position(|reg| reg.service_url == service_url)
                .ok_or_else(|| RegistryError::NotFound {
                    url: service_url.to_string(),
                })?;
            registrations.remove(index)
        };

        tracing::info!(
            service_name = %removed.service_name,
            url = %removed.service_url,
            "Removed service"
        );

        // 被删除的服务已不在快照中，不会收到关于自己的撤销
        let targets = self.snapshot().await;
        let report = self
            .notifier
            .notify(&Patch::removed(vec![removed.entry()]), &targets)
            .await;
        if report.failed > 0 {
            tracing::warn!(
                url = %removed.service_url,
                failed = report.failed,
                "Removal broadcast partially failed"
            );
        }

        Ok(removed)
    }

    /// 某个已注册服务当前应看到的完整提供者视图，用于依赖方重新同步
    pub async fn provider_snapshot(&self, service_url: &str) -> Result<ProviderSnapshot, RegistryError> {
        let reg = self
            .get(service_url)
            .await
            .ok_or_else(|| RegistryError::NotFound {
                url: service_url.to_string(),
            })?;

        // 先取序号再读注册表，序号不大于它的补丁所做的修改都已可见
        let sequence = self.notifier.current_sequence(&reg.service_update_url);
        let providers = {
            let registrations = self.registrations.read().await;
            collect_providers(&registrations, &reg.required_services)
        };

        Ok(ProviderSnapshot {
            registry_id: self.notifier.registry_id(),
            sequence,
            required_services: reg.required_services,
            providers,
        })
    }

    // 发送追赶补丁；`force` 时即使没有提供者也发送，用来暴露序号缺口
    async fn send_required_services(&self, reg: &Registration, force: bool) -> Result<(), RegistryError> {
        let providers = {
            let registrations = self.registrations.read().await;
            collect_providers(&registrations, &reg.required_services)
        };
        let must_send = force && !reg.required_services.is_empty();
        if providers.is_empty() && !must_send {
            return Ok(());
        }

        self.notifier
            .send_patch(Patch::added(providers), &reg.service_update_url)
            .await
            .map(|_| ())
            .map_err(|source| RegistryError::CatchUp {
                url: reg.service_update_url.clone(),
                source: Box::new(source),
            })
    }
}

fn collect_providers(registrations: &[Registration], required: &[ServiceName]) -> Vec<PatchEntry> {
    registrations
        .iter()
        .filter(|reg| required.contains(&reg.service_name))
        .map(Registration::entry)
        .collect()
}

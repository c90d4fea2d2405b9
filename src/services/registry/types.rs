use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 服务种类（编译期已知的封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceName {
    #[serde(rename = "LogService")]
    Log,
    #[serde(rename = "GradingService")]
    Grading,
    #[serde(rename = "PortalService")]
    Portal,
}

impl ServiceName {
    pub const ALL: [ServiceName; 3] = [ServiceName::Log, ServiceName::Grading, ServiceName::Portal];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Log => "LogService",
            ServiceName::Grading => "GradingService",
            ServiceName::Portal => "PortalService",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown service name: {s}"))
    }
}

// 服务注册信息，服务启动时发送给注册中心
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Registration {
    pub service_name: ServiceName,
    #[serde(rename = "ServiceURL")]
    pub service_url: String,
    #[serde(default)]
    pub required_services: Vec<ServiceName>,
    #[serde(rename = "ServiceUpdateURL")]
    pub service_update_url: String,
    #[serde(rename = "HeartbeatURL")]
    pub heartbeat_url: String,
}

impl Registration {
    /// 按约定路径（`/services`、`/heartbeat`）构造注册信息
    pub fn new(
        service_name: ServiceName,
        service_url: impl Into<String>,
        required_services: Vec<ServiceName>,
    ) -> Self {
        let service_url = service_url.into().trim_end_matches('/').to_string();
        Self {
            service_name,
            service_update_url: format!("{service_url}/services"),
            heartbeat_url: format!("{service_url}/heartbeat"),
            service_url,
            required_services: dedup_names(required_services),
        }
    }

    pub fn depends_on(&self, name: ServiceName) -> bool {
        self.required_services.contains(&name)
    }

    pub fn entry(&self) -> PatchEntry {
        PatchEntry {
            name: self.service_name,
            url: self.service_url.clone(),
        }
    }
}

// 依赖列表是有序集合，保留首次出现的顺序
fn dedup_names(names: Vec<ServiceName>) -> Vec<ServiceName> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

// 一个服务提供者实例
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchEntry {
    #[serde(rename = "Name")]
    pub name: ServiceName,
    #[serde(rename = "URL")]
    pub url: String,
}

impl PatchEntry {
    pub fn new(name: ServiceName, url: impl Into<String>) -> Self {
        Self {
            name,
            url: url.into(),
        }
    }
}

/// 提供者变更集合。
///
/// `registry_id` 和 `sequence` 由通知器在投递时填写；`sequence == 0` 表示未编号。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Patch {
    #[serde(default)]
    pub added: Vec<PatchEntry>,
    #[serde(default)]
    pub removed: Vec<PatchEntry>,
    #[serde(rename = "RegistryID", default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<Uuid>,
    #[serde(default)]
    pub sequence: u64,
}

impl Patch {
    pub fn added(entries: Vec<PatchEntry>) -> Self {
        Self {
            added: entries,
            ..Default::default()
        }
    }

    pub fn removed(entries: Vec<PatchEntry>) -> Self {
        Self {
            removed: entries,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// 只保留 `required` 中列出的服务名相关的条目
    pub fn filter_for(&self, required: &[ServiceName]) -> Patch {
        let keep = |entry: &&PatchEntry| required.contains(&entry.name);
        Patch {
            added: self.added.iter().filter(keep).cloned().collect(),
            removed: self.removed.iter().filter(keep).cloned().collect(),
            registry_id: None,
            sequence: 0,
        }
    }
}

// 重新同步时返回的完整提供者视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderSnapshot {
    #[serde(rename = "RegistryID")]
    pub registry_id: Uuid,
    pub sequence: u64,
    pub required_services: Vec<ServiceName>,
    pub providers: Vec<PatchEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_wire_format() {
        let reg = Registration::new(
            ServiceName::Grading,
            "http://localhost:6000/",
            vec![ServiceName::Log, ServiceName::Log],
        );
        let json = serde_json::to_value(&reg).unwrap();

        assert_eq!(json["ServiceName"], "GradingService");
        assert_eq!(json["ServiceURL"], "http://localhost:6000");
        assert_eq!(json["ServiceUpdateURL"], "http://localhost:6000/services");
        assert_eq!(json["HeartbeatURL"], "http://localhost:6000/heartbeat");
        assert_eq!(json["RequiredServices"], serde_json::json!(["LogService"]));
    }

    #[test]
    fn test_unknown_service_name_is_rejected() {
        let body = r#"{"ServiceName":"Nope","ServiceURL":"u","RequiredServices":[],
            "ServiceUpdateURL":"u/services","HeartbeatURL":"u/heartbeat"}"#;
        assert!(serde_json::from_str::<Registration>(body).is_err());
        assert!("Nope".parse::<ServiceName>().is_err());
        assert_eq!("LogService".parse::<ServiceName>(), Ok(ServiceName::Log));
    }

    #[test]
    fn test_filter_for_keeps_required_names_only() {
        let full = Patch {
            added: vec![
                PatchEntry::new(ServiceName::Log, "http://l1"),
                PatchEntry::new(ServiceName::Portal, "http://p1"),
            ],
            removed: vec![PatchEntry::new(ServiceName::Log, "http://l0")],
            registry_id: Some(Uuid::new_v4()),
            sequence: 7,
        };

        let filtered = full.filter_for(&[ServiceName::Log]);
        assert_eq!(filtered.added, vec![PatchEntry::new(ServiceName::Log, "http://l1")]);
        assert_eq!(filtered.removed, vec![PatchEntry::new(ServiceName::Log, "http://l0")]);
        assert_eq!(filtered.sequence, 0);

        assert!(full.filter_for(&[ServiceName::Grading]).is_empty());
        assert!(full.filter_for(&[]).is_empty());
    }

    #[test]
    fn test_unversioned_patch_decodes() {
        let patch: Patch =
            serde_json::from_str(r#"{"Added":[{"Name":"LogService","URL":"http://l"}]}"#).unwrap();
        assert_eq!(patch.sequence, 0);
        assert!(patch.registry_id.is_none());
        assert!(patch.removed.is_empty());
    }
}

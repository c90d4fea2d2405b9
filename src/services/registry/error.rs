/// 注册中心错误类型
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service at URL {url} not found")]
    NotFound { url: String },
    #[error("Failed to send catch-up patch to {url}: {source}")]
    CatchUp {
        url: String,
        #[source]
        source: Box<RegistryError>,
    },
    #[error("Broadcast failed for {failed} dependent(s)")]
    Broadcast { failed: usize },
    #[error("Failed to deliver patch to {url}: {source}")]
    Delivery {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Dependent at {url} rejected patch with status {status}")]
    Rejected { url: String, status: u16 },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

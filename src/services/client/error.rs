use crate::services::registry::ServiceName;

/// 客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to {action}. Registry service responded with code {status}")]
    Status { action: &'static str, status: u16 },
    #[error("No providers available for service {0}")]
    NoProviders(ServiceName),
    #[error("Unknown service name: {0}")]
    UnknownService(String),
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

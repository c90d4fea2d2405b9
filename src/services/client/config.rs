use std::time::Duration;

/// 注册中心客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 注册中心的 `/services` 地址
    pub registry_url: String,
    /// 默认超时时间
    pub request_timeout: Duration,
    /// 连接超时时间
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://localhost:3000/services".to_string(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
            ..Default::default()
        }
    }
}

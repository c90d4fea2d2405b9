use super::{ClientConfig, ClientError};
use crate::services::registry::{ProviderSnapshot, Registration};

/// 注册中心客户端：注册、注销以及拉取完整提供者视图
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// 便捷的创建方法，使用默认超时
    pub fn connect(registry_url: &str) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(registry_url))
    }

    pub fn registry_url(&self) -> &str {
        &self.config.registry_url
    }

    pub async fn register(&self, registration: &Registration) -> Result<(), ClientError> {
        let response = self
            .client
            .post(&self.config.registry_url)
            .json(registration)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                action: "register service",
                status: response.status().as_u16(),
            });
        }

        tracing::info!(
            service_name = %registration.service_name,
            url = %registration.service_url,
            "Registered with registry"
        );
        Ok(())
    }

    pub async fn deregister(&self, service_url: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(&self.config.registry_url)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(service_url.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                action: "deregister service",
                status: response.status().as_u16(),
            });
        }

        tracing::info!(url = %service_url, "Deregistered from registry");
        Ok(())
    }

    pub async fn fetch_providers(&self, service_url: &str) -> Result<ProviderSnapshot, ClientError> {
        let url = format!("{}/providers", self.config.registry_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[("url", service_url)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                action: "fetch providers",
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

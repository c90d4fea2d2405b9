pub mod config;
pub mod error;
pub mod provider_cache;
pub mod registry_client;
pub mod service;

pub use config::*;
pub use error::*;
pub use provider_cache::{PatchOutcome, ProviderCache};
pub use registry_client::RegistryClient;
pub use service::ServiceHost;

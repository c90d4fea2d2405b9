pub mod client;
pub mod registry;

pub use client::{ProviderCache, RegistryClient, ServiceHost};
pub use registry::{HeartbeatMonitor, Patch, PatchEntry, Registration, RegistryStore, ServiceName};

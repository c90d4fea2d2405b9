//! Registry service module
//!
//! This module contains the service registry implementation split into logical components:
//! - `types`: Data structures and wire formats
//! - `store`: The authoritative registration list
//! - `notifier`: Patch filtering and delivery to dependents
//! - `heartbeat`: Periodic health checking
//! - `http_impl`: HTTP endpoint implementation

pub mod error;
pub mod heartbeat;
pub mod http_impl;
pub mod notifier;
pub mod store;
pub mod types;

// Re-export public types for easier access
pub use error::RegistryError;
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use http_impl::{RegistryState, create_router};
pub use notifier::{Notifier, NotifyReport};
pub use store::RegistryStore;
pub use types::{Patch, PatchEntry, ProviderSnapshot, Registration, ServiceName};

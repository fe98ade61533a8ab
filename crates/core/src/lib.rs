//! Process-level plumbing shared by every engine service: the service
//! registry and the settings store.

pub mod registry;
pub mod settings;

pub use registry::{RegistryError, Service, ServiceCell, ServiceKind, ServiceRegistry};
pub use settings::{ConfigKey, ConfigValue, Settings};

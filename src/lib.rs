//! Flare Registry etcd
//!
//! Lease-backed service registration and discovery on etcd v3: providers register
//! under a prefix with an optional TTL lease, consumers list or watch a service and
//! receive aggregated endpoint snapshots including configurator entries.

pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

// Re-exports
pub use config::{LogConfig, RegistryConfig};
pub use context::RequestContext;
pub use error::{ErrorKind, RegistryError, Result};
pub use registry::{EtcdRegistry, ServiceRegistry, create_registry};
pub use store::{EtcdStore, KvStore, MemoryStore};
pub use telemetry::init_tracing;
pub use types::{
    ConsumerConfig, Endpoints, ProviderConfig, RouteConfig, ServiceInfo, ServiceKind, Upstream,
};

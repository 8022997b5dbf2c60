//! 服务注册模块
//!
//! 基于 etcd 租约的注册与摘除，治理服务额外写入指标 key。

pub mod etcd;
pub mod keys;
pub mod lease;
pub mod registrar;
pub mod trait_def;

pub use etcd::EtcdRegistry;
pub use lease::LeaseManager;
pub use registrar::Registrar;
pub use trait_def::ServiceRegistry;

use crate::config::RegistryConfig;
use crate::error::Result;

/// 创建服务注册发现实例
pub async fn create_registry(config: RegistryConfig) -> Result<Box<dyn ServiceRegistry>> {
    let registry = EtcdRegistry::connect(config).await?;
    Ok(Box::new(registry))
}

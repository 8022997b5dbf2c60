//! 注册写入
//!
//! 负责生成注册 key/value、按需绑定租约、写入存储，并记录本地已注册 key，
//! 供关闭时尽力清理。已注册表按 key 分片，插入与删除互不阻塞。

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::keys;
use super::lease::LeaseManager;
use crate::context::RequestContext;
use crate::error::{ErrorKind, RegistryError, Result};
use crate::store::KvStore;
use crate::types::ServiceInfo;

/// 注册器
pub struct Registrar {
    store: Arc<dyn KvStore>,
    leases: Arc<LeaseManager>,
    /// 已注册 key -> 最近一次写入的 value
    kvs: DashMap<String, String>,
    prefix: String,
    hostname: String,
    ttl: i64,
    read_timeout: Duration,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn KvStore>,
        leases: Arc<LeaseManager>,
        prefix: impl Into<String>,
        hostname: impl Into<String>,
        ttl: i64,
        read_timeout: Duration,
    ) -> Self {
        Self {
            store,
            leases,
            kvs: DashMap::new(),
            prefix: prefix.into(),
            hostname: hostname.into(),
            ttl,
            read_timeout,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 业务注册 key
    pub fn register_key(&self, info: &ServiceInfo) -> String {
        keys::service_key(&self.prefix, info)
    }

    /// 注册业务 key，续约跟随调用方的取消信号
    pub async fn register_business(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()> {
        let key = self.register_key(info);
        let value = keys::service_value(info)?;
        self.write(ctx, key, value, Some(ctx.cancel_token().clone()))
            .await
    }

    /// 治理服务额外注册指标 key，续约不受调用方取消影响
    pub async fn register_metric(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()> {
        if !info.is_governor() {
            return Ok(());
        }
        let key = keys::metric_key(&info.name, &self.hostname);
        self.write(ctx, key, info.address.clone(), None).await
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        key: String,
        value: String,
        renew_cancel: Option<tokio_util::sync::CancellationToken>,
    ) -> Result<()> {
        let lease_id = if self.ttl > 0 {
            let lease_id = ctx
                .run(self.read_timeout, self.leases.acquire(&key, self.ttl))
                .await
                .inspect_err(|e| {
                    error!(kind = %ErrorKind::Lease, key = %key, error = %e, "acquire lease");
                })?;
            Some(lease_id)
        } else {
            None
        };

        let put = self.store.put(&key, value.clone().into_bytes(), lease_id);
        if let Err(e) = ctx.run(self.read_timeout, put).await {
            let err = match e {
                RegistryError::Timeout(_) | RegistryError::Cancelled => e,
                other => RegistryError::register(&key, other),
            };
            error!(kind = %ErrorKind::Register, key = %key, value = %value, error = %err, "register service");
            return Err(err);
        }

        if let Some(lease_id) = lease_id {
            self.leases.renew(&key, lease_id, renew_cancel);
        }

        info!(key = %key, value = %value, "register service");
        self.kvs.insert(key, value);
        Ok(())
    }

    /// 注销：先释放租约再删除 key，删除成功后才从本地表移除
    pub async fn unregister(&self, key: &str) -> Result<()> {
        self.leases.release(key).await?;
        self.store.delete(key).await?;
        self.kvs.remove(key);
        Ok(())
    }

    /// 当前已注册的 key/value
    pub fn registered(&self) -> Vec<(String, String)> {
        self.kvs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.kvs.contains_key(key)
    }
}

//! etcd 服务注册发现实现

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::keys;
use super::lease::LeaseManager;
use super::registrar::Registrar;
use super::trait_def::ServiceRegistry;
use crate::config::RegistryConfig;
use crate::context::RequestContext;
use crate::discovery::{EndpointProjector, SnapshotPublisher, WatchTask};
use crate::error::{ErrorKind, Result};
use crate::store::{EtcdStore, KvStore};
use crate::types::{Endpoints, ServiceInfo};
use crate::utils;

/// etcd 服务注册发现
pub struct EtcdRegistry {
    config: RegistryConfig,
    store: Arc<dyn KvStore>,
    leases: Arc<LeaseManager>,
    registrar: Registrar,
    /// 监听任务
    watches: TaskTracker,
    shutdown: CancellationToken,
}

impl EtcdRegistry {
    /// 连接 etcd 并创建注册中心
    pub async fn connect(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let store = EtcdStore::connect(&config).await.inspect_err(|e| {
            error!(endpoints = ?config.endpoints, error = %e, "connect to etcd");
        })?;
        info!(endpoints = ?config.endpoints, prefix = %config.prefix, "connected to etcd");
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// 基于已有存储创建注册中心
    pub fn with_store(config: RegistryConfig, store: Arc<dyn KvStore>) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(utils::hostname);
        let leases = Arc::new(LeaseManager::new(store.clone()));
        let registrar = Registrar::new(
            store.clone(),
            leases.clone(),
            config.trimmed_prefix(),
            hostname,
            config.service_ttl_secs(),
            config.read_timeout(),
        );

        Self {
            config,
            store,
            leases,
            registrar,
            watches: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 本实例已注册且尚未注销的 key
    pub fn registered_keys(&self) -> Vec<String> {
        self.registrar
            .registered()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// 正在运行的监听任务数
    pub fn active_watches(&self) -> usize {
        self.watches.len()
    }

    fn decode_services(target: &str, kvs: &[crate::store::KeyValue]) -> Vec<ServiceInfo> {
        kvs.iter()
            .filter_map(|kv| match serde_json::from_slice::<ServiceInfo>(&kv.value) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(path = %target, key = %kv.key, error = %e, "invalid service value");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ServiceRegistry for EtcdRegistry {
    async fn register_service(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()> {
        self.registrar.register_business(ctx, info).await?;
        self.registrar.register_metric(ctx, info).await
    }

    async fn unregister_service(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()> {
        let key = self.registrar.register_key(info);
        ctx.run(self.config.read_timeout(), self.registrar.unregister(&key))
            .await
            .inspect_err(|e| {
                error!(kind = %ErrorKind::Request, key = %key, error = %e, "unregister service");
            })?;
        info!(key = %key, "unregister service");
        Ok(())
    }

    async fn list_services(
        &self,
        ctx: &RequestContext,
        name: &str,
        scheme: &str,
    ) -> Result<Vec<ServiceInfo>> {
        let target = keys::providers_prefix(self.registrar.prefix(), name, scheme);
        let kvs = ctx
            .run(self.config.read_timeout(), self.store.get(&target, true))
            .await
            .inspect_err(|e| {
                error!(kind = %ErrorKind::Request, path = %target, error = %e, "list services");
            })?;
        Ok(Self::decode_services(&target, &kvs))
    }

    async fn watch_services(
        &self,
        ctx: &RequestContext,
        name: &str,
        scheme: &str,
    ) -> Result<mpsc::Receiver<Endpoints>> {
        let prefix = keys::service_prefix(self.registrar.prefix(), name);
        let watch = ctx
            .run(self.config.read_timeout(), self.store.watch_prefix(&prefix))
            .await
            .inspect_err(|e| {
                error!(kind = %ErrorKind::Request, prefix = %prefix, error = %e, "watch services");
            })?;

        let mut projector = EndpointProjector::new(prefix.as_str(), scheme);
        projector.seed(&watch.initial);

        let (publisher, rx) = SnapshotPublisher::channel(prefix.clone());
        publisher.publish(projector.snapshot());
        debug!(prefix = %prefix, revision = watch.revision, "watch services started");

        let task = WatchTask::new(
            prefix,
            projector,
            publisher,
            watch.events,
            self.shutdown.child_token(),
        );
        self.watches.spawn(task.run());
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        let close_timeout = self.config.close_timeout();
        self.leases.shutdown(close_timeout).await;

        let registered = self.registrar.registered();
        futures::stream::iter(registered)
            .for_each_concurrent(self.config.close_concurrency, |(key, value)| async move {
                match tokio::time::timeout(close_timeout, self.registrar.unregister(&key)).await {
                    Ok(Ok(())) => info!(key = %key, value = %value, "unregister service"),
                    Ok(Err(e)) => {
                        error!(kind = %ErrorKind::Request, key = %key, value = %value, error = %e, "unregister service")
                    }
                    Err(_) => {
                        error!(kind = %ErrorKind::Request, key = %key, value = %value, timeout = ?close_timeout, "unregister service timed out")
                    }
                }
            })
            .await;

        self.watches.close();
        if tokio::time::timeout(close_timeout, self.watches.wait()).await.is_err() {
            warn!(remaining = self.watches.len(), "watch tasks did not stop in time");
        }
        info!(prefix = %self.registrar.prefix(), "registry closed");
        Ok(())
    }
}

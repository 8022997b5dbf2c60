//! etcd v3 存储实现

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, EventType as EtcdEventType, GetOptions, PutOptions, WatchOptions,
};
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    EventStream, EventType, KeepAliveAck, KeepAliveStream, KeyValue, KvStore, LeaseId,
    PrefixWatch, WatchEvent,
};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};

/// 续约请求的最小间隔
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// etcd 存储
///
/// `Client` 内部是可克隆的 gRPC channel，每次调用克隆一份，不需要加锁
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// 按配置连接 etcd
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let mut options = ConnectOptions::new()
            .with_timeout(config.read_timeout())
            .with_connect_timeout(config.connect_timeout())
            .with_keep_alive(Duration::from_secs(30), Duration::from_secs(10));

        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| RegistryError::request(format!("Failed to connect to etcd: {}", e)))?;

        Ok(Self { client })
    }

    fn client(&self) -> Client {
        self.client.clone()
    }
}

/// etcd 对失效租约返回 `etcdserver: requested lease not found`
fn is_lease_not_found(err: &etcd_client::Error) -> bool {
    err.to_string().contains("lease not found")
}

fn lease_error(lease: LeaseId, action: &str, err: etcd_client::Error) -> RegistryError {
    if is_lease_not_found(&err) {
        RegistryError::LeaseNotFound(lease)
    } else {
        RegistryError::lease(format!("{} lease {}: {}", action, lease, err))
    }
}

fn convert_kv(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
    }
}

fn convert_event(event: &etcd_client::Event) -> Option<WatchEvent> {
    let kv = event.kv()?;
    let event_type = match event.event_type() {
        EtcdEventType::Put => EventType::Put,
        EtcdEventType::Delete => EventType::Delete,
    };
    Some(WatchEvent {
        event_type,
        kv: convert_kv(kv),
    })
}

fn keep_alive_interval(ttl: i64) -> Duration {
    let millis = (ttl.max(0) as u64).saturating_mul(1000) / 3;
    Duration::from_millis(millis).max(MIN_KEEP_ALIVE_INTERVAL)
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KeyValue>> {
        let options = prefix.then(|| GetOptions::new().with_prefix());
        let resp = self.client().get(key, options).await?;
        Ok(resp.kvs().iter().map(convert_kv).collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        let options = lease.map(|id| PutOptions::new().with_lease(id));
        self.client()
            .put(key, value, options)
            .await
            .map_err(|e| match lease {
                Some(id) if is_lease_not_found(&e) => RegistryError::LeaseNotFound(id),
                _ => e.into(),
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client().delete(key, None).await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch> {
        let mut client = self.client();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        let initial = resp.kvs().iter().map(convert_kv).collect();

        // 从初始列表的下一个版本开始监听，列表与事件流之间不留空隙
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision + 1);
        let (watcher, stream) = client.watch(prefix, Some(options)).await?;

        let watched = prefix.to_string();
        let events: EventStream = futures::stream::unfold(
            (watcher, stream, VecDeque::new()),
            move |(watcher, mut stream, mut pending)| {
                let watched = watched.clone();
                async move {
                    loop {
                        if let Some(event) = pending.pop_front() {
                            return Some((event, (watcher, stream, pending)));
                        }
                        match stream.message().await {
                            Ok(Some(resp)) => {
                                if resp.canceled() {
                                    warn!(prefix = %watched, "watch canceled by server");
                                    return None;
                                }
                                pending.extend(resp.events().iter().filter_map(convert_event));
                            }
                            Ok(None) => {
                                debug!(prefix = %watched, "watch stream closed");
                                return None;
                            }
                            Err(e) => {
                                warn!(prefix = %watched, error = %e, "watch stream error");
                                return None;
                            }
                        }
                    }
                }
            },
        )
        .boxed();

        Ok(PrefixWatch {
            initial,
            revision,
            events,
        })
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseId> {
        let resp = self
            .client()
            .lease_grant(ttl, None)
            .await
            .map_err(|e| RegistryError::lease(format!("Failed to grant lease: {}", e)))?;
        Ok(resp.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let (keeper, stream) = self
            .client()
            .lease_keep_alive(lease)
            .await
            .map_err(|e| lease_error(lease, "keep alive", e))?;

        // 第一次立即续约，之后按 TTL 的三分之一发送
        let acks: KeepAliveStream = futures::stream::unfold(
            (keeper, stream, Duration::ZERO),
            move |(mut keeper, mut stream, wait)| async move {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                if let Err(e) = keeper.keep_alive().await {
                    warn!(lease_id = lease, error = %e, "Lease keep-alive request failed");
                    return None;
                }
                match stream.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => {
                        let ack = KeepAliveAck {
                            lease_id: resp.id(),
                            ttl: resp.ttl(),
                        };
                        Some((ack, (keeper, stream, keep_alive_interval(resp.ttl()))))
                    }
                    Ok(Some(_)) => {
                        debug!(lease_id = lease, "lease expired or revoked");
                        None
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!(lease_id = lease, error = %e, "Lease keep-alive stream error");
                        None
                    }
                }
            },
        )
        .boxed();

        Ok(acks)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveAck> {
        let (mut keeper, mut stream) = self
            .client()
            .lease_keep_alive(lease)
            .await
            .map_err(|e| lease_error(lease, "keep alive", e))?;
        keeper
            .keep_alive()
            .await
            .map_err(|e| lease_error(lease, "keep alive", e))?;

        match stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(KeepAliveAck {
                lease_id: resp.id(),
                ttl: resp.ttl(),
            }),
            Ok(Some(_)) => Err(RegistryError::LeaseNotFound(lease)),
            Ok(None) => Err(RegistryError::lease(format!(
                "keep alive stream for lease {} closed",
                lease
            ))),
            Err(e) => Err(lease_error(lease, "keep alive", e)),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        self.client()
            .lease_revoke(lease)
            .await
            .map_err(|e| lease_error(lease, "revoke", e))?;
        Ok(())
    }
}

//! 内存存储实现
//!
//! 行为与 etcd 对齐：全局递增版本号、前缀监听、租约到期删除绑定的 key。
//! 租约到期在每次访问时惰性清理，时间取自 `tokio::time`，测试中可以暂停时钟。
//! 另外提供故障注入与计数接口，便于验证注册流程的错误分支。

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    KeepAliveAck, KeepAliveStream, KeyValue, KvStore, LeaseId, PrefixWatch, WatchEvent,
};
use crate::error::{RegistryError, Result};

/// 可注入故障的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Delete,
    Watch,
    Grant,
    KeepAlive,
    KeepAliveOnce,
    Revoke,
}

struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: i64,
    deadline: Instant,
    keys: HashSet<String>,
}

struct Subscriber {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Inner {
    revision: i64,
    next_lease: LeaseId,
    data: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    subscribers: Vec<Subscriber>,
    failures: HashMap<StoreOp, RegistryError>,
}

impl Inner {
    fn take_failure(&mut self, op: StoreOp) -> Result<()> {
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn emit(&mut self, event: WatchEvent) {
        self.subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in &self.subscribers {
            if event.kv.key.starts_with(&sub.prefix) {
                let _ = sub.tx.send(event.clone());
            }
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let Some(entry) = self.data.remove(key) else {
            return false;
        };
        if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(key);
        }
        self.revision += 1;
        self.emit(WatchEvent::delete(key));
        true
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        let mut keys: Vec<String> = lease.keys.into_iter().collect();
        keys.sort();
        for key in keys {
            self.remove_key(&key);
        }
        true
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let mut expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for id in expired {
            self.drop_lease(id);
        }
    }

    fn refresh(&mut self, id: LeaseId) -> Result<KeepAliveAck> {
        let lease = self
            .leases
            .get_mut(&id)
            .ok_or(RegistryError::LeaseNotFound(id))?;
        lease.deadline = Instant::now() + ttl_duration(lease.ttl);
        Ok(KeepAliveAck {
            lease_id: id,
            ttl: lease.ttl,
        })
    }
}

fn ttl_duration(ttl: i64) -> Duration {
    Duration::from_secs(ttl.max(1) as u64)
}

/// 内存存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    grants: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次 `op` 调用返回 `err`，只生效一次
    pub async fn inject_failure(&self, op: StoreOp, err: RegistryError) {
        self.inner.lock().await.failures.insert(op, err);
    }

    /// 模拟服务端租约过期
    pub async fn expire_lease(&self, id: LeaseId) -> bool {
        self.inner.lock().await.drop_lease(id)
    }

    /// 已授予的租约总数
    pub fn grant_count(&self) -> u64 {
        self.grants.load(Ordering::SeqCst)
    }

    /// 当前存活的租约
    pub async fn live_leases(&self) -> Vec<LeaseId> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        let mut ids: Vec<LeaseId> = inner.leases.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// key 当前绑定的租约
    pub async fn lease_of(&self, key: &str) -> Option<LeaseId> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        inner.data.get(key).and_then(|entry| entry.lease)
    }

    /// 当前版本号
    pub async fn revision(&self) -> i64 {
        self.inner.lock().await.revision
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KeyValue>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Get)?;
        inner.purge_expired();
        let kvs = if prefix {
            inner
                .data
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(k, entry)| KeyValue::new(k.clone(), entry.value.clone()))
                .collect()
        } else {
            inner
                .data
                .get(key)
                .map(|entry| vec![KeyValue::new(key, entry.value.clone())])
                .unwrap_or_default()
        };
        Ok(kvs)
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Put)?;
        inner.purge_expired();

        if let Some(id) = lease {
            let attached = inner
                .leases
                .get_mut(&id)
                .ok_or(RegistryError::LeaseNotFound(id))?;
            attached.keys.insert(key.to_string());
        }

        let previous = inner.data.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                lease,
            },
        );
        if let Some(old) = previous.and_then(|entry| entry.lease).filter(|old| Some(*old) != lease) {
            if let Some(old_lease) = inner.leases.get_mut(&old) {
                old_lease.keys.remove(key);
            }
        }

        inner.revision += 1;
        inner.emit(WatchEvent::put(key, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Delete)?;
        inner.purge_expired();
        inner.remove_key(key);
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Watch)?;
        inner.purge_expired();

        // 在同一把锁内完成列举与订阅，二者之间不会有写入
        let initial = inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, entry)| KeyValue::new(k.clone(), entry.value.clone()))
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(PrefixWatch {
            initial,
            revision: inner.revision,
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseId> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Grant)?;
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl_duration(ttl),
                keys: HashSet::new(),
            },
        );
        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let ttl = {
            let mut inner = self.inner.lock().await;
            inner.take_failure(StoreOp::KeepAlive)?;
            inner.purge_expired();
            inner.refresh(lease)?.ttl
        };
        let interval = ttl_duration(ttl) / 3;
        let inner = self.inner.clone();

        let acks: KeepAliveStream = futures::stream::unfold(inner, move |inner| async move {
            tokio::time::sleep(interval).await;
            let ack = {
                let mut guard = inner.lock().await;
                guard.purge_expired();
                guard.refresh(lease).ok()
            }?;
            Some((ack, inner))
        })
        .boxed();

        Ok(acks)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveAck> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::KeepAliveOnce)?;
        inner.purge_expired();
        inner.refresh(lease)
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(StoreOp::Revoke)?;
        inner.purge_expired();
        if inner.drop_lease(lease) {
            Ok(())
        } else {
            Err(RegistryError::LeaseNotFound(lease))
        }
    }
}

//! 租约管理
//!
//! 按注册 key 缓存租约 ID。复用缓存前先做一次存活探测，
//! 服务端报告租约不存在时重新授予；其它探测错误原样返回，缓存不变。
//! 锁只保护 map 本身，任何网络调用期间都不持有锁。

use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::error::{ErrorKind, Result};
use crate::store::{KvStore, LeaseId};

/// 租约管理器
pub struct LeaseManager {
    store: Arc<dyn KvStore>,
    leases: RwLock<HashMap<String, LeaseId>>,
    /// 每个 key 当前续约任务的取消句柄
    renewals: DashMap<String, CancellationToken>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            leases: RwLock::new(HashMap::new()),
            renewals: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 获取 key 对应的可用租约
    pub async fn acquire(&self, key: &str, ttl: i64) -> Result<LeaseId> {
        let cached = self.leases.read().await.get(key).copied();

        if let Some(lease_id) = cached {
            match self.store.keep_alive_once(lease_id).await {
                Ok(_) => return Ok(lease_id),
                Err(e) if e.is_lease_not_found() => {
                    debug!(key = %key, lease_id, "cached lease is gone, granting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let lease_id = self.store.grant(ttl).await?;
        self.leases.write().await.insert(key.to_string(), lease_id);
        debug!(key = %key, lease_id, ttl, "lease granted");
        Ok(lease_id)
    }

    /// 启动后台续约
    ///
    /// 任务在续约流结束、`cancel` 触发或管理器关闭时退出，不做重试。
    /// 同一个 key 再次续约时取消旧任务。
    pub fn renew(&self, key: &str, lease_id: LeaseId, cancel: Option<CancellationToken>) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.renewals.insert(key.to_string(), token.clone()) {
            previous.cancel();
        }

        let store = self.store.clone();
        let key = key.to_string();
        self.tracker.spawn(async move {
            let mut acks = match store.keep_alive(lease_id).await {
                Ok(acks) => acks,
                Err(e) => {
                    warn!(key = %key, lease_id, kind = %ErrorKind::Lease, error = %e, "start lease keep-alive failed");
                    return;
                }
            };

            let caller_cancelled = async {
                match &cancel {
                    Some(cancel) => cancel.cancelled().await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(caller_cancelled);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(key = %key, lease_id, "lease keep-alive stopped");
                        break;
                    }
                    _ = &mut caller_cancelled => {
                        debug!(key = %key, lease_id, "lease keep-alive cancelled by caller");
                        break;
                    }
                    ack = acks.next() => match ack {
                        Some(ack) => trace!(key = %key, lease_id, ttl = ack.ttl, "lease keep-alive"),
                        None => {
                            info!(key = %key, lease_id, "lease keep-alive stream closed");
                            break;
                        }
                    },
                }
            }
        });
    }

    /// 释放 key 的租约：停止续约并撤销，未缓存时什么也不做
    pub async fn release(&self, key: &str) -> Result<()> {
        if let Some((_, token)) = self.renewals.remove(key) {
            token.cancel();
        }

        let lease_id = self.leases.write().await.remove(key);
        if let Some(lease_id) = lease_id {
            match self.store.revoke(lease_id).await {
                Ok(()) => debug!(key = %key, lease_id, "lease revoked"),
                // 租约已经过期，目标状态已达成
                Err(e) if e.is_lease_not_found() => {
                    debug!(key = %key, lease_id, "lease already gone")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 当前缓存的租约
    pub async fn cached(&self, key: &str) -> Option<LeaseId> {
        self.leases.read().await.get(key).copied()
    }

    /// 正在运行的续约任务数
    pub fn active_renewals(&self) -> usize {
        self.tracker.len()
    }

    /// 停止全部续约任务，最多等待 `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "lease keep-alive tasks did not stop in time");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::store::{MemoryStore, StoreOp};

    fn manager() -> (MemoryStore, LeaseManager) {
        let store = MemoryStore::new();
        let manager = LeaseManager::new(Arc::new(store.clone()));
        (store, manager)
    }

    #[tokio::test]
    async fn test_acquire_grants_then_reuses() {
        let (store, manager) = manager();
        let first = manager.acquire("/k", 5).await.unwrap();
        let second = manager.acquire("/k", 5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.grant_count(), 1);
        assert_eq!(manager.cached("/k").await, Some(first));
    }

    #[tokio::test]
    async fn test_acquire_regrants_when_lease_not_found() {
        let (store, manager) = manager();
        let first = manager.acquire("/k", 5).await.unwrap();
        assert!(store.expire_lease(first).await);

        let second = manager.acquire("/k", 5).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.grant_count(), 2);
        assert_eq!(manager.cached("/k").await, Some(second));
    }

    #[tokio::test]
    async fn test_keep_alive_check_error_keeps_cache() {
        let (store, manager) = manager();
        let first = manager.acquire("/k", 5).await.unwrap();
        store
            .inject_failure(StoreOp::KeepAliveOnce, RegistryError::request("unavailable"))
            .await;

        let err = manager.acquire("/k", 5).await.unwrap_err();
        assert_eq!(err, RegistryError::request("unavailable"));
        assert_eq!(manager.cached("/k").await, Some(first));
        assert_eq!(store.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_release_revokes_and_is_idempotent() {
        let (store, manager) = manager();
        let lease = manager.acquire("/k", 5).await.unwrap();
        manager.release("/k").await.unwrap();
        assert!(manager.cached("/k").await.is_none());
        assert!(!store.live_leases().await.contains(&lease));

        // 未缓存时为空操作
        manager.release("/k").await.unwrap();
    }

    #[tokio::test]
    async fn test_release_tolerates_expired_lease() {
        let (store, manager) = manager();
        let lease = manager.acquire("/k", 5).await.unwrap();
        store.expire_lease(lease).await;
        manager.release("/k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_keeps_lease_alive() {
        let (store, manager) = manager();
        let lease = manager.acquire("/k", 2).await.unwrap();
        store.put("/k", b"v".to_vec(), Some(lease)).await.unwrap();
        manager.renew("/k", lease, None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get("/k", false).await.unwrap().len(), 1);

        manager.shutdown(Duration::from_secs(1)).await;
        assert_eq!(manager.active_renewals(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/k", false).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancel_stops_renewal() {
        let (store, manager) = manager();
        let lease = manager.acquire("/k", 2).await.unwrap();
        store.put("/k", b"v".to_vec(), Some(lease)).await.unwrap();

        let cancel = CancellationToken::new();
        manager.renew("/k", lease, Some(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get("/k", false).await.unwrap().len(), 1);

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/k", false).await.unwrap().is_empty());
        // 租约过期后缓存仍在，下一次获取会探测并重新授予
        assert_eq!(manager.cached("/k").await, Some(lease));
        assert_ne!(manager.acquire("/k", 2).await.unwrap(), lease);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_replaces_previous_task() {
        let (_store, manager) = manager();
        let lease = manager.acquire("/k", 3).await.unwrap();
        manager.renew("/k", lease, None);
        manager.renew("/k", lease, None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.active_renewals(), 1);
        manager.shutdown(Duration::from_secs(1)).await;
    }
}

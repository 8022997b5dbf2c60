//! 键值存储抽象
//!
//! 注册中心只依赖这里定义的操作集合，etcd 与内存实现都满足同样的语义：
//! - `watch_prefix` 返回的初始列表与事件流之间不丢事件
//! - 同一前缀的事件按存储写入顺序送达
//! - `keep_alive_once` 在租约已失效时返回 [`RegistryError::LeaseNotFound`]
//!
//! [`RegistryError::LeaseNotFound`]: crate::error::RegistryError::LeaseNotFound

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// 租约 ID
pub type LeaseId = i64;

/// 键值对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    /// 删除事件不携带 value
    Delete,
}

/// 监听事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kv: KeyValue,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: EventType::Put,
            kv: KeyValue::new(key, value),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Delete,
            kv: KeyValue::new(key, Vec::new()),
        }
    }
}

/// 续约应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveAck {
    pub lease_id: LeaseId,
    /// 服务端剩余 TTL（秒）
    pub ttl: i64,
}

/// 事件流，连接断开或服务端取消后结束
pub type EventStream = BoxStream<'static, WatchEvent>;

/// 续约应答流，租约失效或连接断开后结束
pub type KeepAliveStream = BoxStream<'static, KeepAliveAck>;

/// 前缀监听结果
pub struct PrefixWatch {
    /// 监听建立时前缀下的全部键值
    pub initial: Vec<KeyValue>,
    /// 初始列表对应的存储版本号
    pub revision: i64,
    /// 之后的增量事件
    pub events: EventStream,
}

/// 键值存储 trait
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 读取 key，`prefix` 为 true 时按前缀读取
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KeyValue>>;

    /// 写入 key，可选绑定租约
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()>;

    /// 删除 key，key 不存在时不报错
    async fn delete(&self, key: &str) -> Result<()>;

    /// 监听前缀：返回当前全部键值和之后的事件流
    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch>;

    /// 授予租约
    async fn grant(&self, ttl: i64) -> Result<LeaseId>;

    /// 持续续约，返回应答流
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream>;

    /// 单次续约，用作租约存活探测
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<KeepAliveAck>;

    /// 撤销租约，绑定在租约上的 key 一并删除
    async fn revoke(&self, lease: LeaseId) -> Result<()>;
}

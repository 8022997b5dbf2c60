//! 服务发现模块
//!
//! 监听服务前缀，把原始键值事件投影为 [`Endpoints`] 快照并推送给消费方。
//!
//! [`Endpoints`]: crate::types::Endpoints

pub mod projector;
pub mod publisher;
pub mod watch;

pub use projector::{ConfigKind, EndpointProjector, KeyTarget};
pub use publisher::{PublishOutcome, SNAPSHOT_BUFFER, SnapshotPublisher};
pub use watch::WatchTask;

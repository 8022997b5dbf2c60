//! 快照推送
//!
//! 有界通道，满了就丢弃本次快照并告警，投影循环永远不会因为慢消费者阻塞。
//! 消费方只能认为通道最终反映最新状态，不能假设收到每一个中间状态。

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::types::Endpoints;

/// 快照通道容量
pub const SNAPSHOT_BUFFER: usize = 10;

/// 推送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    /// 通道已满，快照被丢弃
    Dropped,
    /// 消费方已关闭接收端
    Closed,
}

/// 快照推送器
pub struct SnapshotPublisher {
    tx: mpsc::Sender<Endpoints>,
    prefix: String,
}

impl SnapshotPublisher {
    /// 创建推送器与容量为 [`SNAPSHOT_BUFFER`] 的接收端
    pub fn channel(prefix: impl Into<String>) -> (Self, mpsc::Receiver<Endpoints>) {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        (
            Self {
                tx,
                prefix: prefix.into(),
            },
            rx,
        )
    }

    /// 非阻塞推送
    pub fn publish(&self, snapshot: Endpoints) -> PublishOutcome {
        match self.tx.try_send(snapshot) {
            Ok(()) => PublishOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(prefix = %self.prefix, "snapshot channel full, drop update");
                PublishOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(prefix = %self.prefix, "snapshot receiver closed");
                PublishOutcome::Closed
            }
        }
    }

    /// 等待消费方关闭接收端
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

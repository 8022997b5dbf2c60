//! 监听循环
//!
//! 每个监听一个后台任务：按存储顺序消费事件，交给投影器，再把快照交给推送器。
//! 事件流结束、消费方关闭接收端或注册中心关闭时退出。

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::projector::EndpointProjector;
use super::publisher::{PublishOutcome, SnapshotPublisher};
use crate::store::EventStream;

/// 监听任务
pub struct WatchTask {
    prefix: String,
    projector: EndpointProjector,
    publisher: SnapshotPublisher,
    events: EventStream,
    shutdown: CancellationToken,
}

impl WatchTask {
    pub fn new(
        prefix: impl Into<String>,
        projector: EndpointProjector,
        publisher: SnapshotPublisher,
        events: EventStream,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            projector,
            publisher,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        debug!(prefix = %self.prefix, "watch task started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(prefix = %self.prefix, "watch task stopped");
                    break;
                }
                _ = self.publisher.closed() => {
                    debug!(prefix = %self.prefix, "watch receiver dropped");
                    break;
                }
                event = self.events.next() => {
                    let Some(event) = event else {
                        warn!(prefix = %self.prefix, "watch event stream ended");
                        break;
                    };
                    if let Some(snapshot) = self.projector.handle(&event) {
                        if self.publisher.publish(snapshot) == PublishOutcome::Closed {
                            break;
                        }
                    }
                }
            }
        }
        info!(prefix = %self.prefix, "watch services stopped");
    }
}

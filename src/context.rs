//! 请求上下文
//!
//! 同步调用通过 [`RequestContext`] 携带截止时间与取消信号：
//! 调用方未设置截止时间时使用配置中的读超时；取消信号同时约束业务租约的续约任务。

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{RegistryError, Result};

/// 请求上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// 无截止时间、不会被取消的上下文
    pub fn background() -> Self {
        Self::default()
    }

    /// 设置相对超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// 设置绝对截止时间
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 绑定取消信号
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 剩余时间；没有截止时间时返回 `None`
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// 在截止时间（或 `default_timeout`）与取消信号的约束下执行 `fut`
    pub async fn run<T, F>(&self, default_timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.remaining().unwrap_or(default_timeout);
        tokio::select! {
            // 已取消的上下文不再发起请求
            biased;
            _ = self.cancel.cancelled() => Err(RegistryError::Cancelled),
            res = tokio::time::timeout(timeout, fut) => {
                res.map_err(|_| RegistryError::Timeout(timeout))?
            }
        }
    }
}

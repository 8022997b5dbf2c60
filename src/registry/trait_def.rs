//! 服务注册发现 Trait 定义

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{Endpoints, ServiceInfo};

/// 服务注册发现 Trait
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务（治理服务同时注册指标 key）
    async fn register_service(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()>;

    /// 注销服务
    async fn unregister_service(&self, ctx: &RequestContext, info: &ServiceInfo) -> Result<()>;

    /// 列出指定服务、指定协议的全部提供者
    async fn list_services(
        &self,
        ctx: &RequestContext,
        name: &str,
        scheme: &str,
    ) -> Result<Vec<ServiceInfo>>;

    /// 监听服务，返回的接收端先收到一份初始快照
    async fn watch_services(
        &self,
        ctx: &RequestContext,
        name: &str,
        scheme: &str,
    ) -> Result<mpsc::Receiver<Endpoints>>;

    /// 关闭：停止全部后台任务并尽力注销本实例写入的 key
    async fn close(&self) -> Result<()>;
}

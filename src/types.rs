//! 注册记录与发现快照的数据类型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Unknown,
    /// 普通业务服务
    Provider,
    /// 治理服务，额外注册 metric key 供 prometheus 发现
    Governor,
}

/// 服务注册信息，以 JSON 写入 provider key 的 value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    pub name: String,
    pub app_id: String,
    pub scheme: String,
    /// `host:port`
    pub address: String,
    pub weight: f64,
    pub enable: bool,
    pub healthy: bool,
    pub metadata: HashMap<String, String>,
    pub region: String,
    pub zone: String,
    pub kind: ServiceKind,
    /// 部署组
    pub deployment: String,
    pub group: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            address: address.into(),
            weight: 100.0,
            enable: true,
            healthy: true,
            kind: ServiceKind::Provider,
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// 规范地址 `scheme://address`
    pub fn uri(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }

    pub fn is_governor(&self) -> bool {
        self.kind == ServiceKind::Governor
    }
}

/// 路由上游配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstream {
    /// 按节点负载：`host:port` -> 权重
    pub nodes: HashMap<String, i32>,
    /// 按分组负载：分组名 -> 权重
    #[serde(alias = "group")]
    pub groups: HashMap<String, i32>,
}

/// 路由配置，`id`/`scheme`/`host` 从 key 中提取
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
    pub deployment: String,
    pub uri: String,
    pub upstream: Upstream,
}

/// 服务端配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
    pub region: String,
    pub zone: String,
    pub deployment: String,
    pub weight: f64,
    pub enable: bool,
}

/// 客户端配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub id: String,
    pub scheme: String,
    pub host: String,
    pub deployment: String,
    pub enable: bool,
}

/// 服务发现快照
///
/// 四张表都以规范 URI 为 key，始终存在（可以为空）。
/// 每次推送给消费方的都是独立克隆，投影任务不会修改已发出的快照。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoints {
    pub nodes: HashMap<String, ServiceInfo>,
    pub route_configs: HashMap<String, RouteConfig>,
    pub provider_configs: HashMap<String, ProviderConfig>,
    pub consumer_configs: HashMap<String, ConsumerConfig>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.route_configs.is_empty()
            && self.provider_configs.is_empty()
            && self.consumer_configs.is_empty()
    }
}

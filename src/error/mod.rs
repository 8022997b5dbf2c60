//! 注册中心错误处理模块
//!
//! 统一的错误类型与分类，同步调用（注册、注销、列举）直接返回错误，
//! 监听投影过程中的错误只记录日志，不向调用方暴露

pub mod kind;

pub use kind::ErrorKind;

use std::time::Duration;
use thiserror::Error;

/// 注册中心统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// 存储 RPC 失败
    #[error("请求错误: {0}")]
    Request(String),

    /// 注册写入失败
    #[error("注册失败 [{key}]: {reason}")]
    Register { key: String, reason: String },

    /// key 或 URI 无法解析
    #[error("URI 解析失败 [{uri}]: {reason}")]
    UriParse { uri: String, reason: String },

    /// 租约授予、续约或撤销失败
    #[error("租约错误: {0}")]
    Lease(String),

    /// 服务端已不存在该租约
    #[error("租约不存在: {0}")]
    LeaseNotFound(i64),

    /// 编解码错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 操作超时
    #[error("操作超时: {0:?}")]
    Timeout(Duration),

    /// 调用方取消
    #[error("操作已取消")]
    Cancelled,

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl RegistryError {
    /// 创建请求错误
    pub fn request(msg: impl Into<String>) -> Self {
        RegistryError::Request(msg.into())
    }

    /// 创建注册错误
    pub fn register(key: impl Into<String>, reason: impl ToString) -> Self {
        RegistryError::Register {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// 创建 URI 解析错误
    pub fn uri_parse(uri: impl Into<String>, reason: impl ToString) -> Self {
        RegistryError::UriParse {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// 创建租约错误
    pub fn lease(msg: impl Into<String>) -> Self {
        RegistryError::Lease(msg.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        RegistryError::Config(msg.into())
    }

    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Request(_) => ErrorKind::Request,
            RegistryError::Register { .. } => ErrorKind::Register,
            RegistryError::UriParse { .. } => ErrorKind::Uri,
            RegistryError::Lease(_) | RegistryError::LeaseNotFound(_) => ErrorKind::Lease,
            RegistryError::Serialization(_) => ErrorKind::Serialization,
            RegistryError::Timeout(_) => ErrorKind::Timeout,
            RegistryError::Cancelled => ErrorKind::Cancelled,
            RegistryError::Config(_) => ErrorKind::Config,
        }
    }

    /// 租约是否已在服务端失效
    pub fn is_lease_not_found(&self) -> bool {
        matches!(self, RegistryError::LeaseNotFound(_))
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<etcd_client::Error> for RegistryError {
    fn from(err: etcd_client::Error) -> Self {
        RegistryError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RegistryError {
    fn from(err: toml::de::Error) -> Self {
        RegistryError::Config(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RegistryError>;

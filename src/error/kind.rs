//! 错误分类定义
//!
//! 每个错误都带有一个分类标识，日志中以 `kind` 字段输出，便于按类型聚合告警

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 存储 RPC 请求失败
    Request,
    /// 注册写入失败
    Register,
    /// key / URI 解析失败
    Uri,
    /// 租约授予、续约或撤销失败
    Lease,
    /// 编解码失败
    Serialization,
    /// 超时
    Timeout,
    /// 调用方取消
    Cancelled,
    /// 配置错误
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorKind {
    /// 日志字段使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Request => "request_err",
            ErrorKind::Register => "register_err",
            ErrorKind::Uri => "uri_err",
            ErrorKind::Lease => "lease_err",
            ErrorKind::Serialization => "serialization_err",
            ErrorKind::Timeout => "timeout_err",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config_err",
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Request | ErrorKind::Timeout)
    }
}

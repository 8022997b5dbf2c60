//! 注册中心配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RegistryError, Result};

/// etcd 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RegistryConfig {
    /// etcd 地址列表
    pub endpoints: Vec<String>,

    /// key 前缀（默认 `jupiter`）
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// 同步请求的超时时间，毫秒（调用方未指定 deadline 时生效）
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// 服务租约 TTL，秒；0 表示不使用租约
    #[serde(default)]
    pub service_ttl: u64,

    /// 连接超时，毫秒
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    pub username: Option<String>,
    pub password: Option<String>,

    /// 指标注册 key 中的主机名，缺省取本机主机名
    pub hostname: Option<String>,

    /// 关闭时单个 key 注销的超时，毫秒
    #[serde(default = "default_close_timeout")]
    pub close_timeout: u64,

    /// 关闭时并发注销的上限
    #[serde(default = "default_close_concurrency")]
    pub close_concurrency: usize,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    /// EnvFilter 指令，如 `info` 或 `flare_registry_etcd=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_prefix() -> String {
    "jupiter".to_string()
}

fn default_read_timeout() -> u64 {
    3000
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_close_timeout() -> u64 {
    1000
}

fn default_close_concurrency() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            prefix: default_prefix(),
            read_timeout: default_read_timeout(),
            service_ttl: 0,
            connect_timeout: default_connect_timeout(),
            username: None,
            password: None,
            hostname: None,
            close_timeout: default_close_timeout(),
            close_concurrency: default_close_concurrency(),
            log: LogConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::config(format!("read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(RegistryError::config("endpoints must not be empty"));
        }
        if self.prefix.trim_matches('/').is_empty() {
            return Err(RegistryError::config("prefix must not be empty"));
        }
        if self.close_concurrency == 0 {
            return Err(RegistryError::config("close_concurrency must be positive"));
        }
        Ok(())
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout.as_millis() as u64;
        self
    }

    /// 设置服务租约 TTL，不足一秒的部分舍去
    pub fn with_service_ttl(mut self, ttl: Duration) -> Self {
        self.service_ttl = ttl.as_secs();
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_close_concurrency(mut self, limit: usize) -> Self {
        self.close_concurrency = limit;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout)
    }

    /// 租约 TTL（秒），0 表示不使用租约
    pub fn service_ttl_secs(&self) -> i64 {
        self.service_ttl as i64
    }

    /// 去掉首尾 `/` 的前缀
    pub fn trimmed_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = RegistryConfig::from_toml_str(r#"endpoints = ["http://10.0.0.1:2379"]"#)
            .unwrap();
        assert_eq!(config.prefix, "jupiter");
        assert_eq!(config.read_timeout(), Duration::from_secs(3));
        assert_eq!(config.service_ttl_secs(), 0);
        assert_eq!(config.close_timeout(), Duration::from_secs(1));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_full_toml() {
        let config = RegistryConfig::from_toml_str(
            r#"
            endpoints = ["http://a:2379", "http://b:2379"]
            prefix = "/flare/"
            read_timeout = 500
            service_ttl = 10
            username = "root"
            password = "secret"
            close_concurrency = 4

            [log]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.trimmed_prefix(), "flare");
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.service_ttl_secs(), 10);
        assert_eq!(config.username.as_deref(), Some("root"));
        assert_eq!(config.close_concurrency, 4);
        assert!(config.log.json);
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let err = RegistryConfig::from_toml_str("endpoints = []").unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = RegistryConfig::default().with_prefix("/");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::new()
            .with_service_ttl(Duration::from_secs(5))
            .with_read_timeout(Duration::from_millis(250));
        assert_eq!(config.service_ttl, 5);
        assert_eq!(config.read_timeout, 250);
    }
}

//! 监听事件投影
//!
//! 把前缀下的原始键值事件归类并写入 [`Endpoints`]：
//! - `providers/{scheme}...`：服务节点
//! - `configurators/{scheme}...`：按路径首段区分路由、服务端、客户端配置
//! - 裸 `host:port`：删除墓碑，同时从节点表与路由表移除
//!
//! 单个事件解析或解码失败只记录日志并跳过。

use serde::de::DeserializeOwned;
use tracing::{error, trace};
use url::Url;

use crate::error::{ErrorKind, RegistryError, Result};
use crate::store::{EventType, KeyValue, WatchEvent};
use crate::types::{ConsumerConfig, Endpoints, ProviderConfig, RouteConfig, ServiceInfo};
use crate::utils;

/// 配置类型，由配置 URI 路径首段决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Route,
    Provider,
    Consumer,
}

impl ConfigKind {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "routes" => Some(ConfigKind::Route),
            "providers" => Some(ConfigKind::Provider),
            "consumers" => Some(ConfigKind::Consumer),
            _ => None,
        }
    }
}

/// key 的归类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyTarget {
    /// 服务节点，`uri` 为规范地址
    Node { uri: String },
    /// 配置项
    Config {
        kind: ConfigKind,
        uri: String,
        id: String,
        scheme: String,
        host: String,
    },
    /// 只剩 `host:port` 的删除墓碑
    Tombstone { addr: String },
}

/// 端点投影器，只由监听任务持有
pub struct EndpointProjector {
    prefix: String,
    scheme: String,
    current: Endpoints,
}

impl EndpointProjector {
    pub fn new(prefix: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            scheme: scheme.into(),
            current: Endpoints::new(),
        }
    }

    /// 用初始列表填充
    pub fn seed(&mut self, kvs: &[KeyValue]) {
        for kv in kvs {
            if let Err(e) = self.apply(&WatchEvent {
                event_type: EventType::Put,
                kv: kv.clone(),
            }) {
                log_skipped(&kv.key, &e);
            }
        }
    }

    /// 当前状态的快照
    pub fn snapshot(&self) -> Endpoints {
        self.current.clone()
    }

    /// 处理一个事件，返回变更后的快照；事件被忽略或解析失败时返回 `None`
    pub fn handle(&mut self, event: &WatchEvent) -> Option<Endpoints> {
        let target = match self.classify(&event.kv.key) {
            Ok(Some(target)) => target,
            Ok(None) => {
                trace!(key = %event.kv.key, "ignore unrelated key");
                return None;
            }
            Err(e) => {
                log_skipped(&event.kv.key, &e);
                return None;
            }
        };

        // 在克隆上修改，已经发出的快照不受影响
        let mut next = self.current.clone();
        match apply_target(&mut next, &target, event) {
            Ok(true) => {
                self.current = next;
                Some(self.snapshot())
            }
            Ok(false) => None,
            Err(e) => {
                log_skipped(&event.kv.key, &e);
                None
            }
        }
    }

    /// 在当前状态上原地应用事件
    pub fn apply(&mut self, event: &WatchEvent) -> Result<bool> {
        match self.classify(&event.kv.key)? {
            Some(target) => apply_target(&mut self.current, &target, event),
            None => Ok(false),
        }
    }

    /// 按相对 key 归类
    pub fn classify(&self, key: &str) -> Result<Option<KeyTarget>> {
        let addr = key.strip_prefix(&self.prefix).unwrap_or(key);

        if addr.starts_with(&format!("providers/{}", self.scheme)) {
            let rest = &addr["providers/".len()..];
            let uri = RawUri::parse(rest)?;
            return Ok(Some(KeyTarget::Node {
                uri: uri.raw.to_string(),
            }));
        }

        if addr.starts_with(&format!("configurators/{}", self.scheme)) {
            let rest = &addr["configurators/".len()..];
            let uri = RawUri::parse(rest)?;
            let path = uri.path.strip_prefix('/').unwrap_or_default();
            let (segment, id) = path
                .split_once('/')
                .ok_or_else(|| RegistryError::uri_parse(rest, "missing configurator kind"))?;
            let kind = ConfigKind::from_segment(segment).ok_or_else(|| {
                RegistryError::uri_parse(rest, format!("unknown configurator kind {}", segment))
            })?;
            let id = urlencoding::decode(id).map_err(|e| RegistryError::uri_parse(rest, e))?;
            return Ok(Some(KeyTarget::Config {
                kind,
                id: id.into_owned(),
                scheme: uri.scheme.to_string(),
                host: uri.host.to_string(),
                uri: uri.raw.to_string(),
            }));
        }

        if utils::is_host_port(addr) {
            return Ok(Some(KeyTarget::Tombstone {
                addr: addr.to_string(),
            }));
        }

        Ok(None)
    }
}

/// 保留原始写法的 URI 视图
///
/// 语法由 [`Url`] 校验，key 与 host 取自原始字符串，
/// 与注册时写入的 `scheme://address` 逐字一致（不补尾部 `/`，不去默认端口）。
struct RawUri<'a> {
    raw: &'a str,
    scheme: &'a str,
    /// 原始 authority 去掉 userinfo，端口原样保留
    host: &'a str,
    /// 不含 query 与 fragment 的原始路径
    path: &'a str,
}

impl<'a> RawUri<'a> {
    fn parse(raw: &'a str) -> Result<Self> {
        if raw.is_empty() {
            return Err(RegistryError::uri_parse(raw, "empty address"));
        }
        Url::parse(raw).map_err(|e| RegistryError::uri_parse(raw, e))?;

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| RegistryError::uri_parse(raw, "missing authority"))?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

        Ok(Self {
            raw,
            scheme,
            host,
            path,
        })
    }
}

fn decode<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(value)?)
}

fn log_skipped(key: &str, err: &RegistryError) {
    error!(kind = %ErrorKind::Uri, key = %key, error = %err, "skip watch event");
}

/// 把事件写入 `endpoints`，返回是否有变化
fn apply_target(endpoints: &mut Endpoints, target: &KeyTarget, event: &WatchEvent) -> Result<bool> {
    match (event.event_type, target) {
        (EventType::Put, KeyTarget::Node { uri }) => {
            let info: ServiceInfo = decode(&event.kv.value)?;
            endpoints.nodes.insert(uri.clone(), info);
            Ok(true)
        }
        (EventType::Delete, KeyTarget::Node { uri }) => Ok(endpoints.nodes.remove(uri).is_some()),
        (
            EventType::Put,
            KeyTarget::Config {
                kind,
                uri,
                id,
                scheme,
                host,
            },
        ) => {
            match kind {
                ConfigKind::Route => {
                    let mut config: RouteConfig = decode(&event.kv.value)?;
                    config.id = id.clone();
                    config.scheme = scheme.clone();
                    config.host = host.clone();
                    endpoints.route_configs.insert(uri.clone(), config);
                }
                ConfigKind::Provider => {
                    let mut config: ProviderConfig = decode(&event.kv.value)?;
                    config.id = id.clone();
                    config.scheme = scheme.clone();
                    config.host = host.clone();
                    endpoints.provider_configs.insert(uri.clone(), config);
                }
                ConfigKind::Consumer => {
                    let mut config: ConsumerConfig = decode(&event.kv.value)?;
                    config.id = id.clone();
                    config.scheme = scheme.clone();
                    config.host = host.clone();
                    endpoints.consumer_configs.insert(uri.clone(), config);
                }
            }
            Ok(true)
        }
        (EventType::Delete, KeyTarget::Config { kind, uri, .. }) => {
            let removed = match kind {
                ConfigKind::Route => endpoints.route_configs.remove(uri).is_some(),
                ConfigKind::Provider => endpoints.provider_configs.remove(uri).is_some(),
                ConfigKind::Consumer => endpoints.consumer_configs.remove(uri).is_some(),
            };
            Ok(removed)
        }
        (EventType::Delete, KeyTarget::Tombstone { addr }) => {
            let node = endpoints.nodes.remove(addr).is_some();
            let route = endpoints.route_configs.remove(addr).is_some();
            Ok(node || route)
        }
        // 墓碑形式的 key 不会携带可用的写入内容
        (EventType::Put, KeyTarget::Tombstone { .. }) => Ok(false),
    }
}

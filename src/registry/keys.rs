//! key 布局
//!
//! | 用途 | key |
//! |---|---|
//! | 业务注册 | `/{prefix}/{service}/providers/{scheme}://{host:port}` |
//! | 指标注册 | `/prometheus/job/{service}/{hostname}` |
//! | 配置 | `/{prefix}/{service}/configurators/{scheme}://{host}/{routes,providers,consumers}/{id}` |

use crate::error::Result;
use crate::types::ServiceInfo;

/// 指标注册的命名空间
pub const METRIC_NAMESPACE: &str = "/prometheus/job";

/// 业务注册 key
pub fn service_key(prefix: &str, info: &ServiceInfo) -> String {
    format!(
        "/{}/{}/providers/{}://{}",
        prefix, info.name, info.scheme, info.address
    )
}

/// 业务注册 value
pub fn service_value(info: &ServiceInfo) -> Result<String> {
    Ok(serde_json::to_string(info)?)
}

/// 指标注册 key
pub fn metric_key(name: &str, hostname: &str) -> String {
    format!("{}/{}/{}", METRIC_NAMESPACE, name, hostname)
}

/// 列举某个服务指定协议的全部节点所用的前缀
pub fn providers_prefix(prefix: &str, name: &str, scheme: &str) -> String {
    format!("/{}/{}/providers/{}://", prefix, name, scheme)
}

/// 监听某个服务所用的前缀
pub fn service_prefix(prefix: &str, name: &str) -> String {
    format!("/{}/{}/", prefix, name)
}

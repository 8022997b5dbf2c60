//! 工具函数模块

/// 本机主机名，取不到时返回 `localhost`
pub fn hostname() -> String {
    ::hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// 拆分 `host:port`，支持 `[ipv6]:port`
///
/// 不做端口合法性校验；包含 `/` 或缺少端口分隔符时返回 `None`
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if addr.contains('/') {
        return None;
    }
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        if port.contains([':', '[', ']']) {
            return None;
        }
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) || port.contains(['[', ']']) {
        return None;
    }
    Some((host, port))
}

/// 是否为 `host:port` 形式
pub fn is_host_port(addr: &str) -> bool {
    split_host_port(addr).is_some()
}

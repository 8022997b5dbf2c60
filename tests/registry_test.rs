//! 注册中心集成测试
//!
//! 使用内存存储驱动完整的注册、发现与关闭流程，不依赖外部 etcd。

use flare_registry_etcd::discovery::SNAPSHOT_BUFFER;
use flare_registry_etcd::store::StoreOp;
use flare_registry_etcd::{
    Endpoints, EtcdRegistry, KvStore, MemoryStore, RegistryConfig, RegistryError,
    RequestContext, ServiceInfo, ServiceKind, ServiceRegistry,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const HELLO_KEY: &str = "/jupiter/hello/providers/grpc://127.0.0.1:9090";

fn setup(ttl: u64) -> (MemoryStore, EtcdRegistry) {
    let store = MemoryStore::new();
    let config = RegistryConfig::new()
        .with_service_ttl(Duration::from_secs(ttl))
        .with_hostname("node-1");
    let registry = EtcdRegistry::with_store(config, Arc::new(store.clone()));
    (store, registry)
}

fn hello(address: &str) -> ServiceInfo {
    ServiceInfo::new("hello", "grpc", address)
}

async fn next_snapshot(rx: &mut mpsc::Receiver<Endpoints>) -> Endpoints {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("snapshot not delivered in time")
        .expect("snapshot channel closed")
}

#[tokio::test]
async fn test_register_list_unregister() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();

    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9091")).await);

    let mut services = assert_ok!(registry.list_services(&ctx, "hello", "grpc").await);
    services.sort_by(|a, b| a.address.cmp(&b.address));
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].address, "127.0.0.1:9090");
    assert_eq!(services[1].address, "127.0.0.1:9091");

    // 其它协议不在结果中
    assert!(assert_ok!(registry.list_services(&ctx, "hello", "http").await).is_empty());

    assert_ok!(registry.unregister_service(&ctx, &hello("127.0.0.1:9090")).await);
    let services = assert_ok!(registry.list_services(&ctx, "hello", "grpc").await);
    assert_eq!(services.len(), 1);
    assert!(assert_ok!(store.get(HELLO_KEY, false).await).is_empty());
}

#[tokio::test]
async fn test_list_skips_undecodable_values() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);
    assert_ok!(
        store
            .put(
                "/jupiter/hello/providers/grpc://127.0.0.1:9999",
                b"{broken".to_vec(),
                None,
            )
            .await
    );

    let services = assert_ok!(registry.list_services(&ctx, "hello", "grpc").await);
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].address, "127.0.0.1:9090");
}

#[tokio::test]
async fn test_list_failure_is_returned() {
    let (store, registry) = setup(0);
    store
        .inject_failure(StoreOp::Get, RegistryError::request("unavailable"))
        .await;
    let err = assert_err!(
        registry
            .list_services(&RequestContext::background(), "hello", "grpc")
            .await
    );
    assert_eq!(err, RegistryError::request("unavailable"));
}

#[tokio::test]
async fn test_register_with_ttl_and_close_removes_key() {
    let (store, registry) = setup(5);
    let ctx = RequestContext::background();
    let info = hello("127.0.0.1:9090");

    assert_ok!(registry.register_service(&ctx, &info).await);
    let kvs = assert_ok!(store.get(HELLO_KEY, false).await);
    assert_eq!(kvs.len(), 1);
    let stored: ServiceInfo = serde_json::from_slice(&kvs[0].value).unwrap();
    assert_eq!(stored, info);
    assert!(store.lease_of(HELLO_KEY).await.is_some());

    assert_ok!(timeout(Duration::from_secs(2), registry.close()).await.unwrap());
    assert!(assert_ok!(store.get(HELLO_KEY, false).await).is_empty());
    assert!(store.live_leases().await.is_empty());
    assert!(registry.registered_keys().is_empty());
}

#[tokio::test]
async fn test_close_keeps_going_after_failed_unregister() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9091")).await);

    store
        .inject_failure(StoreOp::Delete, RegistryError::request("unavailable"))
        .await;
    assert_ok!(registry.close().await);

    // 一个 key 删除失败，另一个仍被清理
    let remaining = assert_ok!(store.get("/jupiter/hello/providers/", true).await);
    assert_eq!(remaining.len(), 1);
    assert_eq!(registry.registered_keys().len(), 1);
}

#[tokio::test]
async fn test_register_failure_is_not_tracked() {
    let (store, registry) = setup(0);
    store
        .inject_failure(StoreOp::Put, RegistryError::request("unavailable"))
        .await;
    let err = assert_err!(
        registry
            .register_service(&RequestContext::background(), &hello("127.0.0.1:9090"))
            .await
    );
    assert!(matches!(err, RegistryError::Register { .. }));
    assert!(registry.registered_keys().is_empty());
}

#[tokio::test]
async fn test_register_with_cancelled_context() {
    let (store, registry) = setup(0);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = RequestContext::background().with_cancel(cancel);

    let err = assert_err!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);
    assert_eq!(err, RegistryError::Cancelled);
    assert!(assert_ok!(store.get(HELLO_KEY, false).await).is_empty());
}

#[tokio::test]
async fn test_reregister_regrants_expired_lease() {
    let (store, registry) = setup(5);
    let ctx = RequestContext::background();
    let info = hello("127.0.0.1:9090");

    assert_ok!(registry.register_service(&ctx, &info).await);
    let first = store.lease_of(HELLO_KEY).await.unwrap();
    assert!(store.expire_lease(first).await);
    assert!(assert_ok!(store.get(HELLO_KEY, false).await).is_empty());

    assert_ok!(registry.register_service(&ctx, &info).await);
    let second = store.lease_of(HELLO_KEY).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(store.grant_count(), 2);
    assert_eq!(assert_ok!(store.get(HELLO_KEY, false).await).len(), 1);
}

#[tokio::test]
async fn test_reregister_reuses_live_lease() {
    let (store, registry) = setup(5);
    let ctx = RequestContext::background();
    let info = hello("127.0.0.1:9090");

    assert_ok!(registry.register_service(&ctx, &info).await);
    assert_ok!(registry.register_service(&ctx, &info.clone().with_metadata("v", "2")).await);
    assert_eq!(store.grant_count(), 1);

    let kvs = assert_ok!(store.get(HELLO_KEY, false).await);
    let stored: ServiceInfo = serde_json::from_slice(&kvs[0].value).unwrap();
    assert_eq!(stored.metadata.get("v").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_governor_registers_metric_key() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();
    let governor = ServiceInfo::new("hello", "http", "127.0.0.1:9091").with_kind(ServiceKind::Governor);

    assert_ok!(registry.register_service(&ctx, &governor).await);
    let metric = assert_ok!(store.get("/prometheus/job/hello/node-1", false).await);
    assert_eq!(metric.len(), 1);
    assert_eq!(metric[0].value_str(), "127.0.0.1:9091");
    assert_eq!(registry.registered_keys().len(), 2);

    assert_ok!(registry.close().await);
    assert!(assert_ok!(store.get("/prometheus/", true).await).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancel_stops_business_renewal_only() {
    let (store, registry) = setup(2);
    let cancel = CancellationToken::new();
    let ctx = RequestContext::background().with_cancel(cancel.clone());
    let governor = ServiceInfo::new("hello", "grpc", "127.0.0.1:9090").with_kind(ServiceKind::Governor);

    assert_ok!(registry.register_service(&ctx, &governor).await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(assert_ok!(store.get(HELLO_KEY, false).await).len(), 1);

    cancel.cancel();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(assert_ok!(store.get(HELLO_KEY, false).await).is_empty());
    assert_eq!(
        assert_ok!(store.get("/prometheus/job/hello/node-1", false).await).len(),
        1
    );

    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_watch_initial_snapshot_and_updates() {
    let (_store, registry) = setup(0);
    let ctx = RequestContext::background();
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);

    let mut rx = assert_ok!(registry.watch_services(&ctx, "hello", "grpc").await);
    let initial = next_snapshot(&mut rx).await;
    assert_eq!(initial.nodes.len(), 1);
    assert!(initial.nodes.contains_key("grpc://127.0.0.1:9090"));

    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9091")).await);
    let added = next_snapshot(&mut rx).await;
    assert_eq!(added.nodes.len(), 2);

    assert_ok!(registry.unregister_service(&ctx, &hello("127.0.0.1:9090")).await);
    let removed = next_snapshot(&mut rx).await;
    assert_eq!(removed.nodes.len(), 1);
    assert!(removed.nodes.contains_key("grpc://127.0.0.1:9091"));

    // 已发出的快照不受后续事件影响
    assert_eq!(initial.nodes.len(), 1);
    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_watch_empty_service_gets_empty_snapshot() {
    let (_store, registry) = setup(0);
    let mut rx = assert_ok!(
        registry
            .watch_services(&RequestContext::background(), "nobody", "grpc")
            .await
    );
    assert!(next_snapshot(&mut rx).await.is_empty());
    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_watch_route_configurator() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();
    let mut rx = assert_ok!(registry.watch_services(&ctx, "hello", "grpc").await);
    assert!(next_snapshot(&mut rx).await.is_empty());

    let key = "/jupiter/hello/configurators/grpc://127.0.0.1/routes/1";
    let body = r#"{"upstream":{"nodes":{"127.0.0.1:1980":1}},"uri":"/hello","deployment":"core_api"}"#;
    assert_ok!(store.put(key, body.as_bytes().to_vec(), None).await);

    let snapshot = next_snapshot(&mut rx).await;
    let route = &snapshot.route_configs["grpc://127.0.0.1/routes/1"];
    assert_eq!(route.id, "1");
    assert_eq!(route.scheme, "grpc");
    assert_eq!(route.host, "127.0.0.1");
    assert_eq!(route.deployment, "core_api");
    assert_eq!(route.upstream.nodes.get("127.0.0.1:1980"), Some(&1));

    assert_ok!(store.delete(key).await);
    assert!(next_snapshot(&mut rx).await.route_configs.is_empty());
    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_watch_ignores_other_scheme_and_bad_keys() {
    let (store, registry) = setup(0);
    let ctx = RequestContext::background();
    let mut rx = assert_ok!(registry.watch_services(&ctx, "hello", "grpc").await);
    next_snapshot(&mut rx).await;

    let http = ServiceInfo::new("hello", "http", "127.0.0.1:8080");
    assert_ok!(registry.register_service(&ctx, &http).await);
    assert_ok!(
        store
            .put(
                "/jupiter/hello/configurators/grpc://127.0.0.1/unknown/1",
                b"{}".to_vec(),
                None,
            )
            .await
    );
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:9090")).await);

    // 只有 grpc 节点的写入产生快照
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.nodes.len(), 1);
    assert!(snapshot.route_configs.is_empty());
    assert!(rx.try_recv().is_err());
    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_slow_consumer_does_not_block_watch() {
    let (_store, registry) = setup(0);
    let ctx = RequestContext::background();
    let mut rx = assert_ok!(registry.watch_services(&ctx, "hello", "grpc").await);

    let total = SNAPSHOT_BUFFER + 5;
    for i in 0..total {
        let address = format!("127.0.0.1:{}", 9000 + i);
        assert_ok!(registry.register_service(&ctx, &hello(&address)).await);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert!(received <= SNAPSHOT_BUFFER);

    // 丢弃的是快照而不是状态，下一份快照包含全部节点
    assert_ok!(registry.register_service(&ctx, &hello("127.0.0.1:8999")).await);
    let latest = next_snapshot(&mut rx).await;
    assert_eq!(latest.nodes.len(), total + 1);
    assert_ok!(registry.close().await);
}

#[tokio::test]
async fn test_dropped_receiver_stops_watch_task() {
    let (_store, registry) = setup(0);
    let ctx = RequestContext::background();
    let rx = assert_ok!(registry.watch_services(&ctx, "hello", "grpc").await);
    assert_eq!(registry.active_watches(), 1);

    drop(rx);
    timeout(Duration::from_secs(1), async {
        while registry.active_watches() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("watch task still running");
}

#[tokio::test]
async fn test_watch_failure_is_returned() {
    let (store, registry) = setup(0);
    store
        .inject_failure(StoreOp::Watch, RegistryError::request("unavailable"))
        .await;
    let res = registry
        .watch_services(&RequestContext::background(), "hello", "grpc")
        .await;
    assert_eq!(res.err(), Some(RegistryError::request("unavailable")));
}

#[tokio::test]
async fn test_watch_http_nodes_keyed_by_service_uri() {
    let (_store, registry) = setup(0);
    let ctx = RequestContext::background();
    let mut rx = assert_ok!(registry.watch_services(&ctx, "hello", "http").await);
    next_snapshot(&mut rx).await;

    let info = ServiceInfo::new("hello", "http", "127.0.0.1:80");
    assert_ok!(registry.register_service(&ctx, &info).await);
    let snapshot = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.nodes.get(&info.uri()), Some(&info));

    assert_ok!(registry.unregister_service(&ctx, &info).await);
    assert!(next_snapshot(&mut rx).await.nodes.is_empty());
    assert_ok!(registry.close().await);
}

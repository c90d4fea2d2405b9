use axum::{Router, http::StatusCode, routing::get};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use push_registry::config::{Config, HeartbeatSettings};
use push_registry::server;
use push_registry::services::client::{ClientError, RegistryClient, ServiceHost};
use push_registry::services::registry::{Patch, PatchEntry, Registration, RegistryState, ServiceName};

struct TestRegistry {
    services_url: String,
    state: RegistryState,
    shutdown: CancellationToken,
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_registry() -> TestRegistry {
    let config = Config {
        heartbeat: HeartbeatSettings {
            interval_secs: 3600,
            max_attempts: 3,
            retry_interval_ms: 20,
            recovery_cycles: 2,
        },
        ..Default::default()
    };
    let state = server::build_state(&config).expect("Failed to build registry state");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(server::serve(listener, state.clone(), async move {
        token.cancelled().await
    }));

    TestRegistry {
        services_url: format!("http://{addr}/services"),
        state,
        shutdown,
    }
}

async fn start_service(registry: &TestRegistry, name: ServiceName, required: Vec<ServiceName>) -> ServiceHost {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registration = Registration::new(name, format!("http://{addr}"), required);
    let client = RegistryClient::connect(&registry.services_url).unwrap();
    ServiceHost::start(listener, registration, Router::new(), client)
        .await
        .expect("Failed to start service")
}

// 心跳可切换的服务，不使用 ServiceHost，便于模拟故障
async fn start_flaky_service(healthy: Arc<AtomicBool>) -> String {
    let app = Router::new().route(
        "/heartbeat",
        get(move || {
            let healthy = healthy.clone();
            async move {
                if healthy.load(Ordering::SeqCst) {
                    StatusCode::OK
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !check().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

#[tokio::test]
async fn test_catch_up_removal_and_reregistration() {
    let registry = start_registry().await;

    let provider = start_service(&registry, ServiceName::Log, vec![]).await;
    let provider_url = provider.registration().service_url.clone();
    let dependent = start_service(&registry, ServiceName::Grading, vec![ServiceName::Log]).await;

    // 追赶补丁在注册返回前已送达
    assert_eq!(dependent.cache().providers(ServiceName::Log).await, vec![provider_url.clone()]);
    assert_eq!(dependent.provider(ServiceName::Log).await.unwrap(), provider_url);

    provider.shutdown().await.expect("Failed to deregister provider");
    assert!(dependent.cache().providers(ServiceName::Log).await.is_empty());
    assert!(matches!(
        dependent.provider(ServiceName::Log).await,
        Err(ClientError::NoProviders(ServiceName::Log))
    ));

    let provider = start_service(&registry, ServiceName::Log, vec![]).await;
    assert_eq!(
        dependent.cache().providers(ServiceName::Log).await,
        vec![provider.registration().service_url.clone()]
    );
    assert_eq!(registry.state.store.len().await, 2);

    dependent.shutdown().await.unwrap();
    provider.shutdown().await.unwrap();
    assert!(registry.state.store.is_empty().await);
}

#[tokio::test]
async fn test_provider_registering_later_is_broadcast() {
    let registry = start_registry().await;

    let dependent = start_service(&registry, ServiceName::Portal, vec![ServiceName::Grading]).await;
    assert!(dependent.provider(ServiceName::Grading).await.is_err());

    let first = start_service(&registry, ServiceName::Grading, vec![]).await;
    let second = start_service(&registry, ServiceName::Grading, vec![]).await;

    let mut providers = dependent.cache().providers(ServiceName::Grading).await;
    providers.sort();
    let mut expected = vec![
        first.registration().service_url.clone(),
        second.registration().service_url.clone(),
    ];
    expected.sort();
    assert_eq!(providers, expected);

    // 无关的服务名不会出现在缓存中
    assert!(first.cache().providers(ServiceName::Portal).await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_failure_propagates_to_dependents() {
    let registry = start_registry().await;

    let healthy = Arc::new(AtomicBool::new(true));
    let provider_url = start_flaky_service(healthy.clone()).await;
    let client = RegistryClient::connect(&registry.services_url).unwrap();
    client
        .register(&Registration::new(ServiceName::Log, provider_url.clone(), vec![]))
        .await
        .unwrap();

    let dependent = start_service(&registry, ServiceName::Grading, vec![ServiceName::Log]).await;
    assert_eq!(dependent.cache().providers(ServiceName::Log).await, vec![provider_url.clone()]);

    healthy.store(false, Ordering::SeqCst);
    registry.state.monitor.run_cycle().await;
    assert!(!registry.state.store.contains(&provider_url).await);
    assert!(dependent.cache().providers(ServiceName::Log).await.is_empty());

    healthy.store(true, Ordering::SeqCst);
    registry.state.monitor.run_cycle().await;
    assert!(registry.state.store.contains(&provider_url).await);
    assert_eq!(dependent.cache().providers(ServiceName::Log).await, vec![provider_url.clone()]);
}

#[tokio::test]
async fn test_deregistering_evicted_service_is_not_resurrected() {
    let registry = start_registry().await;

    let healthy = Arc::new(AtomicBool::new(false));
    let provider_url = start_flaky_service(healthy.clone()).await;
    let client = RegistryClient::connect(&registry.services_url).unwrap();
    client
        .register(&Registration::new(ServiceName::Log, provider_url.clone(), vec![]))
        .await
        .unwrap();

    registry.state.monitor.run_cycle().await;
    assert!(!registry.state.store.contains(&provider_url).await);

    // 已被心跳摘除的服务主动注销仍然成功
    client.deregister(&provider_url).await.unwrap();

    healthy.store(true, Ordering::SeqCst);
    registry.state.monitor.run_cycle().await;
    assert!(!registry.state.store.contains(&provider_url).await);
}

#[tokio::test]
async fn test_recovered_dependent_drops_providers_removed_while_evicted() {
    let registry = start_registry().await;

    let provider = start_service(&registry, ServiceName::Log, vec![]).await;
    let provider_url = provider.registration().service_url.clone();

    // 依赖方自己提供更新接口，心跳则由可切换的服务应答
    let healthy = Arc::new(AtomicBool::new(true));
    let heartbeat_base = start_flaky_service(healthy.clone()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut registration = Registration::new(ServiceName::Grading, format!("http://{addr}"), vec![ServiceName::Log]);
    registration.heartbeat_url = format!("{heartbeat_base}/heartbeat");
    let client = RegistryClient::connect(&registry.services_url).unwrap();
    let dependent = ServiceHost::start(listener, registration, Router::new(), client)
        .await
        .expect("Failed to start dependent");
    assert_eq!(dependent.cache().providers(ServiceName::Log).await, vec![provider_url.clone()]);

    healthy.store(false, Ordering::SeqCst);
    registry.state.monitor.run_cycle().await;
    let dependent_url = dependent.registration().service_url.clone();
    assert!(!registry.state.store.contains(&dependent_url).await);

    // 摘除期间提供者下线，撤销不会推送给依赖方
    provider.shutdown().await.expect("Failed to deregister provider");
    assert_eq!(dependent.cache().providers(ServiceName::Log).await, vec![provider_url.clone()]);

    healthy.store(true, Ordering::SeqCst);
    registry.state.monitor.run_cycle().await;
    assert!(registry.state.store.contains(&dependent_url).await);

    let cache = dependent.cache().clone();
    eventually(|| {
        let cache = cache.clone();
        async move { cache.providers(ServiceName::Log).await.is_empty() }
    })
    .await;
    assert!(matches!(
        dependent.provider(ServiceName::Log).await,
        Err(ClientError::NoProviders(ServiceName::Log))
    ));
}

#[tokio::test]
async fn test_sequence_gap_triggers_resync() {
    let registry = start_registry().await;

    let provider = start_service(&registry, ServiceName::Log, vec![]).await;
    let provider_url = provider.registration().service_url.clone();
    let dependent = start_service(&registry, ServiceName::Grading, vec![ServiceName::Log]).await;

    // 伪造一个跳号的补丁，带入一个不存在的提供者
    let mut patch = Patch::added(vec![PatchEntry::new(ServiceName::Log, "http://127.0.0.1:1")]);
    patch.registry_id = Some(registry.state.store.notifier().registry_id());
    patch.sequence = 10;
    let resp = reqwest::Client::new()
        .post(&dependent.registration().service_update_url)
        .json(&patch)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let cache = dependent.cache().clone();
    eventually(|| {
        let cache = cache.clone();
        let provider_url = provider_url.clone();
        async move { cache.providers(ServiceName::Log).await == vec![provider_url] }
    })
    .await;
}

#[tokio::test]
async fn test_registration_fails_without_registry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registration = Registration::new(ServiceName::Log, format!("http://{addr}"), vec![]);
    let client = RegistryClient::connect("http://127.0.0.1:1/services").unwrap();

    let result = ServiceHost::start(listener, registration, Router::new(), client).await;
    assert!(matches!(result, Err(ClientError::Http(_))));
}

#[tokio::test]
async fn test_rejected_registration_is_withdrawn() {
    let registry = start_registry().await;

    // 一个更新地址不可达的依赖方，之后对它的广播都会失败
    let client = RegistryClient::connect(&registry.services_url).unwrap();
    client
        .register(&Registration::new(
            ServiceName::Grading,
            "http://127.0.0.1:1",
            vec![ServiceName::Log],
        ))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let service_url = format!("http://{}", listener.local_addr().unwrap());
    let registration = Registration::new(ServiceName::Log, service_url.clone(), vec![]);

    let result = ServiceHost::start(listener, registration, Router::new(), client).await;
    assert!(matches!(result, Err(ClientError::Status { status: 400, .. })));
    assert!(!registry.state.store.contains(&service_url).await);
    assert_eq!(registry.state.store.len().await, 1);
}

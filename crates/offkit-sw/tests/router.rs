//! End-to-end router tests: install, activation eviction, and the three
//! routing strategies across both caching revisions, driven by a
//! scriptable in-memory network.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use http::Method;
use url::Url;

use offkit_cache::{CacheStorage, RequestKey, ResponseSnapshot};
use offkit_sw::{
    CacheStrategy, FetchError, FetchEvent, Network, NetworkResponse, OfflineRouter, RouteOutcome,
    RouterConfig, SENTINEL_STATUS,
};

/// In-memory network with scriptable routes and an offline switch.
#[derive(Default)]
struct ScriptedNetwork {
    online: AtomicBool,
    routes: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl ScriptedNetwork {
    fn online() -> Arc<Self> {
        let net = Arc::new(Self::default());
        net.online.store(true, Ordering::Release);
        net
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    fn route(&self, url: &str, content_type: &str, body: &[u8]) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            (content_type.to_string(), body.to_vec()),
        );
    }
}

impl Network for ScriptedNetwork {
    fn fetch(
        &self,
        event: &FetchEvent,
    ) -> impl Future<Output = Result<NetworkResponse, FetchError>> + Send {
        let result = if !self.online.load(Ordering::Acquire) {
            Err(FetchError::Unreachable("offline".to_string()))
        } else {
            match self.routes.lock().unwrap().get(event.url.as_str()) {
                Some((content_type, body)) => {
                    Ok(NetworkResponse::ok(content_type, body.clone()))
                }
                None => Err(FetchError::RequestFailed(format!(
                    "no route for {}",
                    event.url
                ))),
            }
        };
        std::future::ready(result)
    }
}

struct Fixture {
    net: Arc<ScriptedNetwork>,
    storage: Arc<CacheStorage>,
    router: OfflineRouter<Arc<ScriptedNetwork>>,
}

fn scope() -> Url {
    Url::parse("https://app.example/").unwrap()
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn fixture(strategy: CacheStrategy) -> Fixture {
    let net = ScriptedNetwork::online();
    net.route("https://app.example/favicon.ico", "image/x-icon", b"icon");
    net.route(
        "https://app.example/offline.html",
        "text/html",
        b"<h1>offline</h1>",
    );
    net.route("https://app.example/offline.css", "text/css", b"body{}");

    let version = match strategy {
        CacheStrategy::Conservative => 1,
        CacheStrategy::SelfHealing => 2,
    };
    let storage = Arc::new(CacheStorage::new());
    let router = OfflineRouter::new(
        RouterConfig::new(scope(), version, strategy),
        Arc::clone(&storage),
        Arc::clone(&net),
    );
    Fixture {
        net,
        storage,
        router,
    }
}

fn body(outcome: RouteOutcome) -> Vec<u8> {
    match outcome {
        RouteOutcome::Response(resp) => resp.body,
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn install_populates_current_bucket() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.router.on_install().await.unwrap();

    let bucket = f.storage.open("offline_v2").await;
    assert_eq!(bucket.len().await, 3);
    for path in ["favicon.ico", "offline.html", "offline.css"] {
        let key = RequestKey::get(url(&format!("https://app.example/{path}")));
        assert!(bucket.matching(&key).await.is_some(), "missing {path}");
    }
}

#[tokio::test]
async fn activation_evicts_stale_buckets() {
    let f = fixture(CacheStrategy::SelfHealing);

    // A prior revision's bucket exists before activation.
    let stale = f.storage.open("offline_v1").await;
    stale
        .put(
            &RequestKey::get(url("https://app.example/old.js")),
            ResponseSnapshot::ok("text/javascript", vec![]),
        )
        .await;
    f.router.on_install().await.unwrap();

    let evicted = f.router.on_activate().await;
    assert_eq!(evicted, vec!["offline_v1".to_string()]);
    assert_eq!(f.storage.names().await, vec!["offline_v2".to_string()]);
}

#[tokio::test]
async fn subresource_success_returns_live_response() {
    let f = fixture(CacheStrategy::Conservative);
    f.net
        .route("https://app.example/app.js", "text/javascript", b"live");

    let event = FetchEvent::subresource(Method::GET, url("https://app.example/app.js"));
    assert_eq!(body(f.router.handle_fetch(&event).await), b"live".to_vec());

    // Conservative never writes live traffic into the cache.
    let bucket = f.storage.open("offline_v1").await;
    assert!(bucket.matching(&event.key()).await.is_none());
}

#[tokio::test]
async fn self_healing_subresource_success_updates_cache() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.net
        .route("https://app.example/app.js", "text/javascript", b"live");

    let event = FetchEvent::subresource(Method::GET, url("https://app.example/app.js"));
    assert_eq!(body(f.router.handle_fetch(&event).await), b"live".to_vec());

    // The cache now equals the live response.
    let bucket = f.storage.open("offline_v2").await;
    let cached = bucket.matching(&event.key()).await.unwrap();
    assert_eq!(cached.body, b"live".to_vec());
}

#[tokio::test]
async fn subresource_failure_serves_cached_entry() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.net
        .route("https://app.example/app.js", "text/javascript", b"v1");

    let event = FetchEvent::subresource(Method::GET, url("https://app.example/app.js"));
    f.router.handle_fetch(&event).await;

    f.net.set_online(false);
    assert_eq!(body(f.router.handle_fetch(&event).await), b"v1".to_vec());
}

#[tokio::test]
async fn conservative_subresource_miss_is_unavailable() {
    let f = fixture(CacheStrategy::Conservative);
    f.net.set_online(false);

    let event = FetchEvent::subresource(Method::GET, url("https://app.example/never-seen.js"));
    assert_eq!(f.router.handle_fetch(&event).await, RouteOutcome::Unavailable);
}

#[tokio::test]
async fn self_healing_subresource_double_miss_serves_error_page() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.net.set_online(false);

    let event = FetchEvent::subresource(Method::GET, url("https://app.example/never-seen.js"));
    match f.router.handle_fetch(&event).await {
        RouteOutcome::Response(resp) => {
            assert_eq!(resp.status, 503);
            assert_eq!(resp.content_type(), Some("text/plain"));
        }
        other => panic!("expected error page, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_navigation_serves_fallback_page() {
    for strategy in [CacheStrategy::Conservative, CacheStrategy::SelfHealing] {
        let f = fixture(strategy);
        f.router.on_install().await.unwrap();
        f.net.set_online(false);

        let event = FetchEvent::navigation(url("https://app.example/deep/page"));
        assert_eq!(
            body(f.router.handle_fetch(&event).await),
            b"<h1>offline</h1>".to_vec(),
            "strategy {strategy:?}"
        );
    }
}

#[tokio::test]
async fn self_healing_navigation_prefers_exact_cached_page() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.router.on_install().await.unwrap();
    f.net
        .route("https://app.example/article", "text/html", b"<article>");

    // First visit online populates the cache for this navigation.
    let event = FetchEvent::navigation(url("https://app.example/article"));
    f.router.handle_fetch(&event).await;

    // Offline revisit is served from the exact entry, not the fallback.
    f.net.set_online(false);
    assert_eq!(
        body(f.router.handle_fetch(&event).await),
        b"<article>".to_vec()
    );
}

#[tokio::test]
async fn conservative_navigation_never_caches_live_pages() {
    let f = fixture(CacheStrategy::Conservative);
    f.router.on_install().await.unwrap();
    f.net
        .route("https://app.example/article", "text/html", b"<article>");

    let event = FetchEvent::navigation(url("https://app.example/article"));
    f.router.handle_fetch(&event).await;

    // Offline revisit falls back to the offline page.
    f.net.set_online(false);
    assert_eq!(
        body(f.router.handle_fetch(&event).await),
        b"<h1>offline</h1>".to_vec()
    );
}

#[tokio::test]
async fn external_host_failure_serves_sentinel() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.net.set_online(false);

    let event = FetchEvent::subresource(
        Method::GET,
        url("https://some.external.host.com/api/items"),
    );
    match f.router.handle_fetch(&event).await {
        RouteOutcome::Response(resp) => {
            assert_eq!(resp.status, SENTINEL_STATUS);
            assert_eq!(resp.content_type(), Some("application/json"));
            assert_eq!(resp.body, b"{}".to_vec());
        }
        other => panic!("expected sentinel, got {other:?}"),
    }
}

#[tokio::test]
async fn external_host_success_passes_through() {
    let f = fixture(CacheStrategy::SelfHealing);
    f.net.route(
        "https://some.external.host.com/api/items",
        "application/json",
        br#"{"items":[]}"#,
    );

    let event = FetchEvent::subresource(
        Method::GET,
        url("https://some.external.host.com/api/items"),
    );
    assert_eq!(
        body(f.router.handle_fetch(&event).await),
        br#"{"items":[]}"#.to_vec()
    );
}

#[tokio::test]
async fn concrete_offline_deployment_scenario() {
    // Pre-cache [favicon.ico, offline.html, offline.css] at version 2,
    // with a stale offline_v1 bucket present before activation.
    let f = fixture(CacheStrategy::SelfHealing);
    f.storage.open("offline_v1").await;

    f.router.on_install().await.unwrap();
    let bucket = f.storage.open("offline_v2").await;
    for path in ["favicon.ico", "offline.html", "offline.css"] {
        let key = RequestKey::get(url(&format!("https://app.example/{path}")));
        assert!(bucket.matching(&key).await.is_some(), "missing {path}");
    }

    f.router.on_activate().await;
    assert_eq!(f.storage.names().await, vec!["offline_v2".to_string()]);

    // Offline: navigation yields the fallback page, external GETs yield
    // the 599 sentinel.
    f.net.set_online(false);
    let nav = FetchEvent::navigation(url("https://app.example/somewhere"));
    assert_eq!(
        body(f.router.handle_fetch(&nav).await),
        b"<h1>offline</h1>".to_vec()
    );

    let ext = FetchEvent::subresource(
        Method::GET,
        url("https://some.external.host.com/api/items"),
    );
    match f.router.handle_fetch(&ext).await {
        RouteOutcome::Response(resp) => {
            assert_eq!(resp.status, SENTINEL_STATUS);
            assert_eq!(resp.body, b"{}".to_vec());
        }
        other => panic!("expected sentinel, got {other:?}"),
    }
}

#[tokio::test]
async fn install_failure_is_atomic_and_settles() {
    let f = fixture(CacheStrategy::SelfHealing);
    // One pre-cache resource disappears from the network.
    f.net.routes.lock().unwrap().remove("https://app.example/offline.css");

    assert!(f.router.on_install().await.is_err());
    let bucket = f.storage.open("offline_v2").await;
    assert!(bucket.is_empty().await);
}

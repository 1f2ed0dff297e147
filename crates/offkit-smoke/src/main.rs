//! OffKit Smoke Harness
//!
//! Drives the offline response router through install, activation, and a
//! scripted online/offline fetch sequence for both caching revisions,
//! exercises a failing install, then walks the install-promotion
//! controller through an offer and an accepted prompt. Prints a JSON
//! summary of every step.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use http::Method;
use serde_json::json;
use tracing::info;
use url::Url;

use offkit_cache::{CacheStorage, RequestKey};
use offkit_common::{
    init_logging, LogConfig, OffkitError, OptionExt, Result, ResultExt,
};
use offkit_install::{
    DeferredPrompt, InstallPromotion, InstallableOffer, PromotionUi, PromptOutcome,
};
use offkit_sw::{
    CacheStrategy, FetchError, FetchEvent, Network, NetworkResponse, OfflineRouter, RouteOutcome,
    RouterConfig,
};

/// In-memory network with a flip switch for going offline.
#[derive(Default)]
struct FakeNetwork {
    online: AtomicBool,
    routes: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl FakeNetwork {
    fn new() -> Arc<Self> {
        let net = Arc::new(Self::default());
        net.online.store(true, Ordering::Release);
        net.route("https://app.example/favicon.ico", "image/x-icon", b"icon");
        net.route(
            "https://app.example/offline.html",
            "text/html",
            b"<h1>You are offline</h1>",
        );
        net.route("https://app.example/offline.css", "text/css", b"body{}");
        net.route("https://app.example/", "text/html", b"<h1>Home</h1>");
        net.route(
            "https://app.example/app.js",
            "text/javascript",
            b"console.log('hi')",
        );
        net.route(
            "https://some.external.host.com/api/items",
            "application/json",
            br#"{"items":[1,2,3]}"#,
        );
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

    fn drop_route(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }
}

impl Network for FakeNetwork {
    fn fetch(
        &self,
        event: &FetchEvent,
    ) -> impl Future<Output = std::result::Result<NetworkResponse, FetchError>> + Send {
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

/// Console-logging stand-in for the promotional page element.
struct ConsoleUi;

impl PromotionUi for ConsoleUi {
    fn show(&mut self) {
        info!("install promotion shown");
    }

    fn hide(&mut self) {
        info!("install promotion hidden");
    }
}

fn outcome_json(outcome: &RouteOutcome) -> serde_json::Value {
    match outcome {
        RouteOutcome::Default => json!({"outcome": "default"}),
        RouteOutcome::Unavailable => json!({"outcome": "unavailable"}),
        RouteOutcome::Response(resp) => json!({
            "outcome": "response",
            "status": resp.status,
            "content_type": resp.content_type(),
            "body_len": resp.body.len(),
        }),
    }
}

async fn run_revision(strategy: CacheStrategy) -> Result<serde_json::Value> {
    let scope = Url::parse("https://app.example/").expect("static scope URL");
    let version = match strategy {
        CacheStrategy::Conservative => 1,
        CacheStrategy::SelfHealing => 2,
    };
    let net = FakeNetwork::new();
    let storage = Arc::new(CacheStorage::new());

    // A stale bucket from an earlier deployment, due for eviction.
    storage.open("offline_v0").await;

    let router = OfflineRouter::new(
        RouterConfig::new(scope, version, strategy),
        Arc::clone(&storage),
        Arc::clone(&net),
    );

    router
        .on_install()
        .await
        .map_err(|e| OffkitError::lifecycle_with_source("worker install failed", e))?;
    let evicted = router.on_activate().await;

    // The offline page must be retrievable from the fresh bucket.
    let bucket = storage.open(&router.config().bucket_name()).await;
    let fallback_url =
        Url::parse("https://app.example/offline.html").expect("static URL");
    bucket
        .matching(&RequestKey::get(fallback_url))
        .await
        .ok_or_not_found("offline.html")?;

    let nav = FetchEvent::navigation(Url::parse("https://app.example/").expect("static URL"));
    let sub = FetchEvent::subresource(
        Method::GET,
        Url::parse("https://app.example/app.js").expect("static URL"),
    );
    let ext = FetchEvent::subresource(
        Method::GET,
        Url::parse("https://some.external.host.com/api/items").expect("static URL"),
    );

    let online_nav = router.handle_fetch(&nav).await;
    let online_sub = router.handle_fetch(&sub).await;
    let online_ext = router.handle_fetch(&ext).await;

    net.set_online(false);
    let offline_nav = router.handle_fetch(&nav).await;
    let offline_sub = router.handle_fetch(&sub).await;
    let offline_ext = router.handle_fetch(&ext).await;

    Ok(json!({
        "strategy": format!("{strategy:?}"),
        "bucket": router.config().bucket_name(),
        "evicted": evicted,
        "online": {
            "navigation": outcome_json(&online_nav),
            "subresource": outcome_json(&online_sub),
            "external": outcome_json(&online_ext),
        },
        "offline": {
            "navigation": outcome_json(&offline_nav),
            "subresource": outcome_json(&offline_sub),
            "external": outcome_json(&offline_ext),
        },
    }))
}

/// Install with a pre-cache resource missing from the network: the
/// lifecycle error surfaces through the unified error type.
async fn run_failed_install() -> serde_json::Value {
    let scope = Url::parse("https://app.example/").expect("static scope URL");
    let net = FakeNetwork::new();
    net.drop_route("https://app.example/offline.css");

    let router = OfflineRouter::new(
        RouterConfig::revision_2(scope),
        Arc::new(CacheStorage::new()),
        net,
    );

    match router.on_install().await {
        Ok(()) => json!({"installed": true}),
        Err(e) => {
            let err = OffkitError::lifecycle_with_source("worker install failed", e);
            json!({
                "installed": false,
                "category": err.category(),
                "error": err.to_string(),
            })
        }
    }
}

async fn run_promotion() -> Result<serde_json::Value> {
    let mut promotion = InstallPromotion::new(Some(ConsoleUi));

    let (prompt, host) = DeferredPrompt::channel();
    let (offer, suppressed) = InstallableOffer::new(prompt);
    promotion.on_installable(offer);

    // The "user" accepts as soon as the prompt appears.
    let user = tokio::spawn(async move {
        if host.shown.await.is_ok() {
            let _ = host.choice.send(PromptOutcome::Accepted);
        }
    });

    let outcome = promotion
        .on_promotion_activated()
        .await
        .map_err(|e| OffkitError::install_with_source("install prompt failed", e))?;
    let _ = user.await;

    Ok(json!({
        "default_suppressed": suppressed.load(Ordering::Acquire),
        "outcome": format!("{outcome:?}"),
        "pending_after": promotion.has_pending_offer(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig::default());

    let conservative = run_revision(CacheStrategy::Conservative).await?;
    let self_healing = run_revision(CacheStrategy::SelfHealing).await?;
    let failed_install = run_failed_install().await;
    let promotion = run_promotion().await?;

    let summary = json!({
        "revisions": [conservative, self_healing],
        "failed_install": failed_install,
        "install_promotion": promotion,
    });
    let rendered =
        serde_json::to_string_pretty(&summary).context("serializing summary")?;
    println!("{rendered}");
    Ok(())
}

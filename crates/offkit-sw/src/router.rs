//! The offline response router: ordered rule dispatch, caching
//! strategies, and the worker install/activate lifecycle.

use std::sync::Arc;
use tracing::{debug, info, warn};

use offkit_cache::{CacheStorage, RequestKey, ResponseSnapshot};

use crate::{
    CacheStrategy, FetchEvent, LifecycleError, Network, RouterConfig, SENTINEL_STATUS,
};

/// Strategy selected for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// R1: serve the network, fall back to the offline page.
    NavigateOrOffline,
    /// R2: serve the network, fall back to the cached entry.
    CacheAwareFetch,
    /// R3: serve the network, fall back to the fixed sentinel.
    NetworkOrSentinel,
}

/// Outcome of routing an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The router declined the request; the host's default handling
    /// proceeds untouched.
    Default,
    /// The router produced a response.
    Response(ResponseSnapshot),
    /// The router owned the request but has nothing to serve
    /// (conservative subresource miss while offline).
    Unavailable,
}

/// The fixed substitute for failed calls to the designated external
/// host: empty JSON object, status 599.
pub fn sentinel_response() -> ResponseSnapshot {
    ResponseSnapshot::synthetic(
        SENTINEL_STATUS,
        "application/json",
        serde_json::json!({}).to_string().into_bytes(),
    )
}

/// Generic offline error page, served when both the cache and the
/// network come up empty on a path that must still yield a response.
pub fn offline_error_response() -> ResponseSnapshot {
    ResponseSnapshot::synthetic(503, "text/plain", b"offline".to_vec())
}

/// The offline response router.
///
/// Holds the deployment configuration, the bucket store, and the host's
/// network primitive. Each intercepted request is classified by one
/// ordered rule table; at most one strategy handles it.
pub struct OfflineRouter<N: Network> {
    config: RouterConfig,
    storage: Arc<CacheStorage>,
    network: N,
}

impl<N: Network> OfflineRouter<N> {
    /// Create a router.
    pub fn new(config: RouterConfig, storage: Arc<CacheStorage>, network: N) -> Self {
        Self {
            config,
            storage,
            network,
        }
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Decide synchronously which strategy, if any, owns this request.
    ///
    /// `None` means the router declines and the host's default handling
    /// proceeds.
    pub fn classify(&self, event: &FetchEvent) -> Option<Strategy> {
        if event.is_navigation() {
            return Some(Strategy::NavigateOrOffline);
        }
        let external = event.host() == Some(self.config.external_host.as_str());
        if !external {
            return Some(Strategy::CacheAwareFetch);
        }
        if event.method == http::Method::GET {
            return Some(Strategy::NetworkOrSentinel);
        }
        None
    }

    /// Route an intercepted request.
    ///
    /// Never surfaces an error to the requester: every failure path is
    /// a single fallback to cached content, the offline page, or the
    /// sentinel.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> RouteOutcome {
        let strategy = match self.classify(event) {
            Some(s) => s,
            None => {
                debug!(url = %event.url, "request declined, default handling");
                return RouteOutcome::Default;
            }
        };
        debug!(url = %event.url, strategy = ?strategy, "routing request");

        match strategy {
            Strategy::NavigateOrOffline => self.navigate_or_offline(event).await,
            Strategy::CacheAwareFetch => self.cache_aware_fetch(event).await,
            Strategy::NetworkOrSentinel => self.network_or_sentinel(event).await,
        }
    }

    /// R1: try the network; offline falls back to the cached entry
    /// (self-healing only) and then the offline page.
    async fn navigate_or_offline(&self, event: &FetchEvent) -> RouteOutcome {
        let bucket = self.storage.open(&self.config.bucket_name()).await;

        match self.network.fetch(event).await {
            Ok(live) => {
                if self.config.strategy == CacheStrategy::SelfHealing {
                    // Clone before delivery; the live response is
                    // consumed by the requester.
                    bucket.put(&event.key(), live.snapshot()).await;
                }
                RouteOutcome::Response(live.into_snapshot())
            }
            Err(err) => {
                debug!(url = %event.url, error = %err, "navigation fetch failed, serving offline");
                if self.config.strategy == CacheStrategy::SelfHealing {
                    if let Some(cached) = bucket.matching(&event.key()).await {
                        return RouteOutcome::Response(cached);
                    }
                }
                match self.fallback_page().await {
                    Some(page) => RouteOutcome::Response(page),
                    None => {
                        warn!(url = %event.url, "offline page not cached, serving error page");
                        RouteOutcome::Response(offline_error_response())
                    }
                }
            }
        }
    }

    /// R2: read the cached entry, try the network, and in the
    /// self-healing revision write the fresh response back.
    async fn cache_aware_fetch(&self, event: &FetchEvent) -> RouteOutcome {
        let bucket = self.storage.open(&self.config.bucket_name()).await;
        let key = event.key();
        let cached = bucket.matching(&key).await;

        match self.network.fetch(event).await {
            Ok(live) => {
                if self.config.strategy == CacheStrategy::SelfHealing {
                    bucket.put(&key, live.snapshot()).await;
                }
                RouteOutcome::Response(live.into_snapshot())
            }
            Err(err) => {
                debug!(url = %event.url, error = %err, "subresource fetch failed, serving cache");
                match (cached, self.config.strategy) {
                    (Some(entry), _) => RouteOutcome::Response(entry),
                    (None, CacheStrategy::Conservative) => RouteOutcome::Unavailable,
                    (None, CacheStrategy::SelfHealing) => {
                        RouteOutcome::Response(offline_error_response())
                    }
                }
            }
        }
    }

    /// R3: try the network; any failure yields the fixed empty-JSON/599
    /// sentinel, never a raw network error.
    async fn network_or_sentinel(&self, event: &FetchEvent) -> RouteOutcome {
        match self.network.fetch(event).await {
            Ok(live) => RouteOutcome::Response(live.into_snapshot()),
            Err(err) => {
                debug!(url = %event.url, error = %err, "external host unreachable, serving sentinel");
                RouteOutcome::Response(sentinel_response())
            }
        }
    }

    /// The cached offline page, if present.
    async fn fallback_page(&self) -> Option<ResponseSnapshot> {
        let url = self.config.resolve(&self.config.fallback_page).ok()?;
        let bucket = self.storage.open(&self.config.bucket_name()).await;
        bucket.matching(&RequestKey::get(url)).await
    }

    /// Worker install: populate the current version's bucket with the
    /// fixed pre-cache resource list.
    ///
    /// Atomic: if any resource fails to fetch, nothing is written and
    /// installation fails as a whole. Always settles; the host awaits
    /// this in place of a fire-and-forget lifecycle wait.
    pub async fn on_install(&self) -> Result<(), LifecycleError> {
        info!(bucket = %self.config.bucket_name(), "worker installing");

        let mut staged = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            let url = self.config.resolve(path)?;
            let event = FetchEvent::subresource(http::Method::GET, url);
            let live = self.network.fetch(&event).await.map_err(|source| {
                warn!(path = %path, error = %source, "pre-cache fetch failed, failing install");
                LifecycleError::PrecacheFailed {
                    path: path.clone(),
                    source,
                }
            })?;
            staged.push((event.key(), live.into_snapshot()));
        }

        let bucket = self.storage.open(&self.config.bucket_name()).await;
        for (key, snapshot) in staged {
            bucket.put(&key, snapshot).await;
        }
        info!(
            bucket = %self.config.bucket_name(),
            resources = self.config.precache.len(),
            "pre-cache populated"
        );
        Ok(())
    }

    /// Worker activate: delete every bucket whose name is not the
    /// current version's bucket name.
    ///
    /// Whole-bucket generational eviction only; there is no partial
    /// eviction within a bucket. Always settles. Returns the evicted
    /// bucket names.
    pub async fn on_activate(&self) -> Vec<String> {
        let current = self.config.bucket_name();
        let mut evicted = Vec::new();
        for name in self.storage.names().await {
            if name != current {
                self.storage.delete(&name).await;
                evicted.push(name);
            }
        }
        info!(bucket = %current, evicted = evicted.len(), "worker activated");
        evicted
    }
}

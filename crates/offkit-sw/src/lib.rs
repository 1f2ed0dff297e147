//! # OffKit SW
//!
//! Offline response router and worker lifecycle for the OffKit
//! offline-support subsystem.
//!
//! ## Design Goals
//!
//! 1. **Single ordered dispatch**: one rule table decides which strategy
//!    owns each intercepted request, first match wins
//! 2. **Generational caching**: one versioned bucket per deployed
//!    revision, stale buckets evicted whole at activation
//! 3. **Graceful degradation**: network failures fall back to cached
//!    content, the offline page, or a fixed sentinel — never an error
//!    surfaced to the requester
//!
//! ## Routing rules
//!
//! | Rule | Condition                                | Strategy             |
//! |------|------------------------------------------|----------------------|
//! | R1   | top-level navigation                     | navigate-or-offline  |
//! | R2   | not navigation, host ≠ external host     | cache-aware fetch    |
//! | R3   | GET to the designated external host      | network-or-sentinel  |
//!
//! Requests matching no rule are left to the host's default handling.

use hashbrown::HashMap;
use http::Method;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use offkit_cache::{RequestKey, ResponseSnapshot};

pub mod router;

pub use router::{offline_error_response, sentinel_response, OfflineRouter, RouteOutcome, Strategy};

/// Status code of the sentinel response served when a call to the
/// designated external host fails. Not a standard code; preserved
/// literally for compatibility with existing deployments.
pub const SENTINEL_STATUS: u16 = 599;

// ==================== Errors ====================

/// Errors produced by the network fetch primitive.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The network is unreachable (device offline).
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// The request failed before a response was produced.
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Errors produced by the worker lifecycle handlers.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A pre-cache resource could not be fetched; installation fails as
    /// a whole and nothing is written to the bucket.
    #[error("Pre-cache failed for '{path}': {source}")]
    PrecacheFailed {
        path: String,
        #[source]
        source: FetchError,
    },

    /// A pre-cache path could not be resolved against the scope URL.
    #[error("Invalid pre-cache path '{path}'")]
    InvalidPrecachePath { path: String },
}

// ==================== Fetch Event ====================

/// Navigation-vs-subresource mode of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level navigation to an HTML page.
    Navigate,
    /// Any other resource request.
    Subresource,
}

/// An intercepted request descriptor, dispatched by the host per
/// outgoing call.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// Request method.
    pub method: Method,

    /// Request URL.
    pub url: Url,

    /// Navigation-vs-subresource mode.
    pub mode: RequestMode,
}

impl FetchEvent {
    /// Create a navigation request (method GET).
    pub fn navigation(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Navigate,
        }
    }

    /// Create a subresource request.
    pub fn subresource(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::Subresource,
        }
    }

    /// Check if this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Request host, if the URL has one.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// The cache identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.method.clone(), self.url.clone())
    }
}

// ==================== Network Response ====================

/// A live response produced by the network fetch primitive.
///
/// The live response can be consumed only once. Write paths that also
/// return the response must `snapshot()` it first; `into_snapshot()`
/// consumes it for delivery.
#[derive(Debug)]
pub struct NetworkResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl NetworkResponse {
    /// Create a live response.
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a 200 live response with a content-type header.
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self::new(200, headers, body)
    }

    /// Response status.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Clone this response into a cacheable snapshot, leaving the live
    /// response intact for delivery.
    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot::new(self.status, self.headers.clone(), self.body.clone())
    }

    /// Consume the live response into a snapshot for delivery.
    pub fn into_snapshot(self) -> ResponseSnapshot {
        ResponseSnapshot::new(self.status, self.headers, self.body)
    }
}

// ==================== Network ====================

/// The host's network fetch primitive.
///
/// Returns a live response, or an error on network failure. The router
/// never retries and never issues two fetches for the same request
/// concurrently.
pub trait Network: Send + Sync {
    /// Perform the network fetch for an intercepted request.
    fn fetch(
        &self,
        event: &FetchEvent,
    ) -> impl Future<Output = Result<NetworkResponse, FetchError>> + Send;
}

/// A shared network handle is itself a network; the router and the host
/// loop can hold the same instance.
impl<N: Network> Network for Arc<N> {
    fn fetch(
        &self,
        event: &FetchEvent,
    ) -> impl Future<Output = Result<NetworkResponse, FetchError>> + Send {
        (**self).fetch(event)
    }
}

// ==================== Configuration ====================

/// The two caching revisions of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Revision 1: caching is strictly limited to the fixed pre-cache
    /// list; live traffic is never written to the cache.
    Conservative,
    /// Revision 2: every successful fetch repopulates the cache entry
    /// for its request.
    SelfHealing,
}

/// Router configuration: version tag, bucket naming, pre-cache list,
/// external host, and caching strategy.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deployment version; bumping it changes the bucket name and
    /// triggers eviction of stale buckets at activation.
    pub version: u32,

    /// Cache bucket base name.
    pub cache_base: String,

    /// Pre-cache resource list (paths relative to `scope`).
    pub precache: Vec<String>,

    /// Designated external host (rule R3).
    pub external_host: String,

    /// Fallback page path, served when a navigation cannot be completed.
    pub fallback_page: String,

    /// Scope URL; relative pre-cache paths resolve against it.
    pub scope: Url,

    /// Caching strategy revision.
    pub strategy: CacheStrategy,
}

impl RouterConfig {
    /// Deployed defaults with the given scope and strategy.
    pub fn new(scope: Url, version: u32, strategy: CacheStrategy) -> Self {
        Self {
            version,
            cache_base: "offline".to_string(),
            precache: vec![
                "favicon.ico".to_string(),
                "offline.html".to_string(),
                "offline.css".to_string(),
            ],
            external_host: "some.external.host.com".to_string(),
            fallback_page: "offline.html".to_string(),
            scope,
            strategy,
        }
    }

    /// Revision 1: conservative caching.
    pub fn revision_1(scope: Url) -> Self {
        Self::new(scope, 1, CacheStrategy::Conservative)
    }

    /// Revision 2: self-healing caching.
    pub fn revision_2(scope: Url) -> Self {
        Self::new(scope, 2, CacheStrategy::SelfHealing)
    }

    /// Name of the current version's bucket, e.g. `offline_v2`.
    pub fn bucket_name(&self) -> String {
        format!("{}_v{}", self.cache_base, self.version)
    }

    /// Resolve a pre-cache path against the scope URL.
    pub fn resolve(&self, path: &str) -> Result<Url, LifecycleError> {
        self.scope
            .join(path)
            .map_err(|_| LifecycleError::InvalidPrecachePath {
                path: path.to_string(),
            })
    }
}

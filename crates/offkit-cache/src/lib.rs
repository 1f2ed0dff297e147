//! # OffKit Cache
//!
//! Versioned request→response cache store for the OffKit offline-support
//! subsystem.
//!
//! ## Features
//!
//! - **RequestKey**: canonical request identity (method + URL)
//! - **ResponseSnapshot**: complete HTTP-like response snapshot
//! - **CacheBucket**: named key→response store
//! - **CacheStorage**: open-by-name, get-all-names, delete-by-name
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (caches)
//!     └── CacheBucket ("offline_v2")
//!             └── RequestKey → ResponseSnapshot
//! ```
//!
//! A bucket is created on first `open` for a given name; reopening the
//! same name returns a handle to the same underlying store. A missing
//! entry is an absent value, never an error.

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

// ==================== Request Key ====================

/// Canonical request identity: method + URL.
///
/// Two requests with the same method and URL address the same cache
/// entry, independent of headers or body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: Url,
}

impl RequestKey {
    /// Create a key from a method and URL.
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Create a GET key for a URL.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Canonical string form, used as the stored map key.
    pub fn canonical(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Response Snapshot ====================

/// A complete HTTP-like response snapshot: status, headers, body.
///
/// This is the stored (and served) form of a response. Live responses
/// are cloned into a snapshot before being written to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch); zero for synthesized responses.
    pub cached_at: u64,
}

impl ResponseSnapshot {
    /// Create a snapshot.
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            cached_at: now_millis(),
        }
    }

    /// Create a 200 snapshot with a single content-type header.
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self::new(200, headers, body)
    }

    /// Create a synthesized snapshot (sentinel or error page), with a
    /// zero `cached_at` so it is distinguishable from stored entries.
    pub fn synthetic(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status,
            headers,
            body,
            cached_at: 0,
        }
    }

    /// Get the content-type header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    /// Check if the status is a success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ==================== Cache Bucket ====================

/// A named key→response store.
///
/// Entries are keyed independently per request identity, so handlers for
/// different requests can read and write concurrently without affecting
/// each other.
#[derive(Debug)]
pub struct CacheBucket {
    name: String,
    entries: RwLock<HashMap<String, ResponseSnapshot>>,
}

impl CacheBucket {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the entry for a request, if any.
    pub async fn matching(&self, key: &RequestKey) -> Option<ResponseSnapshot> {
        let entries = self.entries.read().await;
        let hit = entries.get(&key.canonical()).cloned();
        trace!(bucket = %self.name, key = %key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Store an entry for a request, replacing any previous one.
    pub async fn put(&self, key: &RequestKey, snapshot: ResponseSnapshot) {
        trace!(bucket = %self.name, key = %key, status = snapshot.status, "cache put");
        self.entries
            .write()
            .await
            .insert(key.canonical(), snapshot);
    }

    /// Delete the entry for a request. Returns true if one existed.
    pub async fn delete(&self, key: &RequestKey) -> bool {
        self.entries.write().await.remove(&key.canonical()).is_some()
    }

    /// Delete all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Get all stored keys (canonical form).
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the bucket has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The bucket registry: open-by-name, get-all-names, delete-by-name.
#[derive(Debug, Default)]
pub struct CacheStorage {
    buckets: RwLock<HashMap<String, Arc<CacheBucket>>>,
}

impl CacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a bucket, creating it on first use.
    ///
    /// Reopening an existing name returns a handle to the same underlying
    /// store; entries are never duplicated.
    pub async fn open(&self, name: &str) -> Arc<CacheBucket> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get(name) {
            return Arc::clone(bucket);
        }
        debug!(bucket = name, "creating cache bucket");
        let bucket = Arc::new(CacheBucket::new(name));
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        bucket
    }

    /// Check if a bucket exists.
    pub async fn has(&self, name: &str) -> bool {
        self.buckets.read().await.contains_key(name)
    }

    /// Delete a bucket by name. Returns true if it existed.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.buckets.write().await.remove(name).is_some();
        if removed {
            debug!(bucket = name, "deleted cache bucket");
        }
        removed
    }

    /// Get all bucket names.
    pub async fn names(&self) -> Vec<String> {
        self.buckets.read().await.keys().cloned().collect()
    }
}

//! Cache storage: named generations of URL → response entries.

use async_trait::async_trait;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use solar_net::{Response, ResponseType};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{Result, ServiceWorkerError};

// ==================== Cache Entry ====================

/// Key a request URL is stored under. Fragments never reach the server, so
/// `/index.html#earth` and `/index.html` share one entry.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers in arrival order, one pair per value, raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Classification of the stored response.
    pub response_type: ResponseType,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under a request key.
    pub fn from_response(method: &Method, url: &str, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: url.to_string(),
            method: method.as_str().to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body().to_vec(),
            response_type: response.response_type,
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Rebuild the stored response verbatim.
    pub fn to_response(&self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status).map_err(|e| {
            ServiceWorkerError::CacheError(format!("corrupt entry for {}: {e}", self.url))
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(url = %self.url, header = %name, "Dropping unreadable stored header"),
            }
        }

        let mut response = Response::new(status)
            .with_type(self.response_type)
            .with_body(self.body.clone());
        response.status_text = self.status_text.clone();
        response.headers = headers;
        response.url = Url::parse(&self.url).ok();
        Ok(response)
    }
}

// ==================== Cache Store ====================

/// Storage for cache generations.
///
/// Writes are last-write-wins per key; there is no cross-key transaction.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, generation: &str) -> Result<()>;

    /// Names of all generations.
    async fn generations(&self) -> Result<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete_generation(&self, generation: &str) -> Result<bool>;

    /// Delete every generation whose name matches, returning the deleted names.
    async fn delete_matching(
        &self,
        predicate: &(dyn for<'p> Fn(&'p str) -> bool + Send + Sync),
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.generations().await? {
            if predicate(name.as_str()) && self.delete_generation(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Look up an entry by exact key.
    async fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry, creating the generation if needed.
    async fn put(&self, generation: &str, key: &str, entry: CacheEntry) -> Result<()>;

    /// Keys stored in a generation (empty if the generation is absent).
    async fn keys(&self, generation: &str) -> Result<Vec<String>>;
}

// ==================== In-memory implementation ====================

/// A single generation.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, CacheEntry>,
}

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn open(&self, generation: &str) -> Result<()> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(generation) {
            debug!(cache = generation, "Creating cache");
            caches.insert(generation.to_string(), Cache::default());
        }
        Ok(())
    }

    async fn generations(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(generation).is_some())
    }

    async fn delete_matching(
        &self,
        predicate: &(dyn for<'p> Fn(&'p str) -> bool + Send + Sync),
    ) -> Result<Vec<String>> {
        let mut caches = self.caches.write().await;
        let doomed: Vec<String> = caches.keys().filter(|n| predicate(n.as_str())).cloned().collect();
        for name in &doomed {
            caches.remove(name);
        }
        Ok(doomed)
    }

    async fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(generation)
            .and_then(|cache| cache.entries.get(key))
            .cloned())
    }

    async fn put(&self, generation: &str, key: &str, entry: CacheEntry) -> Result<()> {
        trace!(cache = generation, key, status = entry.status, "Storing entry");
        self.caches
            .write()
            .await
            .entry(generation.to_string())
            .or_default()
            .entries
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn keys(&self, generation: &str) -> Result<Vec<String>> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(generation)
            .map(|cache| cache.entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

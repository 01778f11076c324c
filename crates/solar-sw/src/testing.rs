//! Test doubles for the gatekeeper seams.

use async_trait::async_trait;
use http::{header, HeaderValue, StatusCode};
use solar_net::{Fetcher, NetError, Request, Response, ResponseType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::lifecycle::ServiceWorkerHost;
use crate::notification::Notification;
use crate::store::{CacheEntry, CacheStore, MemoryCacheStorage};
use crate::{Result, ServiceWorkerError};

/// A 200 `basic` response with a text body.
pub fn basic(url: &str, body: &str) -> Response {
    Response::new(StatusCode::OK)
        .with_type(ResponseType::Basic)
        .with_url(Url::parse(url).unwrap())
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .with_body(body.to_string())
}

/// Scripted network. Unknown URLs fail as if offline.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn go_offline(&self) {
        self.routes.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> std::result::Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| NetError::RequestFailed(format!("offline: {}", request.url)))
    }
}

/// Host that counts every signal it receives.
#[derive(Default)]
pub struct RecordingHost {
    pub skip_waiting: AtomicUsize,
    pub claims: AtomicUsize,
    pub notifications: Mutex<Vec<Notification>>,
    pub opened: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceWorkerHost for RecordingHost {
    async fn skip_waiting(&self) -> bool {
        self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        false
    }

    async fn finish_activation(&self) {}

    async fn claim_clients(&self) {
        self.claims.fetch_add(1, Ordering::SeqCst);
    }

    async fn show_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }

    async fn open_window(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Memory store whose writes can be held back or made to fail, so tests can
/// pick the interleaving of concurrent writers.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryCacheStorage,
    gates: Mutex<Vec<(String, Vec<u8>, Arc<Notify>)>>,
    fail_puts: Mutex<bool>,
    fail_open: Mutex<bool>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the next write of `body` under `key` until the returned gate is notified.
    pub fn hold(&self, key: &str, body: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().push((
            key.to_string(),
            body.as_bytes().to_vec(),
            Arc::clone(&gate),
        ));
        gate
    }

    pub fn fail_puts(&self) {
        *self.fail_puts.lock().unwrap() = true;
    }

    pub fn fail_open(&self) {
        *self.fail_open.lock().unwrap() = true;
    }

    fn take_gate(&self, key: &str, body: &[u8]) -> Option<Arc<Notify>> {
        let mut gates = self.gates.lock().unwrap();
        let index = gates.iter().position(|(k, b, _)| k == key && b == body)?;
        Some(gates.remove(index).2)
    }
}

#[async_trait]
impl CacheStore for GatedStore {
    async fn open(&self, generation: &str) -> Result<()> {
        if *self.fail_open.lock().unwrap() {
            return Err(ServiceWorkerError::CacheError("quota exceeded".into()));
        }
        self.inner.open(generation).await
    }

    async fn generations(&self) -> Result<Vec<String>> {
        self.inner.generations().await
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        self.inner.delete_generation(generation).await
    }

    async fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>> {
        self.inner.get(generation, key).await
    }

    async fn put(&self, generation: &str, key: &str, entry: CacheEntry) -> Result<()> {
        if *self.fail_puts.lock().unwrap() {
            return Err(ServiceWorkerError::CacheError("disk full".into()));
        }
        if let Some(gate) = self.take_gate(key, &entry.body) {
            gate.notified().await;
        }
        self.inner.put(generation, key, entry).await
    }

    async fn keys(&self, generation: &str) -> Result<Vec<String>> {
        self.inner.keys(generation).await
    }
}

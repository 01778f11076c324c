//! The offline cache gatekeeper: install, activate, fetch and message handling
//! over the injected store, network and host.

use futures::future::join_all;
use http::Method;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use solar_net::{Fetcher, OriginPolicy, Request, RequestMode, Response};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::GatekeeperConfig;
use crate::fallback::offline_response;
use crate::lifecycle::{ServiceWorkerContainer, ServiceWorkerHost};
use crate::policy::{decide, Action, CacheLookup, FallbackKind, NetworkOutcome, RequestMeta};
use crate::store::{cache_key, CacheEntry, CacheStore};
use crate::sync::{self, SyncOutcome, SYNC_DATA_TAG, UPDATE_CONTENT_TAG};
use crate::{Result, ServiceWorkerError};

// ==================== Outcomes ====================

/// Result of precaching the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Manifest URLs now in the cache.
    pub cached: Vec<Url>,
    /// Manifest URLs that could not be fetched or stored, with the reason.
    pub failed: Vec<(Url, String)>,
}

/// What the fetch handler did with a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the platform fetches it as if no worker existed.
    PassThrough,
    /// Answered by the worker.
    Respond(Response),
}

impl FetchOutcome {
    /// The response, if the worker produced one.
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::Respond(response) => Some(response),
        }
    }
}

/// Control messages a page may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Become active now.
    SkipWaiting,
}

/// Platform events the gatekeeper reacts to.
#[derive(Debug, Clone)]
pub enum ExtendableEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(JsonValue),
    Sync { tag: String },
    PeriodicSync { tag: String },
    Push { data: Option<String> },
    NotificationClick { action: Option<String> },
}

/// Outcome of [`Gatekeeper::dispatch`].
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated { deleted: Vec<String> },
    Fetched(FetchOutcome),
    Message { handled: bool },
    Synced(SyncOutcome),
    NotificationShown,
    NotificationClicked { opened: Option<String> },
    /// The handler failed; the error was logged and swallowed.
    Failed(String),
}

// ==================== Gatekeeper ====================

/// Cache-first request router with versioned cache generations.
pub struct Gatekeeper {
    config: Arc<GatekeeperConfig>,
    policy: OriginPolicy,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    host: Arc<dyn ServiceWorkerHost>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Gatekeeper {
    /// Create a gatekeeper. Fails if the configuration is invalid.
    pub fn new(
        config: GatekeeperConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn ServiceWorkerHost>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.origin_policy();
        Ok(Self {
            config: Arc::new(config),
            policy,
            store,
            fetcher,
            host,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    // ---------- install ----------

    /// Precache the manifest, best effort, then ask to skip the waiting phase.
    ///
    /// Individual URLs may fail without failing the install. Only a failure to
    /// open the cache generation itself is an error, and then no skip-waiting
    /// signal is sent.
    pub async fn install(&self) -> Result<InstallReport> {
        let cache = self.cache_name();
        self.store.open(cache).await?;
        info!(cache, "Opened cache");

        let urls = self.config.manifest_urls()?;
        let results = join_all(urls.into_iter().map(|url| self.precache(url))).await;

        let mut report = InstallReport::default();
        for (url, result) in results {
            match result {
                Ok(()) => report.cached.push(url),
                Err(e) => {
                    warn!(url = %url, error = %e, "Precache failed, continuing");
                    report.failed.push((url, e.to_string()));
                }
            }
        }

        info!(
            cache,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Install finished"
        );
        if self.host.skip_waiting().await {
            debug!("Skip-waiting during install promoted an older waiting version");
        }
        Ok(report)
    }

    async fn precache(&self, url: Url) -> (Url, Result<()>) {
        let result = async {
            let request = Request::get(url.clone()).mode(RequestMode::Cors);
            let response = self.fetcher.fetch(request).await?;
            if !response.ok() {
                return Err(ServiceWorkerError::BadStatus {
                    url: url.to_string(),
                    status: response.status.as_u16(),
                });
            }
            let key = cache_key(&url);
            let entry = CacheEntry::from_response(&Method::GET, &key, &response);
            self.store.put(self.cache_name(), &key, entry).await
        }
        .await;
        (url, result)
    }

    // ---------- activate ----------

    /// Delete every cache generation but the current one, then claim clients.
    ///
    /// Clients are claimed even if the sweep failed; the sweep error is returned.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.cache_name().to_string();
        let swept = self
            .store
            .delete_matching(&move |name: &str| name != current)
            .await;

        if let Ok(ref deleted) = swept {
            for name in deleted {
                info!(cache = %name, "Deleted old cache");
            }
        }

        self.host.claim_clients().await;
        swept
    }

    // ---------- fetch ----------

    /// Route one request: cache first, then network, then offline fallback.
    pub async fn handle(&self, request: Request) -> FetchOutcome {
        let meta = RequestMeta::of(&request, &self.policy);
        if decide(&meta, CacheLookup::Miss, None) == Action::PassThrough {
            trace!(url = %request.url, "Passing through");
            return FetchOutcome::PassThrough;
        }

        let key = cache_key(&request.url);
        if let Some(response) = self.lookup(&key).await {
            debug!(url = %key, "Cache hit");
            return FetchOutcome::Respond(response);
        }

        let result = self.fetcher.fetch(request.clone()).await;
        let action = decide(&meta, CacheLookup::Miss, Some(NetworkOutcome::of(&result)));

        let offline = |kind| FetchOutcome::Respond(offline_response(kind, &self.config.offline));

        match action {
            Action::PassThrough => FetchOutcome::PassThrough,
            Action::Fallback(kind) => {
                debug!(url = %key, ?kind, "Network failed, serving offline fallback");
                offline(kind)
            }
            Action::StoreAndRespond => match result {
                Ok(response) => {
                    self.store_in_background(key, response.clone()).await;
                    FetchOutcome::Respond(response)
                }
                Err(_) => offline(FallbackKind::for_request(&meta)),
            },
            Action::Respond | Action::ServeCached | Action::Fetch => match result {
                Ok(response) => FetchOutcome::Respond(response),
                Err(_) => offline(FallbackKind::for_request(&meta)),
            },
        }
    }

    /// Stored response for a key. Store errors and unreadable entries count as a miss.
    async fn lookup(&self, key: &str) -> Option<Response> {
        let entry = match self.store.get(self.cache_name(), key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(url = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Store a copy of `response` without making the caller wait for it.
    async fn store_in_background(&self, key: String, response: Response) {
        let store = Arc::clone(&self.store);
        let cache = self.config.cache_name.clone();

        let handle = tokio::spawn(async move {
            let entry = CacheEntry::from_response(&Method::GET, &key, &response);
            match store.put(&cache, &key, entry).await {
                Ok(()) => trace!(url = %key, "Cached network response"),
                Err(e) => warn!(url = %key, error = %e, "Background cache write failed"),
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every background cache write issued so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background cache write panicked");
            }
        }
    }

    // ---------- message ----------

    /// Handle a message posted by a page. Returns whether it was recognised.
    pub async fn message(&self, data: &JsonValue) -> bool {
        match ControlMessage::deserialize(data) {
            Ok(ControlMessage::SkipWaiting) => {
                info!("Received skip-waiting message");
                if self.host.skip_waiting().await {
                    self.complete_activation().await;
                }
                true
            }
            Err(_) => {
                trace!(payload = %data, "Ignoring unrecognised message");
                false
            }
        }
    }

    /// Activate step for a version the host promoted out of the waiting slot.
    async fn complete_activation(&self) {
        if let Err(e) = self.activate().await {
            warn!(error = %e, "Old cache sweep failed");
        }
        self.host.finish_activation().await;
    }

    // ---------- stub hooks ----------

    /// Background sync event.
    pub async fn sync(&self, tag: &str) -> SyncOutcome {
        if tag != SYNC_DATA_TAG {
            trace!(tag, "Ignoring sync tag");
            return SyncOutcome::Ignored;
        }
        contain(tag, sync::sync_data().await)
    }

    /// Periodic background sync event.
    pub async fn periodic_sync(&self, tag: &str) -> SyncOutcome {
        if tag != UPDATE_CONTENT_TAG {
            trace!(tag, "Ignoring periodic sync tag");
            return SyncOutcome::Ignored;
        }
        contain(tag, sync::update_content().await)
    }

    /// Push event: show the fixed notification with the payload as body.
    pub async fn push(&self, data: Option<&str>) {
        let notification = self.config.notification.for_push(data);
        self.host.show_notification(notification).await;
    }

    /// Notification click: open the page for the chosen action, if any.
    pub async fn notification_click(&self, action: Option<&str>) -> Result<Option<String>> {
        let Some(target) = self.config.notification.click_target(action) else {
            debug!(?action, "Notification dismissed");
            return Ok(None);
        };
        self.host.open_window(target).await?;
        Ok(Some(target.to_string()))
    }

    // ---------- dispatch ----------

    /// Route a platform event. Never fails: errors are logged and reported as
    /// [`EventOutcome::Failed`].
    pub async fn dispatch(&self, event: ExtendableEvent) -> EventOutcome {
        let outcome = match event {
            ExtendableEvent::Install => self.install().await.map(EventOutcome::Installed),
            ExtendableEvent::Activate => self
                .activate()
                .await
                .map(|deleted| EventOutcome::Activated { deleted }),
            ExtendableEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.handle(request).await)),
            ExtendableEvent::Message(data) => Ok(EventOutcome::Message {
                handled: self.message(&data).await,
            }),
            ExtendableEvent::Sync { tag } => Ok(EventOutcome::Synced(self.sync(&tag).await)),
            ExtendableEvent::PeriodicSync { tag } => {
                Ok(EventOutcome::Synced(self.periodic_sync(&tag).await))
            }
            ExtendableEvent::Push { data } => {
                self.push(data.as_deref()).await;
                Ok(EventOutcome::NotificationShown)
            }
            ExtendableEvent::NotificationClick { action } => self
                .notification_click(action.as_deref())
                .await
                .map(|opened| EventOutcome::NotificationClicked { opened }),
        };

        outcome.unwrap_or_else(|e| {
            warn!(error = %e, "Event handler failed");
            EventOutcome::Failed(e.to_string())
        })
    }
}

fn contain(tag: &str, result: Result<()>) -> SyncOutcome {
    match result {
        Ok(()) => SyncOutcome::Completed,
        Err(e) => {
            warn!(tag, error = %e, "Background task failed");
            SyncOutcome::Failed(e.to_string())
        }
    }
}

/// Drive one worker version through install and activation on a container.
///
/// If the handover gate keeps the new version waiting, activation is skipped
/// and only the install report is returned.
pub async fn run_lifecycle(
    gatekeeper: &Gatekeeper,
    container: &ServiceWorkerContainer,
    script_url: Url,
) -> Result<InstallReport> {
    container.begin_install(script_url).await;

    let report = match gatekeeper.install().await {
        Ok(report) => report,
        Err(e) => {
            container.finish_install(false).await;
            return Err(e);
        }
    };

    if container.finish_install(true).await.is_some() {
        if let Err(e) = gatekeeper.activate().await {
            warn!(error = %e, "Old cache sweep failed");
        }
        container.finish_activation().await;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ServiceWorkerState;
    use crate::store::MemoryCacheStorage;
    use crate::testing::{basic, GatedStore, MockFetcher, RecordingHost};
    use http::{header, HeaderValue, StatusCode};
    use serde_json::json;
    use solar_net::ResponseType;

    const ORIGIN: &str = "http://localhost:8080";

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    fn config(manifest: &[&str]) -> GatekeeperConfig {
        GatekeeperConfig {
            origin: Url::parse(ORIGIN).unwrap(),
            manifest: manifest.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    struct Harness {
        gatekeeper: Gatekeeper,
        store: Arc<GatedStore>,
        fetcher: Arc<MockFetcher>,
        host: Arc<RecordingHost>,
    }

    fn harness(config: GatekeeperConfig) -> Harness {
        let store = Arc::new(GatedStore::new());
        let fetcher = Arc::new(MockFetcher::new());
        let host = Arc::new(RecordingHost::default());
        let gatekeeper = Gatekeeper::new(
            config,
            store.clone(),
            fetcher.clone(),
            host.clone(),
        )
        .unwrap();
        Harness {
            gatekeeper,
            store,
            fetcher,
            host,
        }
    }

    fn get(u: &str) -> Request {
        Request::get(Url::parse(u).unwrap())
    }

    fn body_of(outcome: FetchOutcome) -> String {
        outcome.response().expect("worker responded").text().unwrap()
    }

    // ---------- install ----------

    #[tokio::test]
    async fn test_install_is_best_effort() {
        let h = harness(config(&["/a.js", "/b.js", "/c.js"]));
        h.fetcher.respond(&url("/a.js"), basic(&url("/a.js"), "a"));
        h.fetcher.respond(&url("/c.js"), basic(&url("/c.js"), "c"));

        let report = h.gatekeeper.install().await.unwrap();

        assert_eq!(report.cached.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), url("/b.js"));

        let cache = h.gatekeeper.cache_name();
        assert!(h.store.get(cache, &url("/a.js")).await.unwrap().is_some());
        assert!(h.store.get(cache, &url("/b.js")).await.unwrap().is_none());
        assert!(h.store.get(cache, &url("/c.js")).await.unwrap().is_some());
        assert_eq!(h.host.skip_waiting_calls(), 1);
    }

    #[tokio::test]
    async fn test_install_skips_error_statuses() {
        let h = harness(config(&["/", "/missing.png"]));
        h.fetcher.respond(&url("/"), basic(&url("/"), "home"));
        h.fetcher.respond(
            &url("/missing.png"),
            Response::new(StatusCode::NOT_FOUND).with_type(ResponseType::Basic),
        );

        let report = h.gatekeeper.install().await.unwrap();
        assert_eq!(report.cached.len(), 1);
        assert!(report.failed[0].1.contains("404"));
        assert_eq!(h.store.keys(h.gatekeeper.cache_name()).await.unwrap(), vec![url("/")]);
    }

    #[tokio::test]
    async fn test_install_caches_cross_origin_manifest_entry() {
        let cdn = "https://cdnjs.cloudflare.com/ajax/libs/three.js/r128/three.min.js";
        let h = harness(config(&[cdn]));
        h.fetcher.respond(
            cdn,
            basic(cdn, "// three").with_type(ResponseType::Cors),
        );

        let report = h.gatekeeper.install().await.unwrap();
        assert_eq!(report.cached.len(), 1);

        // Later requests for it are served from the cache.
        h.fetcher.go_offline();
        let outcome = h.gatekeeper.handle(get(cdn)).await;
        assert_eq!(body_of(outcome), "// three");
    }

    #[tokio::test]
    async fn test_install_fails_when_cache_cannot_open() {
        let h = harness(config(&["/"]));
        h.store.fail_open();

        assert!(h.gatekeeper.install().await.is_err());
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.host.skip_waiting_calls(), 0);
    }

    // ---------- activate ----------

    #[tokio::test]
    async fn test_activate_keeps_only_current_generation() {
        let h = harness(GatekeeperConfig {
            cache_name: "solar-system-v2".to_string(),
            ..config(&[])
        });
        for name in ["solar-system-v1", "solar-system-v2", "other"] {
            h.store.open(name).await.unwrap();
        }

        let mut deleted = h.gatekeeper.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["other", "solar-system-v1"]);
        assert_eq!(h.store.generations().await.unwrap(), vec!["solar-system-v2"]);
        assert_eq!(h.host.claim_calls(), 1);
    }

    // ---------- fetch ----------

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let h = harness(config(&["/index.html"]));
        h.fetcher.respond(&url("/index.html"), basic(&url("/index.html"), "cached"));
        h.gatekeeper.install().await.unwrap();
        let calls_after_install = h.fetcher.calls();

        h.fetcher.respond(&url("/index.html"), basic(&url("/index.html"), "fresh"));
        let outcome = h.gatekeeper.handle(get(&url("/index.html"))).await;

        assert_eq!(body_of(outcome), "cached");
        assert_eq!(h.fetcher.calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_miss_is_fetched_then_cached() {
        let h = harness(config(&[]));
        let earth = url("/img/earth.png");
        h.fetcher.respond(&earth, basic(&earth, "earth"));

        let first = h.gatekeeper.handle(get(&earth)).await;
        assert_eq!(body_of(first), "earth");
        h.gatekeeper.settle().await;

        h.fetcher.go_offline();
        let second = h.gatekeeper.handle(get(&earth)).await;
        assert_eq!(body_of(second), "earth");
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fragment_navigation_hits_precached_page() {
        let h = harness(config(&["/index.html"]));
        h.fetcher.respond(&url("/index.html"), basic(&url("/index.html"), "home"));
        h.gatekeeper.install().await.unwrap();
        h.fetcher.go_offline();

        let request = Request::navigate(Url::parse(&url("/index.html#earth")).unwrap());
        let response = h.gatekeeper.handle(request).await.response().unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text().unwrap(), "home");
    }

    #[tokio::test]
    async fn test_fragment_miss_is_stored_without_fragment() {
        let h = harness(config(&[]));
        let earth = url("/img/earth.png");
        h.fetcher.respond(&url("/img/earth.png#x"), basic(&earth, "earth"));

        let first = h.gatekeeper.handle(get(&url("/img/earth.png#x"))).await;
        assert_eq!(body_of(first), "earth");
        h.gatekeeper.settle().await;

        let keys = h.store.keys(h.gatekeeper.cache_name()).await.unwrap();
        assert_eq!(keys, vec![earth.clone()]);

        h.fetcher.go_offline();
        assert_eq!(body_of(h.gatekeeper.handle(get(&earth)).await), "earth");
    }

    #[tokio::test]
    async fn test_ineligible_responses_are_not_cached() {
        let h = harness(config(&[]));
        let missing = url("/nope");
        let redirected = url("/moved");
        h.fetcher.respond(
            &missing,
            Response::new(StatusCode::NOT_FOUND).with_type(ResponseType::Basic),
        );
        h.fetcher.respond(&redirected, basic(&redirected, "x").with_type(ResponseType::Cors));

        let outcome = h.gatekeeper.handle(get(&missing)).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::NOT_FOUND);
        h.gatekeeper.handle(get(&redirected)).await;
        h.gatekeeper.settle().await;

        assert!(h.store.keys(h.gatekeeper.cache_name()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_origin_is_never_cached() {
        let h = harness(config(&[]));
        let foreign = "https://fonts.example/font.woff2";
        h.fetcher.respond(foreign, basic(foreign, "font"));

        let outcome = h.gatekeeper.handle(get(foreign)).await;
        h.gatekeeper.settle().await;

        assert!(matches!(outcome, FetchOutcome::PassThrough));
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.store.generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allow_listed_opaque_response_is_not_cached() {
        let h = harness(config(&[]));
        let cdn = "https://cdnjs.cloudflare.com/ajax/libs/other.js";
        h.fetcher.respond(cdn, basic(cdn, "lib").with_type(ResponseType::Opaque));

        let outcome = h.gatekeeper.handle(get(cdn)).await;
        h.gatekeeper.settle().await;

        assert_eq!(body_of(outcome), "lib");
        assert!(h.store.keys(h.gatekeeper.cache_name()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let h = harness(config(&[]));
        let request = get(&url("/api/score")).method(Method::POST);
        assert!(matches!(
            h.gatekeeper.handle(request).await,
            FetchOutcome::PassThrough
        ));
    }

    #[tokio::test]
    async fn test_offline_navigation_gets_html_fallback() {
        let h = harness(config(&[]));
        let request = Request::navigate(Url::parse(&url("/planets/mars.html")).unwrap());

        let response = h.gatekeeper.handle(request).await.response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_offline_subresource_gets_text_fallback() {
        let h = harness(config(&[]));
        let response = h
            .gatekeeper
            .handle(get(&url("/img/saturn.png")))
            .await
            .response()
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
        h.gatekeeper.settle().await;
        assert!(h.store.keys(h.gatekeeper.cache_name()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_response() {
        let h = harness(config(&[]));
        let page = url("/about.html");
        h.fetcher.respond(&page, basic(&page, "about"));
        h.store.fail_puts();

        let outcome = h.gatekeeper.handle(get(&page)).await;
        h.gatekeeper.settle().await;

        assert_eq!(body_of(outcome), "about");
        assert!(h.store.get(h.gatekeeper.cache_name(), &page).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_response_does_not_wait_for_store() {
        let h = harness(config(&[]));
        let page = url("/slow.html");
        h.fetcher.respond(&page, basic(&page, "slow"));
        let gate = h.store.hold(&page, "slow");

        // Returns while the write is still held.
        let outcome = h.gatekeeper.handle(get(&page)).await;
        assert_eq!(body_of(outcome), "slow");
        assert!(h.store.get(h.gatekeeper.cache_name(), &page).await.unwrap().is_none());

        gate.notify_one();
        h.gatekeeper.settle().await;
        assert!(h.store.get(h.gatekeeper.cache_name(), &page).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_install_and_fetch_race_is_last_write_wins() {
        let h = harness(config(&["/app.js"]));
        let app = url("/app.js");
        let cache = h.gatekeeper.cache_name().to_string();

        // Fetch-path write of v1 is held back...
        h.fetcher.respond(&app, basic(&app, "v1"));
        let gate = h.store.hold(&app, "v1");
        h.gatekeeper.handle(get(&app)).await;

        // ...while install writes v2.
        h.fetcher.respond(&app, basic(&app, "v2"));
        h.gatekeeper.install().await.unwrap();
        let stored = h.store.get(&cache, &app).await.unwrap().unwrap();
        assert_eq!(stored.body, b"v2");

        // Releasing the held write makes it land last.
        gate.notify_one();
        h.gatekeeper.settle().await;
        let stored = h.store.get(&cache, &app).await.unwrap().unwrap();
        assert_eq!(stored.body, b"v1");
    }

    #[tokio::test]
    async fn test_install_landing_last_wins() {
        let h = harness(config(&["/app.js"]));
        let app = url("/app.js");
        let cache = h.gatekeeper.cache_name().to_string();

        h.fetcher.respond(&app, basic(&app, "v2"));
        let gate = h.store.hold(&app, "v2");

        let fetch_path = async {
            // Wait until install has its v2 response and is stuck writing it.
            while h.fetcher.calls() == 0 {
                tokio::task::yield_now().await;
            }
            h.fetcher.respond(&app, basic(&app, "v1"));
            h.gatekeeper.handle(get(&app)).await;
            h.gatekeeper.settle().await;

            let stored = h.store.get(&cache, &app).await.unwrap().unwrap();
            assert_eq!(stored.body, b"v1");
            gate.notify_one();
        };

        let (report, ()) = tokio::join!(h.gatekeeper.install(), fetch_path);
        assert_eq!(report.unwrap().cached.len(), 1);

        let stored = h.store.get(&cache, &app).await.unwrap().unwrap();
        assert_eq!(stored.body, b"v2");
    }

    #[tokio::test]
    async fn test_cached_response_keeps_headers() {
        let h = harness(config(&[]));
        let css = url("/style.css");
        h.fetcher.respond(
            &css,
            basic(&css, "body{}")
                .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/css")),
        );
        h.gatekeeper.handle(get(&css)).await;
        h.gatekeeper.settle().await;
        h.fetcher.go_offline();

        let response = h.gatekeeper.handle(get(&css)).await.response().unwrap();
        assert_eq!(response.content_type(), Some("text/css"));
        assert_eq!(response.status, StatusCode::OK);
    }

    // ---------- message ----------

    #[tokio::test]
    async fn test_skip_waiting_message_signals_once_per_message() {
        let h = harness(config(&[]));

        assert!(h.gatekeeper.message(&json!({ "type": "SKIP_WAITING" })).await);
        assert_eq!(h.host.skip_waiting_calls(), 1);

        assert!(h.gatekeeper.message(&json!({ "type": "SKIP_WAITING" })).await);
        assert_eq!(h.host.skip_waiting_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_messages_are_ignored() {
        let h = harness(config(&[]));
        for message in [
            json!({ "type": "REFRESH" }),
            json!("SKIP_WAITING"),
            json!(42),
            json!({ "kind": "SKIP_WAITING" }),
        ] {
            assert!(!h.gatekeeper.message(&message).await);
        }
        assert_eq!(h.host.skip_waiting_calls(), 0);
    }

    // ---------- hooks ----------

    #[tokio::test]
    async fn test_sync_tags() {
        let h = harness(config(&[]));
        assert_eq!(h.gatekeeper.sync("sync-data").await, SyncOutcome::Completed);
        assert_eq!(h.gatekeeper.sync("other").await, SyncOutcome::Ignored);
        assert_eq!(
            h.gatekeeper.periodic_sync("update-content").await,
            SyncOutcome::Completed
        );
        assert_eq!(h.gatekeeper.periodic_sync("sync-data").await, SyncOutcome::Ignored);
    }

    #[test]
    fn test_contain_reports_failure() {
        let outcome = contain(
            "sync-data",
            Err(ServiceWorkerError::CacheError("no connectivity".into())),
        );
        assert!(matches!(outcome, SyncOutcome::Failed(msg) if msg.contains("no connectivity")));
    }

    #[tokio::test]
    async fn test_push_and_click() {
        let h = harness(config(&[]));
        h.gatekeeper.push(Some("כוכב שביט נראה הלילה")).await;
        h.gatekeeper.push(None).await;

        {
            let shown = h.host.notifications.lock().unwrap();
            assert_eq!(shown.len(), 2);
            assert_eq!(shown[0].options.body, "כוכב שביט נראה הלילה");
            assert_eq!(shown[1].options.body, "התראה חדשה ממערכת השמש");
        }

        assert_eq!(
            h.gatekeeper.notification_click(Some("explore")).await.unwrap(),
            Some("/index.html".to_string())
        );
        assert_eq!(h.gatekeeper.notification_click(Some("close")).await.unwrap(), None);
        assert_eq!(
            h.gatekeeper.notification_click(None).await.unwrap(),
            Some("/".to_string())
        );
        assert_eq!(*h.host.opened.lock().unwrap(), vec!["/index.html", "/"]);
    }

    // ---------- dispatch ----------

    #[tokio::test]
    async fn test_dispatch_routes_events() {
        let h = harness(config(&["/"]));
        h.fetcher.respond(&url("/"), basic(&url("/"), "home"));

        assert!(matches!(
            h.gatekeeper.dispatch(ExtendableEvent::Install).await,
            EventOutcome::Installed(report) if report.cached.len() == 1
        ));
        assert!(matches!(
            h.gatekeeper.dispatch(ExtendableEvent::Activate).await,
            EventOutcome::Activated { .. }
        ));
        assert!(matches!(
            h.gatekeeper
                .dispatch(ExtendableEvent::Fetch(get(&url("/"))))
                .await,
            EventOutcome::Fetched(FetchOutcome::Respond(_))
        ));
        assert!(matches!(
            h.gatekeeper
                .dispatch(ExtendableEvent::Message(json!({ "type": "SKIP_WAITING" })))
                .await,
            EventOutcome::Message { handled: true }
        ));
        assert!(matches!(
            h.gatekeeper
                .dispatch(ExtendableEvent::Sync {
                    tag: "sync-data".into()
                })
                .await,
            EventOutcome::Synced(SyncOutcome::Completed)
        ));
        assert!(matches!(
            h.gatekeeper
                .dispatch(ExtendableEvent::Push { data: None })
                .await,
            EventOutcome::NotificationShown
        ));
    }

    #[tokio::test]
    async fn test_dispatch_swallows_errors() {
        let h = harness(config(&["/"]));
        h.store.fail_open();
        assert!(matches!(
            h.gatekeeper.dispatch(ExtendableEvent::Install).await,
            EventOutcome::Failed(msg) if msg.contains("quota")
        ));
    }

    // ---------- lifecycle ----------

    #[tokio::test]
    async fn test_run_lifecycle_against_container() {
        let store = Arc::new(MemoryCacheStorage::new());
        store.open("solar-system-v0").await.unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(&url("/"), basic(&url("/"), "home"));

        let (container, _rx) = ServiceWorkerContainer::new(Url::parse(ORIGIN).unwrap());
        let container = Arc::new(container);
        let tab = container.add_client(Url::parse(&url("/")).unwrap()).await;

        let gatekeeper = Gatekeeper::new(
            config(&["/"]),
            store.clone(),
            fetcher,
            container.clone(),
        )
        .unwrap();

        let report = run_lifecycle(&gatekeeper, &container, Url::parse(&url("/sw.js")).unwrap())
            .await
            .unwrap();

        assert_eq!(report.cached.len(), 1);
        assert_eq!(store.generations().await.unwrap(), vec!["solar-system-v1"]);
        let (_, _, active) = container.states().await;
        assert_eq!(active, Some(ServiceWorkerState::Activated));
        assert_eq!(container.controller_of(&tab).await, container.active_id().await);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_promotes_waiting_worker() {
        let store = Arc::new(MemoryCacheStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(&url("/"), basic(&url("/"), "home"));

        let (container, _rx) = ServiceWorkerContainer::new(Url::parse(ORIGIN).unwrap());
        let container = Arc::new(container);
        let tab = container.add_client(Url::parse(&url("/")).unwrap()).await;

        let v1 = Gatekeeper::new(
            config(&["/"]),
            store.clone(),
            fetcher.clone(),
            container.clone(),
        )
        .unwrap();
        run_lifecycle(&v1, &container, Url::parse(&url("/sw.js")).unwrap())
            .await
            .unwrap();
        let v1_id = container.active_id().await;

        let v2 = Gatekeeper::new(
            GatekeeperConfig {
                cache_name: "solar-system-v2".to_string(),
                ..config(&["/"])
            },
            store.clone(),
            fetcher,
            container.clone(),
        )
        .unwrap();
        container
            .begin_install(Url::parse(&url("/sw.js?v=2")).unwrap())
            .await;
        store.open("solar-system-v2").await.unwrap();
        assert!(container.finish_install(true).await.is_none());

        let (_, waiting, _) = container.states().await;
        assert_eq!(waiting, Some(ServiceWorkerState::Installed));

        assert!(v2.message(&json!({ "type": "SKIP_WAITING" })).await);

        let (_, waiting, active) = container.states().await;
        assert_eq!(waiting, None);
        assert_eq!(active, Some(ServiceWorkerState::Activated));
        let v2_id = container.active_id().await;
        assert_ne!(v2_id, v1_id);
        assert_eq!(container.controller_of(&tab).await, v2_id);
        assert_eq!(store.generations().await.unwrap(), vec!["solar-system-v2"]);
    }
}

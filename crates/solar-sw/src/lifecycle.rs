//! Worker lifecycle: registration state machine, controlled clients, and the
//! host seam the gatekeeper signals through.
//!
//! ```text
//! ServiceWorkerRegistration
//!     ├── installing (ServiceWorker)
//!     ├── waiting    (ServiceWorker)
//!     └── active     (ServiceWorker)
//!
//! Clients
//!     └── Client ── controlled_by ──► ServiceWorkerId
//! ```

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::notification::Notification;
use crate::{Result, ServiceWorkerError};

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// The installing/waiting worker asked to skip the handover gate.
    pub skip_waiting: bool,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            skip_waiting: false,
        }
    }

    /// Start installing a new worker version.
    pub fn update(&mut self, script_url: Url) -> ServiceWorkerId {
        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        self.skip_waiting = false;
        id
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut stale) = self.waiting.replace(worker) {
                stale.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Installing worker failed; it never becomes active.
    pub fn install_failed(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Redundant);
        }
    }

    /// Whether the waiting worker may take over now: either it asked to skip
    /// waiting or nothing is active yet.
    pub fn ready_to_activate(&self) -> bool {
        self.waiting.is_some() && (self.skip_waiting || self.active.is_none())
    }

    /// Promote the waiting worker to activating. The previous active worker
    /// becomes redundant.
    pub fn begin_activation(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }

        let id = worker.id;
        self.active = Some(worker);
        self.skip_waiting = false;
        Some(id)
    }

    /// Activating → activated.
    pub fn activation_complete(&mut self) {
        if let Some(ref mut worker) = self.active {
            if worker.state == ServiceWorkerState::Activating {
                worker.set_state(ServiceWorkerState::Activated);
            }
        }
    }
}

// ==================== Client ====================

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controlled_by: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Add an uncontrolled page.
    pub fn add(&mut self, url: Url) -> String {
        let id = format!("client-{}", next_client_id());
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                focused: false,
                controlled_by: None,
            },
        );
        id
    }

    /// Open and focus a new window.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let id = format!("client-{}", next_client_id());
        let client = Client {
            id: id.clone(),
            url,
            focused: true,
            controlled_by: controller,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Make `worker` the controller of every client; returns the IDs that changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<String> {
        self.clients
            .values_mut()
            .filter(|c| c.controlled_by != Some(worker))
            .map(|c| {
                c.controlled_by = Some(worker);
                c.id.clone()
            })
            .collect()
    }
}

fn next_client_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ==================== Host ====================

/// Platform capabilities the gatekeeper signals through.
#[async_trait]
pub trait ServiceWorkerHost: Send + Sync {
    /// Activate this worker without waiting for old clients to go away.
    ///
    /// Returns `true` when a waiting worker was promoted by this call; its
    /// activate step must then run, followed by [`finish_activation`].
    ///
    /// [`finish_activation`]: ServiceWorkerHost::finish_activation
    async fn skip_waiting(&self) -> bool;

    /// The activate step of the promoted worker has finished.
    async fn finish_activation(&self);

    /// Take control of every open client, not just new ones.
    async fn claim_clients(&self);

    /// Display a notification.
    async fn show_notification(&self, notification: Notification);

    /// Open a window on a URL (absolute or relative to the scope).
    async fn open_window(&self, url: &str) -> Result<()>;
}

/// Lifecycle events emitted by [`ServiceWorkerContainer`].
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A client switched to a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Notification displayed.
    NotificationShown { title: String },
    /// Window opened.
    WindowOpened { client_id: String, url: Url },
}

/// In-process host: one registration, its clients and shown notifications.
pub struct ServiceWorkerContainer {
    registration: RwLock<ServiceWorkerRegistration>,
    clients: RwLock<Clients>,
    notifications: RwLock<Vec<Notification>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container for a scope.
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(ServiceWorkerRegistration::new(scope)),
                clients: RwLock::new(Clients::new()),
                notifications: RwLock::new(Vec::new()),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    /// Register a new worker version in the installing slot.
    pub async fn begin_install(&self, script_url: Url) -> ServiceWorkerId {
        let id = self.registration.write().await.update(script_url);
        self.emit_state(id, ServiceWorkerState::Installing);
        id
    }

    /// Finish installation. Returns the worker that should now run its
    /// activate step, if the handover gate allows it.
    pub async fn finish_install(&self, success: bool) -> Option<ServiceWorkerId> {
        let mut registration = self.registration.write().await;
        let id = registration.installing.as_ref().map(|w| w.id)?;

        if !success {
            registration.install_failed();
            self.emit_state(id, ServiceWorkerState::Redundant);
            return None;
        }

        registration.install_complete();
        self.emit_state(id, ServiceWorkerState::Installed);

        if registration.ready_to_activate() {
            let activating = registration.begin_activation();
            if let Some(id) = activating {
                self.emit_state(id, ServiceWorkerState::Activating);
            }
            activating
        } else {
            debug!("Installed worker waiting for clients to release the old one");
            None
        }
    }

    /// State of the installing, waiting and active slots.
    pub async fn states(
        &self,
    ) -> (
        Option<ServiceWorkerState>,
        Option<ServiceWorkerState>,
        Option<ServiceWorkerState>,
    ) {
        let registration = self.registration.read().await;
        (
            registration.installing.as_ref().map(|w| w.state),
            registration.waiting.as_ref().map(|w| w.state),
            registration.active.as_ref().map(|w| w.state),
        )
    }

    /// The active worker's ID.
    pub async fn active_id(&self) -> Option<ServiceWorkerId> {
        self.registration.read().await.active.as_ref().map(|w| w.id)
    }

    /// Simulate a page being open before the worker took control.
    pub async fn add_client(&self, url: Url) -> String {
        self.clients.write().await.add(url)
    }

    /// Controller of a client.
    pub async fn controller_of(&self, client_id: &str) -> Option<ServiceWorkerId> {
        self.clients
            .read()
            .await
            .get(client_id)
            .and_then(|c| c.controlled_by)
    }

    /// Number of open clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Notifications shown so far.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

#[async_trait]
impl ServiceWorkerHost for ServiceWorkerContainer {
    async fn skip_waiting(&self) -> bool {
        let mut registration = self.registration.write().await;
        registration.skip_waiting = true;
        info!("Skip waiting requested");

        if !registration.ready_to_activate() {
            return false;
        }
        match registration.begin_activation() {
            Some(id) => {
                self.emit_state(id, ServiceWorkerState::Activating);
                true
            }
            None => false,
        }
    }

    async fn finish_activation(&self) {
        let mut registration = self.registration.write().await;
        registration.activation_complete();
        if let Some(worker) = registration.active.as_ref().filter(|w| w.is_active()) {
            self.emit_state(worker.id, ServiceWorkerState::Activated);
        }
    }

    async fn claim_clients(&self) {
        let Some(worker) = self.active_id().await else {
            debug!("No active worker to claim clients with");
            return;
        };
        let changed = self.clients.write().await.claim(worker);
        info!(count = changed.len(), "Claimed clients");
        for client_id in changed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: worker,
            });
        }
    }

    async fn show_notification(&self, notification: Notification) {
        info!(title = %notification.title, "Showing notification");
        self.emit(ServiceWorkerEvent::NotificationShown {
            title: notification.title.clone(),
        });
        self.notifications.write().await.push(notification);
    }

    async fn open_window(&self, url: &str) -> Result<()> {
        let url = {
            let registration = self.registration.read().await;
            registration
                .scope
                .join(url)
                .map_err(|e| ServiceWorkerError::NotFound(format!("{url}: {e}")))?
        };
        let controller = self.active_id().await;
        let client = self.clients.write().await.open_window(url.clone(), controller);
        info!(url = %url, client = %client.id, "Opened window");
        self.emit(ServiceWorkerEvent::WindowOpened {
            client_id: client.id,
            url,
        });
        Ok(())
    }
}

//! # Solar Service Worker
//!
//! Offline cache gatekeeper for the Solar System progressive web app.
//!
//! ## Features
//!
//! - **Install**: best-effort precache of a fixed manifest into a versioned cache
//! - **Activate**: drop every cache generation except the current one, claim clients
//! - **Fetch**: cache-first, network fallback, opportunistic caching, offline fallback
//! - **Message**: `{"type": "SKIP_WAITING"}` promotes the worker immediately
//! - **Stub hooks**: background sync, periodic refresh, push and notification clicks
//!
//! ## Architecture
//!
//! ```text
//! ExtendableEvent ──► Gatekeeper::dispatch
//!                        │
//!                        ├── policy::decide        (pure routing decision)
//!                        ├── CacheStore            (generation → URL → CacheEntry)
//!                        ├── Fetcher               (network)
//!                        └── ServiceWorkerHost     (skip_waiting, claim, notifications)
//! ```

use solar_common::SolarError;
use solar_net::NetError;
use thiserror::Error;

pub mod config;
pub mod fallback;
pub mod gatekeeper;
pub mod lifecycle;
pub mod notification;
pub mod policy;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{GatekeeperConfig, OfflineContent};
pub use fallback::offline_response;
pub use gatekeeper::{
    run_lifecycle, ControlMessage, EventOutcome, ExtendableEvent, FetchOutcome, Gatekeeper,
    InstallReport,
};
pub use lifecycle::{
    Client, Clients, ServiceWorker, ServiceWorkerContainer, ServiceWorkerEvent,
    ServiceWorkerHost, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
pub use notification::{Notification, NotificationAction, NotificationConfig, NotificationOptions};
pub use policy::{decide, Action, CacheLookup, FallbackKind, NetworkOutcome, RequestMeta};
pub use store::{CacheEntry, CacheStore, MemoryCacheStorage};
pub use sync::SyncOutcome;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] SolarError),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

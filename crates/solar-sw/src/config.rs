//! Gatekeeper configuration

use serde::{Deserialize, Serialize};
use solar_common::{SolarError, Result};
use solar_net::OriginPolicy;
use std::path::Path;
use url::Url;

use crate::notification::NotificationConfig;

/// Current cache generation. Bump on every deployment.
pub const DEFAULT_CACHE_NAME: &str = "solar-system-v1";

/// Gatekeeper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Name of the current cache generation
    pub cache_name: String,

    /// Origin of the site being served
    pub origin: Url,

    /// URLs precached at install, absolute or root-relative
    pub manifest: Vec<String>,

    /// Third-party hosts (substring match) the worker may intercept
    pub allowed_hosts: Vec<String>,

    /// Offline fallback payloads
    pub offline: OfflineContent,

    /// Push notification settings
    pub notification: NotificationConfig,
}

/// Static bodies served when the network is unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineContent {
    /// Content-Language of both payloads
    pub lang: String,

    /// Document shown for failed navigations
    pub html: String,

    /// Message for every other failed request
    pub text: String,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/three.js/r128/three.min.js".to_string(),
            ],
            allowed_hosts: vec!["cdnjs.cloudflare.com".to_string()],
            offline: OfflineContent::default(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for OfflineContent {
    fn default() -> Self {
        Self {
            lang: "he".to_string(),
            html: OFFLINE_HTML.to_string(),
            text: "אתה במצב לא מקוון. חלק מהתוכן עשוי להיות לא זמין.".to_string(),
        }
    }
}

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="he" dir="rtl">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>מערכת השמש - לא מקוון</title>
<style>
body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
       background: #000010; color: #f0f0f0; font-family: system-ui, sans-serif; text-align: center; }
h1 { font-size: 1.6rem; }
</style>
</head>
<body>
<main>
<h1>אתה במצב לא מקוון</h1>
<p>חלק מהתוכן עשוי להיות לא זמין. נסה שוב כשהחיבור יחזור.</p>
</main>
</body>
</html>
"#;

impl GatekeeperConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SolarError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject configurations the gatekeeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(SolarError::config("cache_name must not be empty"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(SolarError::config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        self.manifest_urls().map(|_| ())
    }

    /// Resolve a root-relative or absolute URL against the site origin.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.origin.join(url).map_err(|e| {
            SolarError::config_with_source(format!("invalid URL '{url}'"), e)
        })
    }

    /// Manifest entries as absolute URLs, in manifest order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Interception scope: the site origin plus the allowed hosts.
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(&self.origin).allow_hosts(&self.allowed_hosts)
    }
}

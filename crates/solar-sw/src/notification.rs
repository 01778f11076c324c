//! Push notification display and click routing.
//!
//! There is no real push subscription behind this: a push event carries an
//! optional text payload, which becomes the notification body.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A user action offered on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier reported back on click.
    pub action: String,
    /// Button label.
    pub title: String,
    /// Button icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    fn new(action: &str, title: &str, icon: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
            icon: Some(icon.to_string()),
        }
    }
}

/// Action id that opens the app.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

/// Static notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    /// Body used when the push carries no payload.
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds (on, off, on, ...).
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    /// Page opened by the explore action.
    pub explore_url: String,
    /// Page opened by a click on the notification body.
    pub default_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "מערכת השמש".to_string(),
            default_body: "התראה חדשה ממערכת השמש".to_string(),
            icon: "icon-192.png".to_string(),
            badge: "badge-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            actions: vec![
                NotificationAction::new(ACTION_EXPLORE, "פתח את האפליקציה", "icon-192.png"),
                NotificationAction::new(ACTION_CLOSE, "סגור", "badge-72.png"),
            ],
            explore_url: "/index.html".to_string(),
            default_url: "/".to_string(),
        }
    }
}

/// Extra data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Arrival time, ms since the Unix epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// A notification ready to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

impl NotificationConfig {
    /// Build the notification for a push event.
    pub fn for_push(&self, payload: Option<&str>) -> Notification {
        let body = payload.unwrap_or(self.default_body.as_str()).to_string();

        Notification {
            title: self.title.clone(),
            options: NotificationOptions {
                body,
                icon: self.icon.clone(),
                badge: self.badge.clone(),
                vibrate: self.vibrate.clone(),
                data: NotificationData {
                    date_of_arrival: now_millis(),
                    primary_key: 1,
                },
                actions: self.actions.clone(),
            },
        }
    }

    /// Page to open for a click, `None` when the click only dismisses.
    pub fn click_target(&self, action: Option<&str>) -> Option<&str> {
        match action {
            Some(ACTION_CLOSE) => None,
            Some(ACTION_EXPLORE) => Some(self.explore_url.as_str()),
            _ => Some(self.default_url.as_str()),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

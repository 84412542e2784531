use serde::Serialize;
use tokio::sync::mpsc;

use super::controller::ScanSnapshot;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// Transient toast for the UI shell.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged(ScanSnapshot),
    Notification(Notification),
}

/// Where the controller pushes state changes and notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is rendering; nothing to do.
        let _ = self.send(event);
    }
}

#[cfg(feature = "desktop")]
pub use desktop::TauriSink;

#[cfg(feature = "desktop")]
mod desktop {
    use log::warn;
    use tauri::{AppHandle, Emitter};

    use super::{EventSink, SessionEvent};

    pub const STATE_CHANGED_EVENT: &str = "scan-state-changed";
    pub const NOTIFICATION_EVENT: &str = "scan-notification";

    pub struct TauriSink {
        app_handle: AppHandle,
    }

    impl TauriSink {
        pub fn new(app_handle: AppHandle) -> Self {
            Self { app_handle }
        }
    }

    impl EventSink for TauriSink {
        fn emit(&self, event: SessionEvent) {
            let result = match event {
                SessionEvent::StateChanged(snapshot) => {
                    self.app_handle.emit(STATE_CHANGED_EVENT, snapshot)
                }
                SessionEvent::Notification(notification) => {
                    self.app_handle.emit(NOTIFICATION_EVENT, notification)
                }
            };

            if let Err(err) = result {
                warn!("failed to emit scan event: {err}");
            }
        }
    }
}

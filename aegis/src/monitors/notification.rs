use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use aegis_ipc::{Event, NotificationInfo};

use super::{Callback, Monitor, SourceHandle};
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::Result;

/// A notification banner as observed in the accessibility tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub app: Option<String>,
    pub title: String,
    pub body: String,
    /// Handle of the native banner window, when one can be dismissed
    pub banner: Option<u64>,
}

pub trait NotificationBackend: Send + Sync + 'static {
    fn subscribe(&self, callback: Callback<RawNotification>) -> Result<SourceHandle>;
    fn dismiss_banner(&self, banner: u64) -> Result<()>;
}

type NotificationKey = (Option<String>, String, String);

struct Inner<B> {
    backend: Arc<B>,
    bus: EventBus,
    suppress_banners: bool,
    dedup_window: Duration,
    recent: Mutex<HashMap<NotificationKey, Instant>>,
    source: Mutex<Option<SourceHandle>>,
}

/// Replaces native notification banners with `NotificationReceived`.
pub struct NotificationMonitor<B: NotificationBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: NotificationBackend> Clone for NotificationMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: NotificationBackend> NotificationMonitor<B> {
    pub fn new(backend: Arc<B>, bus: EventBus, settings: &MonitorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                bus,
                suppress_banners: settings.suppress_native_banners,
                dedup_window: Duration::from_millis(settings.notification_dedup_ms),
                recent: Mutex::new(HashMap::new()),
                source: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self, raw: RawNotification) {
        if self.inner.suppress_banners {
            if let Some(banner) = raw.banner {
                if let Err(e) = self.inner.backend.dismiss_banner(banner) {
                    tracing::warn!("Failed to dismiss native banner: {}", e);
                }
            }
        }

        if raw.title.trim().is_empty() && raw.body.trim().is_empty() {
            tracing::debug!("Ignoring empty notification");
            return;
        }

        let key = (raw.app.clone(), raw.title.clone(), raw.body.clone());
        {
            let mut recent = self.inner.recent.lock().expect("notification lock poisoned");
            let window = self.inner.dedup_window;
            recent.retain(|_, seen| seen.elapsed() < window);
            if recent.contains_key(&key) {
                tracing::debug!("Duplicate notification suppressed: {}", raw.title);
                return;
            }
            recent.insert(key, Instant::now());
        }

        self.inner.bus.publish(Event::NotificationReceived {
            notification: NotificationInfo {
                app: raw.app,
                title: raw.title,
                body: raw.body,
            },
        });
    }
}

impl<B: NotificationBackend> Monitor for NotificationMonitor<B> {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn start(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let callback: Callback<RawNotification> = Arc::new(move |raw| {
            if let Some(inner) = weak.upgrade() {
                NotificationMonitor { inner }.handle(raw);
            }
        });
        let handle = self.inner.backend.subscribe(callback)?;
        *self
            .inner
            .source
            .lock()
            .expect("notification source lock poisoned") = Some(handle);
        Ok(())
    }
}

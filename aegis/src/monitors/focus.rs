use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;

use aegis_ipc::Event;

use super::policy::Debouncer;
use super::Monitor;
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::{Error, Result};

const ASSERTIONS_FILE: &str = "Assertions.json";
const MODES_FILE: &str = "ModeConfigurations.json";

/// Writers touch both state files in quick succession
const SETTLE: Duration = Duration::from_millis(100);

fn read_json(path: &Path, what: &'static str) -> Result<Option<Value>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Error::permission(format!("read {}", path.display())))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| Error::Decode { what, source })
}

/// Name of the active focus mode, `None` when focus is off.
///
/// The active mode's identifier comes from the assertions file; its
/// display name is looked up in the mode configurations, falling back to
/// the identifier itself.
pub fn read_focus_mode(dir: &Path) -> Result<Option<String>> {
    let Some(assertions) = read_json(&dir.join(ASSERTIONS_FILE), "focus assertions")? else {
        return Ok(None);
    };
    let identifier = assertions
        .pointer("/data/0/storeAssertionRecords")
        .and_then(Value::as_array)
        .and_then(|records| {
            records.iter().find_map(|record| {
                record
                    .pointer("/assertionDetails/assertionDetailsModeIdentifier")
                    .and_then(Value::as_str)
            })
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let Some(identifier) = identifier else {
        return Ok(None);
    };

    let name = match read_json(&dir.join(MODES_FILE), "focus mode configurations") {
        Ok(Some(modes)) => modes
            .pointer("/data/0/modeConfigurations")
            .and_then(|configs| configs.get(identifier.as_str()))
            .and_then(|config| config.pointer("/mode/name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!("Focus mode names unavailable: {}", e);
            None
        }
    };
    Ok(Some(name.unwrap_or(identifier)))
}

struct Inner {
    bus: EventBus,
    dir: PathBuf,
    debouncer: Debouncer<()>,
    /// Outer `None` until the first publish
    current: Mutex<Option<Option<String>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

/// Watches the focus state directory and publishes `FocusChanged` when the
/// active mode differs from the last published one.
#[derive(Clone)]
pub struct FocusMonitor {
    inner: Arc<Inner>,
}

impl FocusMonitor {
    pub fn new(bus: EventBus, settings: &MonitorSettings) -> Self {
        Self::with_dir(bus, settings.focus_dir())
    }

    pub fn with_dir(bus: EventBus, dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                dir,
                debouncer: Debouncer::new(SETTLE),
                current: Mutex::new(None),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Re-read the state files. Returns whether an event was published.
    pub fn refresh(&self) -> Result<bool> {
        let mode = read_focus_mode(&self.inner.dir)?;
        let mut current = self.inner.current.lock().expect("focus state lock poisoned");
        if current.as_ref() == Some(&mode) {
            tracing::debug!("Focus state files changed without a mode change");
            return Ok(false);
        }
        *current = Some(mode.clone());
        drop(current);

        tracing::info!("Focus mode: {}", mode.as_deref().unwrap_or("off"));
        self.inner.bus.publish(Event::FocusChanged { mode });
        Ok(true)
    }
}

fn is_state_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == ASSERTIONS_FILE || name == MODES_FILE)
}

impl Monitor for FocusMonitor {
    fn name(&self) -> &'static str {
        "focus"
    }

    fn start(&self) -> Result<()> {
        let dir = self.inner.dir.clone();
        if let Err(e) = std::fs::read_dir(&dir) {
            return Err(Error::permission(format!(
                "focus state directory {}: {}",
                dir.display(),
                e
            )));
        }
        self.refresh()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        *self.inner.watcher.lock().expect("focus watcher lock poisoned") = Some(watcher);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("Focus watch error: {}", e);
                        continue;
                    }
                };
                if !event.paths.iter().any(|p| is_state_file(p)) {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let monitor = FocusMonitor {
                    inner: Arc::clone(&inner),
                };
                inner.debouncer.schedule((), async move {
                    if let Err(e) = monitor.refresh() {
                        tracing::warn!("Failed to read focus mode: {}", e);
                    }
                });
            }
        });
        Ok(())
    }
}

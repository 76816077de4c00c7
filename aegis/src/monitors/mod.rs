//! OS signal monitors.
//!
//! Each monitor wraps one callback source behind a narrow backend trait,
//! applies its own dedup/debounce/cache policy, and republishes a
//! normalized event on the bus. Monitors never reference each other.

mod bluetooth;
mod brightness;
mod focus;
mod media;
mod notification;
pub mod policy;
mod volume;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub use bluetooth::{BatteryProvider, BluetoothBackend, BluetoothMonitor, BluetoothSignal};
pub use brightness::{BrightnessBackend, BrightnessKey, BrightnessMonitor, BrightnessSignal};
pub use focus::{read_focus_mode, FocusMonitor};
pub use media::MediaMonitor;
pub use notification::{NotificationBackend, NotificationMonitor, RawNotification};
pub use volume::{AudioBackend, AudioSample, AudioSignal, VolumeKey, VolumeMonitor};

/// Callback handed to a backend. May be invoked from any thread.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Keeps an OS callback registration alive. Dropping it unregisters.
pub struct SourceHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SourceHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Registration with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Hands a monitor's callback to an OS observer that was registered
/// earlier on another thread, typically the main run loop.
///
/// The observer calls `emit`; until the source is marked installed,
/// subscribing fails with a permission error.
pub struct CallbackSlot<T> {
    name: &'static str,
    installed: AtomicBool,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T: 'static> CallbackSlot<T> {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            installed: AtomicBool::new(false),
            callback: Mutex::new(None),
        })
    }

    pub fn mark_installed(&self) {
        self.installed.store(true, Ordering::SeqCst);
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Deliver to the current subscriber, if any.
    pub fn emit(&self, value: T) {
        let callback = self
            .callback
            .lock()
            .expect("callback slot lock poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(value);
        }
    }

    pub fn subscribe(self: &Arc<Self>, callback: Callback<T>) -> Result<SourceHandle> {
        if !self.is_installed() {
            return Err(Error::permission(format!("{} source is not available", self.name)));
        }
        *self.callback.lock().expect("callback slot lock poisoned") = Some(callback);
        let slot = Arc::clone(self);
        Ok(SourceHandle::new(move || {
            *slot.callback.lock().expect("callback slot lock poisoned") = None;
        }))
    }
}

/// The OS backends the monitors subscribe through on this platform.
pub trait SignalBackends: Send + 'static {
    type Audio: AudioBackend;
    type Brightness: BrightnessBackend;
    type Bluetooth: BluetoothBackend;
    type Battery: BatteryProvider;
    type Notifications: NotificationBackend;

    fn audio(&self) -> Arc<Self::Audio>;
    fn brightness(&self) -> Arc<Self::Brightness>;
    fn bluetooth(&self) -> Arc<Self::Bluetooth>;
    fn battery(&self) -> Arc<Self::Battery>;
    fn notifications(&self) -> Arc<Self::Notifications>;
}

pub trait Monitor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Register with the OS source. Must be called inside the runtime.
    fn start(&self) -> Result<()>;
}

/// Start every monitor. A monitor that fails to start (typically a
/// missing permission) stays inert for the process lifetime; the others
/// are unaffected. Returns the names of the monitors that started.
pub fn start_all(monitors: &[Arc<dyn Monitor>]) -> Vec<&'static str> {
    let mut started = Vec::new();
    for monitor in monitors {
        match monitor.start() {
            Ok(()) => {
                tracing::info!("{} monitor started", monitor.name());
                started.push(monitor.name());
            }
            Err(e) if e.is_permission() => {
                tracing::warn!("{} monitor disabled: {}", monitor.name(), e);
            }
            Err(e) => {
                tracing::warn!("{} monitor failed to start: {}", monitor.name(), e);
            }
        }
    }
    started
}

/// Backend stubs for platforms without an implementation. Every
/// subscription reports a missing permission so the monitor stays inert.
pub mod unsupported {
    use super::*;
    use aegis_ipc::HardwareAddress;

    pub struct Unsupported;

    /// Every backend unavailable.
    pub struct UnsupportedSignals;

    impl SignalBackends for UnsupportedSignals {
        type Audio = Unsupported;
        type Brightness = Unsupported;
        type Bluetooth = Unsupported;
        type Battery = Unsupported;
        type Notifications = Unsupported;

        fn audio(&self) -> Arc<Unsupported> {
            Arc::new(Unsupported)
        }
        fn brightness(&self) -> Arc<Unsupported> {
            Arc::new(Unsupported)
        }
        fn bluetooth(&self) -> Arc<Unsupported> {
            Arc::new(Unsupported)
        }
        fn battery(&self) -> Arc<Unsupported> {
            Arc::new(Unsupported)
        }
        fn notifications(&self) -> Arc<Unsupported> {
            Arc::new(Unsupported)
        }
    }

    impl AudioBackend for Unsupported {
        fn subscribe(&self, _callback: Callback<AudioSignal>) -> Result<SourceHandle> {
            Err(Error::permission("audio backend unavailable on this platform"))
        }
        fn sample(&self) -> Option<AudioSample> {
            None
        }
        fn set_volume(&self, _level: f32) -> Result<()> {
            Err(Error::permission("audio backend unavailable on this platform"))
        }
        fn output(&self) -> Option<(String, bool)> {
            None
        }
    }

    impl BrightnessBackend for Unsupported {
        fn subscribe(&self, _callback: Callback<BrightnessSignal>) -> Result<SourceHandle> {
            Err(Error::permission("brightness backend unavailable on this platform"))
        }
        fn brightness(&self) -> Option<f32> {
            None
        }
        fn set_brightness(&self, _level: f32) -> Result<()> {
            Err(Error::permission("brightness backend unavailable on this platform"))
        }
    }

    impl BluetoothBackend for Unsupported {
        fn subscribe(&self, _callback: Callback<BluetoothSignal>) -> Result<SourceHandle> {
            Err(Error::permission("bluetooth backend unavailable on this platform"))
        }
    }

    impl BatteryProvider for Unsupported {
        fn battery_level(&self, _address: &HardwareAddress) -> Result<Option<u8>> {
            Ok(None)
        }
    }

    impl NotificationBackend for Unsupported {
        fn subscribe(&self, _callback: Callback<RawNotification>) -> Result<SourceHandle> {
            Err(Error::permission("notification backend unavailable on this platform"))
        }
        fn dismiss_banner(&self, _banner: u64) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: &'static str,
        fail: Option<fn() -> Error>,
    }

    impl Monitor for Fake {
        fn name(&self) -> &'static str {
            self.name
        }
        fn start(&self) -> Result<()> {
            match self.fail {
                Some(err) => Err(err()),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn test_permission_failure_isolated_to_one_monitor() {
        let monitors: Vec<Arc<dyn Monitor>> = vec![
            Arc::new(Fake {
                name: "volume",
                fail: None,
            }),
            Arc::new(Fake {
                name: "bluetooth",
                fail: Some(|| Error::permission("bluetooth")),
            }),
            Arc::new(Fake {
                name: "media",
                fail: Some(|| Error::Io(std::io::Error::other("spawn failed"))),
            }),
            Arc::new(Fake {
                name: "focus",
                fail: None,
            }),
        ];
        assert_eq!(start_all(&monitors), vec!["volume", "focus"]);
    }

    #[test]
    fn test_source_handle_runs_cancel_once_on_drop() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let c = Arc::clone(&cancelled);
        let handle = SourceHandle::new(move || c.store(true, Ordering::SeqCst));
        assert!(!cancelled.load(Ordering::SeqCst));
        drop(handle);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_slot_requires_install() {
        let slot = CallbackSlot::<u32>::new("test");
        let err = slot.subscribe(Arc::new(|_| {})).err().unwrap();
        assert!(err.is_permission());

        slot.mark_installed();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let handle = slot.subscribe(Arc::new(move |v| s.lock().unwrap().push(v))).unwrap();
        slot.emit(1);
        slot.emit(2);
        drop(handle);
        slot.emit(3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}

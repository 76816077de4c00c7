use std::sync::{Arc, Mutex};

use aegis_ipc::Event;

use super::{Callback, Monitor, SourceHandle};
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessKey {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessSignal {
    Changed,
    Key(BrightnessKey),
}

/// Built-in display brightness.
pub trait BrightnessBackend: Send + Sync + 'static {
    fn subscribe(&self, callback: Callback<BrightnessSignal>) -> Result<SourceHandle>;
    /// 0.0 - 1.0, `None` when the display cannot report it
    fn brightness(&self) -> Option<f32>;
    fn set_brightness(&self, level: f32) -> Result<()>;
}

#[derive(Debug, Default)]
struct BrightnessState {
    last: Option<f32>,
    estimate: Option<f32>,
}

struct Inner<B> {
    backend: Arc<B>,
    bus: EventBus,
    step: f32,
    default_level: f32,
    state: Mutex<BrightnessState>,
    source: Mutex<Option<SourceHandle>>,
}

/// Same policy as the volume monitor: key presses always publish,
/// property callbacks are deduplicated, and a locally modeled level
/// stands in when the display cannot report one.
pub struct BrightnessMonitor<B: BrightnessBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: BrightnessBackend> Clone for BrightnessMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BrightnessBackend> BrightnessMonitor<B> {
    pub fn new(backend: Arc<B>, bus: EventBus, settings: &MonitorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                bus,
                step: settings.estimated_step,
                default_level: settings.estimated_default,
                state: Mutex::new(BrightnessState::default()),
                source: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrightnessState> {
        self.inner.state.lock().expect("brightness state lock poisoned")
    }

    fn publish(&self, level: f32, estimated: bool) {
        self.inner
            .bus
            .publish(Event::BrightnessChanged { level, estimated });
    }

    pub fn handle(&self, signal: BrightnessSignal) {
        let mut state = self.lock();
        match signal {
            BrightnessSignal::Key(key) => {
                if state.estimate.is_none() {
                    if let Some(level) = self.inner.backend.brightness() {
                        state.last = Some(level);
                        drop(state);
                        self.publish(level, false);
                        return;
                    }
                    tracing::debug!("Display cannot report brightness, estimating");
                }
                let current = state.estimate.unwrap_or(self.inner.default_level);
                let next = match key {
                    BrightnessKey::Up => (current + self.inner.step).min(1.0),
                    BrightnessKey::Down => (current - self.inner.step).max(0.0),
                };
                state.estimate = Some(next);
                drop(state);
                self.publish(next, true);
            }
            BrightnessSignal::Changed => {
                if state.estimate.is_some() {
                    return;
                }
                let Some(level) = self.inner.backend.brightness() else {
                    return;
                };
                if state
                    .last
                    .is_some_and(|last| (last - level).abs() < f32::EPSILON)
                {
                    tracing::debug!("Duplicate brightness callback suppressed");
                    return;
                }
                state.last = Some(level);
                drop(state);
                self.publish(level, false);
            }
        }
    }

    /// Set the display brightness, clamped to 0..=1, and publish it.
    pub fn set_level(&self, level: f32) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        let mut state = self.lock();

        if state.estimate.is_some() {
            state.estimate = Some(level);
            drop(state);
            self.publish(level, true);
            return Ok(());
        }

        self.inner.backend.set_brightness(level)?;
        let level = self.inner.backend.brightness().unwrap_or(level);
        state.last = Some(level);
        drop(state);
        self.publish(level, false);
        Ok(())
    }
}

impl<B: BrightnessBackend> Monitor for BrightnessMonitor<B> {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn start(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let callback: Callback<BrightnessSignal> = Arc::new(move |signal| {
            if let Some(inner) = weak.upgrade() {
                BrightnessMonitor { inner }.handle(signal);
            }
        });
        let handle = self.inner.backend.subscribe(callback)?;
        *self
            .inner
            .source
            .lock()
            .expect("brightness source lock poisoned") = Some(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockDisplay {
        level: Mutex<Option<f32>>,
        callback: Mutex<Option<Callback<BrightnessSignal>>>,
    }

    impl MockDisplay {
        fn with_level(level: f32) -> Self {
            let mock = Self::default();
            *mock.level.lock().unwrap() = Some(level);
            mock
        }

        fn emit(&self, signal: BrightnessSignal) {
            let callback = self.callback.lock().unwrap().clone().unwrap();
            callback(signal);
        }
    }

    impl BrightnessBackend for MockDisplay {
        fn subscribe(&self, callback: Callback<BrightnessSignal>) -> Result<SourceHandle> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(SourceHandle::noop())
        }
        fn brightness(&self) -> Option<f32> {
            *self.level.lock().unwrap()
        }
        fn set_brightness(&self, level: f32) -> Result<()> {
            *self.level.lock().unwrap() = Some(level);
            Ok(())
        }
    }

    type Fixture = (
        BrightnessMonitor<MockDisplay>,
        Arc<MockDisplay>,
        EventBus,
        Arc<Mutex<Vec<(f32, bool)>>>,
    );

    fn setup(display: MockDisplay) -> Fixture {
        let display = Arc::new(display);
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(aegis_ipc::EventKind::BrightnessChanged, move |event| {
            if let Event::BrightnessChanged { level, estimated } = event {
                s.lock().unwrap().push((*level, *estimated));
            }
        })
        .detach();
        let monitor =
            BrightnessMonitor::new(Arc::clone(&display), bus.clone(), &MonitorSettings::default());
        monitor.start().unwrap();
        (monitor, display, bus, seen)
    }

    #[test]
    fn test_key_at_max_publishes_every_time() {
        let (_monitor, display, bus, seen) = setup(MockDisplay::with_level(1.0));
        display.emit(BrightnessSignal::Key(BrightnessKey::Up));
        display.emit(BrightnessSignal::Key(BrightnessKey::Up));
        bus.flush();
        assert_eq!(*seen.lock().unwrap(), vec![(1.0, false), (1.0, false)]);
    }

    #[test]
    fn test_changed_deduplicates() {
        let (_monitor, display, bus, seen) = setup(MockDisplay::with_level(0.25));
        display.emit(BrightnessSignal::Changed);
        display.emit(BrightnessSignal::Changed);
        *display.level.lock().unwrap() = Some(0.75);
        display.emit(BrightnessSignal::Changed);
        bus.flush();
        assert_eq!(*seen.lock().unwrap(), vec![(0.25, false), (0.75, false)]);
    }

    #[test]
    fn test_estimates_without_readback() {
        let (monitor, display, bus, seen) = setup(MockDisplay::default());
        display.emit(BrightnessSignal::Key(BrightnessKey::Down));
        display.emit(BrightnessSignal::Changed);
        monitor.set_level(-3.0).unwrap();
        display.emit(BrightnessSignal::Key(BrightnessKey::Down));
        bus.flush();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0.4375, true), (0.0, true), (0.0, true)]
        );
    }

    #[test]
    fn test_set_level_writes_backend() {
        let (monitor, display, bus, seen) = setup(MockDisplay::with_level(0.5));
        monitor.set_level(0.8).unwrap();
        bus.flush();
        assert_eq!(display.brightness(), Some(0.8));
        assert_eq!(*seen.lock().unwrap(), vec![(0.8, false)]);
    }
}

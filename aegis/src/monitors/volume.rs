use std::sync::{Arc, Mutex};

use aegis_ipc::Event;

use super::{Callback, Monitor, SourceHandle};
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSample {
    /// 0.0 - 1.0
    pub level: f32,
    pub muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKey {
    Up,
    Down,
    Mute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioSignal {
    /// Volume or mute property of the default output changed
    PropertyChanged,
    /// A media key was pressed
    Key(VolumeKey),
    /// The default output device changed
    OutputChanged { device: String, supports_volume: bool },
}

/// Default audio output device.
pub trait AudioBackend: Send + Sync + 'static {
    fn subscribe(&self, callback: Callback<AudioSignal>) -> Result<SourceHandle>;
    /// `None` when the output cannot report a level.
    fn sample(&self) -> Option<AudioSample>;
    fn set_volume(&self, level: f32) -> Result<()>;
    /// Name of the default output and whether it reports a level.
    fn output(&self) -> Option<(String, bool)>;
}

#[derive(Debug, Default)]
struct VolumeState {
    last: Option<AudioSample>,
    /// Locally modeled value, used while the output cannot report one
    estimate: Option<AudioSample>,
}

struct Inner<B> {
    backend: Arc<B>,
    bus: EventBus,
    step: f32,
    default_level: f32,
    state: Mutex<VolumeState>,
    source: Mutex<Option<SourceHandle>>,
}

pub struct VolumeMonitor<B: AudioBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: AudioBackend> Clone for VolumeMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn same(a: &AudioSample, b: &AudioSample) -> bool {
    (a.level - b.level).abs() < f32::EPSILON && a.muted == b.muted
}

impl<B: AudioBackend> VolumeMonitor<B> {
    pub fn new(backend: Arc<B>, bus: EventBus, settings: &MonitorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                bus,
                step: settings.estimated_step,
                default_level: settings.estimated_default,
                state: Mutex::new(VolumeState::default()),
                source: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VolumeState> {
        self.inner.state.lock().expect("volume state lock poisoned")
    }

    fn default_estimate(&self) -> AudioSample {
        AudioSample {
            level: self.inner.default_level,
            muted: false,
        }
    }

    fn publish(&self, sample: AudioSample, estimated: bool) {
        self.inner.bus.publish(Event::VolumeChanged {
            level: sample.level,
            muted: sample.muted,
            estimated,
        });
    }

    pub fn is_estimating(&self) -> bool {
        self.lock().estimate.is_some()
    }

    pub fn handle(&self, signal: AudioSignal) {
        match signal {
            AudioSignal::Key(key) => self.handle_key(key),
            AudioSignal::PropertyChanged => self.handle_property_changed(),
            AudioSignal::OutputChanged {
                device,
                supports_volume,
            } => self.handle_output_changed(device, supports_volume),
        }
    }

    /// Key presses always publish, even when the value did not move.
    fn handle_key(&self, key: VolumeKey) {
        let mut state = self.lock();

        if state.estimate.is_none() {
            if let Some(sample) = self.inner.backend.sample() {
                state.last = Some(sample);
                drop(state);
                self.publish(sample, false);
                return;
            }
            tracing::debug!("Output cannot report volume, estimating");
            state.estimate = Some(self.default_estimate());
        }

        let mut estimate = state.estimate.unwrap_or_else(|| self.default_estimate());
        match key {
            VolumeKey::Up => {
                estimate.level = (estimate.level + self.inner.step).min(1.0);
                estimate.muted = false;
            }
            VolumeKey::Down => estimate.level = (estimate.level - self.inner.step).max(0.0),
            VolumeKey::Mute => estimate.muted = !estimate.muted,
        }
        state.estimate = Some(estimate);
        drop(state);
        self.publish(estimate, true);
    }

    fn handle_property_changed(&self) {
        let mut state = self.lock();
        if state.estimate.is_some() {
            return;
        }
        let Some(sample) = self.inner.backend.sample() else {
            return;
        };
        if state.last.as_ref().is_some_and(|last| same(last, &sample)) {
            tracing::debug!("Duplicate volume callback suppressed");
            return;
        }
        state.last = Some(sample);
        drop(state);
        self.publish(sample, false);
    }

    fn handle_output_changed(&self, device: String, supports_volume: bool) {
        tracing::info!(
            "Audio output changed to {} (reports volume: {})",
            device,
            supports_volume
        );
        self.inner.bus.publish(Event::AudioOutputChanged {
            device,
            supports_volume,
        });

        let mut state = self.lock();
        state.last = None;
        if !supports_volume {
            state.estimate = Some(self.default_estimate());
            return;
        }
        state.estimate = None;
        if let Some(sample) = self.inner.backend.sample() {
            state.last = Some(sample);
            drop(state);
            self.publish(sample, false);
        }
    }

    /// Set the output level, clamped to 0..=1, and publish the result.
    pub fn set_level(&self, level: f32) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        let mut state = self.lock();

        if let Some(estimate) = state.estimate.as_mut() {
            estimate.level = level;
            let estimate = *estimate;
            drop(state);
            self.publish(estimate, true);
            return Ok(());
        }

        self.inner.backend.set_volume(level)?;
        let sample = self.inner.backend.sample().unwrap_or(AudioSample {
            level,
            muted: false,
        });
        state.last = Some(sample);
        drop(state);
        self.publish(sample, false);
        Ok(())
    }
}

impl<B: AudioBackend> Monitor for VolumeMonitor<B> {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn start(&self) -> Result<()> {
        if let Some((device, false)) = self.inner.backend.output() {
            tracing::info!("{} cannot report volume, estimating", device);
            self.lock().estimate = Some(self.default_estimate());
        }

        let weak = Arc::downgrade(&self.inner);
        let callback: Callback<AudioSignal> = Arc::new(move |signal| {
            if let Some(inner) = weak.upgrade() {
                VolumeMonitor { inner }.handle(signal);
            }
        });
        let handle = self.inner.backend.subscribe(callback)?;
        *self.inner.source.lock().expect("volume source lock poisoned") = Some(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_ipc::EventKind;

    #[derive(Default)]
    struct MockAudio {
        sample: Mutex<Option<AudioSample>>,
        set_calls: Mutex<Vec<f32>>,
        callback: Mutex<Option<Callback<AudioSignal>>>,
        output: Mutex<Option<(String, bool)>>,
    }

    impl MockAudio {
        fn with_sample(level: f32, muted: bool) -> Self {
            let mock = Self::default();
            *mock.sample.lock().unwrap() = Some(AudioSample { level, muted });
            *mock.output.lock().unwrap() = Some(("Speakers".to_string(), true));
            mock
        }

        fn emit(&self, signal: AudioSignal) {
            let callback = self.callback.lock().unwrap().clone().unwrap();
            callback(signal);
        }
    }

    impl AudioBackend for MockAudio {
        fn subscribe(&self, callback: Callback<AudioSignal>) -> Result<SourceHandle> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(SourceHandle::noop())
        }
        fn sample(&self) -> Option<AudioSample> {
            *self.sample.lock().unwrap()
        }
        fn set_volume(&self, level: f32) -> Result<()> {
            self.set_calls.lock().unwrap().push(level);
            let mut sample = self.sample.lock().unwrap();
            if let Some(s) = sample.as_mut() {
                s.level = level;
            }
            Ok(())
        }
        fn output(&self) -> Option<(String, bool)> {
            self.output.lock().unwrap().clone()
        }
    }

    type Fixture = (
        VolumeMonitor<MockAudio>,
        Arc<MockAudio>,
        EventBus,
        Arc<Mutex<Vec<Event>>>,
    );

    fn setup(backend: MockAudio) -> Fixture {
        let backend = Arc::new(backend);
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        bus.subscribe_all(move |event| e.lock().unwrap().push(event.clone()))
            .detach();
        let monitor =
            VolumeMonitor::new(Arc::clone(&backend), bus.clone(), &MonitorSettings::default());
        monitor.start().unwrap();
        (monitor, backend, bus, events)
    }

    fn volume_events(events: &Arc<Mutex<Vec<Event>>>) -> Vec<(f32, bool, bool)> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::VolumeChanged {
                    level,
                    muted,
                    estimated,
                } => Some((*level, *muted, *estimated)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_key_at_max_still_publishes() {
        let (_monitor, backend, bus, events) = setup(MockAudio::with_sample(1.0, false));

        backend.emit(AudioSignal::Key(VolumeKey::Up));
        backend.emit(AudioSignal::Key(VolumeKey::Up));
        bus.flush();

        assert_eq!(
            volume_events(&events),
            vec![(1.0, false, false), (1.0, false, false)]
        );
    }

    #[test]
    fn test_duplicate_property_callbacks_are_suppressed() {
        let (_monitor, backend, bus, events) = setup(MockAudio::with_sample(0.5, false));

        backend.emit(AudioSignal::PropertyChanged);
        backend.emit(AudioSignal::PropertyChanged);
        *backend.sample.lock().unwrap() = Some(AudioSample {
            level: 0.5,
            muted: true,
        });
        backend.emit(AudioSignal::PropertyChanged);
        bus.flush();

        assert_eq!(
            volume_events(&events),
            vec![(0.5, false, false), (0.5, true, false)]
        );
    }

    #[test]
    fn test_estimates_when_output_cannot_report() {
        let (monitor, backend, bus, events) = setup(MockAudio::default());

        backend.emit(AudioSignal::Key(VolumeKey::Up));
        backend.emit(AudioSignal::Key(VolumeKey::Up));
        backend.emit(AudioSignal::Key(VolumeKey::Down));
        backend.emit(AudioSignal::Key(VolumeKey::Mute));
        bus.flush();

        assert!(monitor.is_estimating());
        assert_eq!(
            volume_events(&events),
            vec![
                (0.5625, false, true),
                (0.625, false, true),
                (0.5625, false, true),
                (0.5625, true, true),
            ]
        );
    }

    #[test]
    fn test_estimate_clamps_at_bounds() {
        let (monitor, backend, bus, events) = setup(MockAudio::default());
        backend.emit(AudioSignal::Key(VolumeKey::Down));
        monitor.set_level(0.99).unwrap();
        backend.emit(AudioSignal::Key(VolumeKey::Up));
        bus.flush();

        assert_eq!(volume_events(&events).last(), Some(&(1.0, false, true)));
    }

    #[test]
    fn test_output_change_to_bluetooth_resets_estimate() {
        let (monitor, backend, bus, events) = setup(MockAudio::with_sample(0.3, false));

        backend.emit(AudioSignal::OutputChanged {
            device: "AirPods".to_string(),
            supports_volume: false,
        });
        backend.emit(AudioSignal::Key(VolumeKey::Down));
        bus.flush();

        assert!(monitor.is_estimating());
        let all = events.lock().unwrap().clone();
        assert!(all.iter().any(|e| e.kind() == EventKind::AudioOutputChanged));
        assert_eq!(volume_events(&events), vec![(0.4375, false, true)]);
    }

    #[test]
    fn test_output_change_back_publishes_real_level() {
        let (monitor, backend, bus, events) = setup(MockAudio::with_sample(0.3, false));

        backend.emit(AudioSignal::OutputChanged {
            device: "AirPods".to_string(),
            supports_volume: false,
        });
        backend.emit(AudioSignal::OutputChanged {
            device: "Speakers".to_string(),
            supports_volume: true,
        });
        bus.flush();

        assert!(!monitor.is_estimating());
        assert_eq!(volume_events(&events), vec![(0.3, false, false)]);
    }

    #[test]
    fn test_set_level_clamps_and_publishes() {
        let (monitor, backend, bus, events) = setup(MockAudio::with_sample(0.3, false));

        monitor.set_level(1.7).unwrap();
        bus.flush();

        assert_eq!(*backend.set_calls.lock().unwrap(), vec![1.0]);
        assert_eq!(volume_events(&events), vec![(1.0, false, false)]);
    }
}

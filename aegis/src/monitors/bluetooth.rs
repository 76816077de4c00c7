use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use aegis_ipc::{BluetoothDeviceInfo, DeviceCategory, Event, HardwareAddress};

use super::policy::{Debouncer, EchoSuppressor, LruCache};
use super::{Callback, Monitor, SourceHandle};
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothSignal {
    Connected {
        name: String,
        address: HardwareAddress,
    },
    Disconnected {
        name: String,
        address: HardwareAddress,
    },
}

impl BluetoothSignal {
    fn address(&self) -> &HardwareAddress {
        match self {
            BluetoothSignal::Connected { address, .. }
            | BluetoothSignal::Disconnected { address, .. } => address,
        }
    }
}

pub trait BluetoothBackend: Send + Sync + 'static {
    fn subscribe(&self, callback: Callback<BluetoothSignal>) -> Result<SourceHandle>;
}

/// Battery lookup for a device. May block; it is run off the runtime.
pub trait BatteryProvider: Send + Sync + 'static {
    fn battery_level(&self, address: &HardwareAddress) -> Result<Option<u8>>;
}

#[derive(Debug, Clone, Copy)]
struct BatterySample {
    level: Option<u8>,
    sampled_at: Instant,
}

struct Inner<B, P> {
    backend: Arc<B>,
    battery: Arc<P>,
    bus: EventBus,
    debouncer: Debouncer<HardwareAddress>,
    echo: Mutex<EchoSuppressor<HardwareAddress>>,
    batteries: Mutex<LruCache<HardwareAddress, BatterySample>>,
    battery_max_age: Duration,
    devices: Mutex<HashMap<HardwareAddress, BluetoothDeviceInfo>>,
    source: Mutex<Option<SourceHandle>>,
}

/// Coalesces connect/disconnect callbacks per device address and drops
/// reconnects that follow a disconnect too closely to be real.
pub struct BluetoothMonitor<B: BluetoothBackend, P: BatteryProvider> {
    inner: Arc<Inner<B, P>>,
}

impl<B: BluetoothBackend, P: BatteryProvider> Clone for BluetoothMonitor<B, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BluetoothBackend, P: BatteryProvider> BluetoothMonitor<B, P> {
    pub fn new(backend: Arc<B>, battery: Arc<P>, bus: EventBus, settings: &MonitorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                battery,
                bus,
                debouncer: Debouncer::new(Duration::from_millis(settings.bluetooth_settle_ms)),
                echo: Mutex::new(EchoSuppressor::new(Duration::from_millis(
                    settings.reconnect_window_ms,
                ))),
                batteries: Mutex::new(LruCache::new(settings.battery_cache_size)),
                battery_max_age: Duration::from_millis(settings.battery_max_age_ms),
                devices: Mutex::new(HashMap::new()),
                source: Mutex::new(None),
            }),
        }
    }

    /// Devices whose connection has been published and not yet withdrawn.
    pub fn connected_devices(&self) -> Vec<BluetoothDeviceInfo> {
        let devices = self.inner.devices.lock().expect("device map lock poisoned");
        let mut list: Vec<BluetoothDeviceInfo> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Must run inside the runtime: publishes are scheduled on timers.
    pub fn handle(&self, signal: BluetoothSignal) {
        let address = signal.address().clone();

        match signal {
            BluetoothSignal::Connected { name, address } => {
                let echo = self
                    .inner
                    .echo
                    .lock()
                    .expect("echo lock poisoned")
                    .is_echo(&address);
                if echo {
                    self.inner.debouncer.cancel(&address);
                    tracing::debug!("Suppressed reconnect echo from {} ({})", name, address);
                    return;
                }

                let inner = Arc::clone(&self.inner);
                self.inner.debouncer.schedule(address.clone(), async move {
                    let battery = inner.battery_for(&address).await;
                    let device = BluetoothDeviceInfo {
                        category: DeviceCategory::infer(&name),
                        name,
                        address: address.clone(),
                        connected: true,
                        battery,
                    };
                    tracing::info!("Bluetooth device connected: {}", device.name);
                    inner
                        .devices
                        .lock()
                        .expect("device map lock poisoned")
                        .insert(address, device.clone());
                    inner.bus.publish(Event::DeviceConnected { device });
                });
            }
            BluetoothSignal::Disconnected { name, .. } => {
                self.inner
                    .echo
                    .lock()
                    .expect("echo lock poisoned")
                    .note_disconnect(address.clone());

                let inner = Arc::clone(&self.inner);
                self.inner.debouncer.schedule(address.clone(), async move {
                    let known = inner
                        .devices
                        .lock()
                        .expect("device map lock poisoned")
                        .remove(&address);
                    let device = match known {
                        Some(mut device) => {
                            device.connected = false;
                            device
                        }
                        None => BluetoothDeviceInfo {
                            category: DeviceCategory::infer(&name),
                            name,
                            address,
                            connected: false,
                            battery: None,
                        },
                    };
                    tracing::info!("Bluetooth device disconnected: {}", device.name);
                    inner.bus.publish(Event::DeviceDisconnected { device });
                });
            }
        }
    }
}

impl<B: BluetoothBackend, P: BatteryProvider> Inner<B, P> {
    /// Cached battery level, re-queried once older than the max age.
    /// A failed query falls back to the stale value.
    async fn battery_for(&self, address: &HardwareAddress) -> Option<u8> {
        let cached = self
            .batteries
            .lock()
            .expect("battery cache lock poisoned")
            .get(address)
            .copied();
        if let Some(sample) = cached {
            if sample.sampled_at.elapsed() < self.battery_max_age {
                return sample.level;
            }
        }

        let provider = Arc::clone(&self.battery);
        let lookup = address.clone();
        let result = tokio::task::spawn_blocking(move || provider.battery_level(&lookup)).await;

        match result {
            Ok(Ok(level)) => {
                self.batteries
                    .lock()
                    .expect("battery cache lock poisoned")
                    .insert(
                        address.clone(),
                        BatterySample {
                            level,
                            sampled_at: Instant::now(),
                        },
                    );
                level
            }
            Ok(Err(e)) => {
                tracing::warn!("Battery lookup for {} failed: {}", address, e);
                cached.and_then(|s| s.level)
            }
            Err(e) => {
                tracing::warn!("Battery lookup for {} panicked: {}", address, e);
                cached.and_then(|s| s.level)
            }
        }
    }
}

impl<B: BluetoothBackend, P: BatteryProvider> Monitor for BluetoothMonitor<B, P> {
    fn name(&self) -> &'static str {
        "bluetooth"
    }

    fn start(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BluetoothSignal>();
        let callback: Callback<BluetoothSignal> = Arc::new(move |signal| {
            let _ = tx.send(signal);
        });
        let handle = self.inner.backend.subscribe(callback)?;
        *self.inner.source.lock().expect("bluetooth source lock poisoned") = Some(handle);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                BluetoothMonitor { inner }.handle(signal);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use aegis_ipc::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoBackend;

    impl BluetoothBackend for NoBackend {
        fn subscribe(&self, _callback: Callback<BluetoothSignal>) -> Result<SourceHandle> {
            Ok(SourceHandle::noop())
        }
    }

    #[derive(Default)]
    struct MockBattery {
        level: Mutex<Option<u8>>,
        fail: Mutex<bool>,
        queries: AtomicUsize,
    }

    impl BatteryProvider for MockBattery {
        fn battery_level(&self, _address: &HardwareAddress) -> Result<Option<u8>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(Error::Io(std::io::Error::other("ioreg failed")));
            }
            Ok(*self.level.lock().unwrap())
        }
    }

    type Fixture = (
        BluetoothMonitor<NoBackend, MockBattery>,
        Arc<MockBattery>,
        EventBus,
        Arc<Mutex<Vec<Event>>>,
    );

    fn setup() -> Fixture {
        let battery = Arc::new(MockBattery::default());
        *battery.level.lock().unwrap() = Some(80);
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        bus.subscribe_all(move |event| e.lock().unwrap().push(event.clone()))
            .detach();
        let monitor = BluetoothMonitor::new(
            Arc::new(NoBackend),
            Arc::clone(&battery),
            bus.clone(),
            &MonitorSettings::default(),
        );
        (monitor, battery, bus, events)
    }

    fn connected(address: &str) -> BluetoothSignal {
        BluetoothSignal::Connected {
            name: "AirPods Pro".to_string(),
            address: HardwareAddress::new(address),
        }
    }

    fn disconnected(address: &str) -> BluetoothSignal {
        BluetoothSignal::Disconnected {
            name: "AirPods Pro".to_string(),
            address: HardwareAddress::new(address),
        }
    }

    fn kinds(events: &Arc<Mutex<Vec<Event>>>) -> Vec<EventKind> {
        events.lock().unwrap().iter().map(Event::kind).collect()
    }

    async fn settle(bus: &EventBus, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        // Battery lookups run on the blocking pool
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        bus.flush();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_callbacks_coalesce_into_one_publish() {
        let (monitor, _battery, bus, events) = setup();

        monitor.handle(connected("AA:BB:CC:DD:EE:FF"));
        monitor.handle(connected("aa-bb-cc-dd-ee-ff"));
        monitor.handle(connected("AABBCCDDEEFF"));
        settle(&bus, 600).await;

        let all = events.lock().unwrap().clone();
        assert_eq!(all.len(), 1);
        match &all[0] {
            Event::DeviceConnected { device } => {
                assert_eq!(device.category, DeviceCategory::Earbuds);
                assert_eq!(device.battery, Some(80));
                assert!(device.connected);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(monitor.connected_devices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_window_is_suppressed() {
        let (monitor, _battery, bus, events) = setup();

        monitor.handle(disconnected("aa:bb"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 1000).await;

        assert!(!kinds(&events).contains(&EventKind::DeviceConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_reconnect_publishes_nothing() {
        let (monitor, _battery, bus, events) = setup();

        monitor.handle(disconnected("aa:bb"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 1000).await;

        assert!(kinds(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_window_publishes() {
        let (monitor, _battery, bus, events) = setup();

        monitor.handle(disconnected("aa:bb"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;

        assert_eq!(
            kinds(&events),
            vec![EventKind::DeviceDisconnected, EventKind::DeviceConnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_cached_then_refreshed_when_stale() {
        let (monitor, battery, bus, _events) = setup();

        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;
        monitor.handle(disconnected("aa:bb"));
        settle(&bus, 3000).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;
        assert_eq!(battery.queries.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        monitor.handle(disconnected("aa:bb"));
        settle(&bus, 3000).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;
        assert_eq!(battery.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_battery_query_falls_back_to_stale_value() {
        let (monitor, battery, bus, events) = setup();

        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        *battery.fail.lock().unwrap() = true;
        monitor.handle(disconnected("aa:bb"));
        settle(&bus, 3000).await;
        monitor.handle(connected("aa:bb"));
        settle(&bus, 600).await;

        let last = events.lock().unwrap().last().cloned();
        match last {
            Some(Event::DeviceConnected { device }) => assert_eq!(device.battery, Some(80)),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}

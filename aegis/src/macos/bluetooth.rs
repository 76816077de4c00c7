use std::process::Command;
use std::sync::Arc;

use objc2::rc::Retained;
use objc2::runtime::{AnyClass, AnyObject};
use objc2::{define_class, msg_send, sel, DefinedClass};
use objc2_foundation::{MainThreadMarker, NSObject, NSObjectProtocol, NSString};
use serde_json::Value;

use aegis_ipc::HardwareAddress;

use crate::error::{Error, Result};
use crate::monitors::{
    BatteryProvider, BluetoothBackend, BluetoothSignal, Callback, CallbackSlot, SourceHandle,
};

// Loads the IOBluetoothDevice class
#[link(name = "IOBluetooth", kind = "framework")]
extern "C" {}

struct Ivars {
    slot: Arc<CallbackSlot<BluetoothSignal>>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[ivars = Ivars]
    struct BluetoothObserver;

    unsafe impl NSObjectProtocol for BluetoothObserver {}

    impl BluetoothObserver {
        #[unsafe(method(deviceConnected:device:))]
        fn device_connected(&self, _notification: &AnyObject, device: &AnyObject) {
            let Some((name, address)) = identity(device) else {
                return;
            };
            // Balanced by `unregister` in the disconnect handler
            let _registration: Option<Retained<AnyObject>> = unsafe {
                msg_send![
                    device,
                    registerForDisconnectNotification: self,
                    selector: sel!(deviceDisconnected:device:)
                ]
            };
            tracing::debug!("Bluetooth device connected: {} ({})", name, address);
            self.ivars()
                .slot
                .emit(BluetoothSignal::Connected { name, address });
        }

        #[unsafe(method(deviceDisconnected:device:))]
        fn device_disconnected(&self, notification: &AnyObject, device: &AnyObject) {
            let _: () = unsafe { msg_send![notification, unregister] };
            let Some((name, address)) = identity(device) else {
                return;
            };
            tracing::debug!("Bluetooth device disconnected: {} ({})", name, address);
            self.ivars()
                .slot
                .emit(BluetoothSignal::Disconnected { name, address });
        }
    }
);

fn identity(device: &AnyObject) -> Option<(String, HardwareAddress)> {
    let name: Option<Retained<NSString>> = unsafe { msg_send![device, name] };
    let address: Option<Retained<NSString>> = unsafe { msg_send![device, addressString] };
    let address = HardwareAddress::new(&address?.to_string());
    let name = name.map(|n| n.to_string()).unwrap_or_else(|| address.to_string());
    Some((name, address))
}

impl BluetoothObserver {
    fn new(slot: Arc<CallbackSlot<BluetoothSignal>>, mtm: MainThreadMarker) -> Retained<Self> {
        let this = mtm.alloc::<Self>();
        let this = this.set_ivars(Ivars { slot });
        unsafe { msg_send![super(this), init] }
    }
}

/// Keeps the IOBluetooth connect registration alive. Main thread only.
pub struct BluetoothWatcher {
    _observer: Retained<BluetoothObserver>,
    registration: Retained<AnyObject>,
}

impl Drop for BluetoothWatcher {
    fn drop(&mut self) {
        let _: () = unsafe { msg_send![&self.registration, unregister] };
    }
}

/// Bluetooth connect/disconnect notifications. Already connected devices
/// are reported once when the registration is made.
pub struct BluetoothNotifications {
    slot: Arc<CallbackSlot<BluetoothSignal>>,
}

impl BluetoothNotifications {
    pub fn install(mtm: MainThreadMarker) -> (Option<BluetoothWatcher>, Arc<Self>) {
        let slot = CallbackSlot::new("bluetooth");
        let backend = Arc::new(Self {
            slot: Arc::clone(&slot),
        });

        let Some(class) = AnyClass::get(c"IOBluetoothDevice") else {
            tracing::warn!("IOBluetooth is not available");
            return (None, backend);
        };
        let observer = BluetoothObserver::new(Arc::clone(&slot), mtm);
        let registration: Option<Retained<AnyObject>> = unsafe {
            msg_send![
                class,
                registerForConnectNotifications: &*observer,
                selector: sel!(deviceConnected:device:)
            ]
        };
        let Some(registration) = registration else {
            tracing::warn!("Bluetooth connect notifications unavailable");
            return (None, backend);
        };

        slot.mark_installed();
        let watcher = BluetoothWatcher {
            _observer: observer,
            registration,
        };
        (Some(watcher), backend)
    }
}

impl BluetoothBackend for BluetoothNotifications {
    fn subscribe(&self, callback: Callback<BluetoothSignal>) -> Result<SourceHandle> {
        self.slot.subscribe(callback)
    }
}

/// Battery levels from `system_profiler SPBluetoothDataType -json`.
pub struct SystemProfilerBattery;

impl BatteryProvider for SystemProfilerBattery {
    fn battery_level(&self, address: &HardwareAddress) -> Result<Option<u8>> {
        let command = "system_profiler SPBluetoothDataType -json";
        let output = Command::new("system_profiler")
            .args(["SPBluetoothDataType", "-json"])
            .output()
            .map_err(|source| Error::Spawn {
                command: command.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::Process {
                command: command.to_string(),
                status: output.status.code(),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let profile: Value = serde_json::from_slice(&output.stdout).map_err(|source| {
            Error::Decode {
                what: "bluetooth profile",
                source,
            }
        })?;
        Ok(battery_from_profile(&profile, address))
    }
}

/// Find the device entry carrying `address` anywhere in the profile and
/// read its battery. Earbuds report per-bud levels; the lower one wins.
pub fn battery_from_profile(profile: &Value, address: &HardwareAddress) -> Option<u8> {
    match profile {
        Value::Object(map) => {
            let matches = map
                .get("device_address")
                .and_then(Value::as_str)
                .is_some_and(|a| HardwareAddress::new(a) == *address);
            if matches {
                return device_battery(map);
            }
            map.values().find_map(|v| battery_from_profile(v, address))
        }
        Value::Array(items) => items.iter().find_map(|v| battery_from_profile(v, address)),
        _ => None,
    }
}

fn device_battery(device: &serde_json::Map<String, Value>) -> Option<u8> {
    let percent = |key: &str| -> Option<u8> {
        device
            .get(key)?
            .as_str()?
            .trim_end_matches('%')
            .trim()
            .parse()
            .ok()
    };
    if let Some(main) = percent("device_batteryLevelMain") {
        return Some(main);
    }
    [percent("device_batteryLevelLeft"), percent("device_batteryLevelRight")]
        .into_iter()
        .flatten()
        .min()
}

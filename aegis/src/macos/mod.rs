mod accessibility;
mod apps;
mod audio;
mod banners;
mod bluetooth;
mod brightness;
mod input_tap;
mod run_loop;
mod workspace;

pub use accessibility::*;
pub use apps::*;
pub use audio::*;
pub use banners::*;
pub use bluetooth::*;
pub use brightness::*;
pub use input_tap::*;
pub use run_loop::*;
pub use workspace::*;

use std::sync::Arc;

use objc2_foundation::MainThreadMarker;

use crate::monitors::SignalBackends;

/// Registrations that must stay on the main thread for as long as the
/// signal sources are in use.
pub struct SignalGuards {
    _brightness: Option<BrightnessRegistration>,
    _bluetooth: Option<BluetoothWatcher>,
    _banners: Option<BannerWatcher>,
}

/// The macOS signal backends handed to the runtime thread.
pub struct SignalSources {
    audio: Arc<CoreAudioOutput>,
    brightness: Arc<DisplayBrightness>,
    bluetooth: Arc<BluetoothNotifications>,
    battery: Arc<SystemProfilerBattery>,
    banners: Arc<BannerSource>,
}

impl SignalSources {
    /// Register the main-thread sources. Sources that cannot be registered
    /// leave their monitor inert.
    pub fn install(mtm: MainThreadMarker) -> (SignalGuards, Self) {
        let (brightness_guard, brightness) = DisplayBrightness::install();
        let (bluetooth_guard, bluetooth) = BluetoothNotifications::install(mtm);
        let (banner_guard, banners) = BannerSource::install();
        let guards = SignalGuards {
            _brightness: brightness_guard,
            _bluetooth: bluetooth_guard,
            _banners: banner_guard,
        };
        let sources = Self {
            audio: Arc::new(CoreAudioOutput),
            brightness,
            bluetooth,
            battery: Arc::new(SystemProfilerBattery),
            banners,
        };
        (guards, sources)
    }
}

impl SignalBackends for SignalSources {
    type Audio = CoreAudioOutput;
    type Brightness = DisplayBrightness;
    type Bluetooth = BluetoothNotifications;
    type Battery = SystemProfilerBattery;
    type Notifications = BannerSource;

    fn audio(&self) -> Arc<CoreAudioOutput> {
        Arc::clone(&self.audio)
    }
    fn brightness(&self) -> Arc<DisplayBrightness> {
        Arc::clone(&self.brightness)
    }
    fn bluetooth(&self) -> Arc<BluetoothNotifications> {
        Arc::clone(&self.bluetooth)
    }
    fn battery(&self) -> Arc<SystemProfilerBattery> {
        Arc::clone(&self.battery)
    }
    fn notifications(&self) -> Arc<BannerSource> {
        Arc::clone(&self.banners)
    }
}

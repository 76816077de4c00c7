use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use core_graphics::display::CGDisplay;

use crate::error::{Error, Result};
use crate::monitors::{
    BrightnessBackend, BrightnessSignal, Callback, CallbackSlot, SourceHandle,
};

type BrightnessChangedCallback = extern "C" fn(
    center: *const c_void,
    observer: *const c_void,
    name: *const c_void,
    object: *const c_void,
    user_info: *const c_void,
);

#[link(name = "DisplayServices", kind = "framework")]
extern "C" {
    fn DisplayServicesCanChangeBrightness(display: u32) -> bool;
    fn DisplayServicesGetBrightness(display: u32, brightness: *mut f32) -> i32;
    fn DisplayServicesSetBrightness(display: u32, brightness: f32) -> i32;
    fn DisplayServicesRegisterForBrightnessChangeNotifications(
        display: u32,
        observer: u32,
        callback: BrightnessChangedCallback,
    ) -> i32;
    fn DisplayServicesUnregisterForBrightnessChangeNotifications(display: u32, observer: u32) -> i32;
}

/// The change callback carries no context pointer, so the slot is global.
static SLOT: OnceLock<Arc<CallbackSlot<BrightnessSignal>>> = OnceLock::new();

extern "C" fn brightness_changed(
    _center: *const c_void,
    _observer: *const c_void,
    _name: *const c_void,
    _object: *const c_void,
    _user_info: *const c_void,
) {
    if let Some(slot) = SLOT.get() {
        slot.emit(BrightnessSignal::Changed);
    }
}

/// First built-in display, falling back to the main display.
fn builtin_display() -> u32 {
    CGDisplay::active_displays()
        .unwrap_or_default()
        .into_iter()
        .find(|&id| CGDisplay::new(id).is_builtin())
        .unwrap_or_else(|| CGDisplay::main().id)
}

/// Built-in display brightness through DisplayServices.
pub struct DisplayBrightness {
    display: u32,
    slot: Arc<CallbackSlot<BrightnessSignal>>,
}

/// Keeps the change notification registered. Main thread only.
pub struct BrightnessRegistration {
    display: u32,
}

impl Drop for BrightnessRegistration {
    fn drop(&mut self) {
        unsafe {
            DisplayServicesUnregisterForBrightnessChangeNotifications(self.display, self.display);
        }
    }
}

impl DisplayBrightness {
    /// Register for change notifications on the calling thread's run loop.
    pub fn install() -> (Option<BrightnessRegistration>, Arc<Self>) {
        let display = builtin_display();
        let slot = Arc::clone(SLOT.get_or_init(|| CallbackSlot::new("brightness")));
        let backend = Arc::new(Self {
            display,
            slot: Arc::clone(&slot),
        });

        if !unsafe { DisplayServicesCanChangeBrightness(display) } {
            tracing::info!("Display {} does not expose brightness", display);
            return (None, backend);
        }
        let status = unsafe {
            DisplayServicesRegisterForBrightnessChangeNotifications(
                display,
                display,
                brightness_changed,
            )
        };
        if status != 0 {
            tracing::warn!("Brightness notifications unavailable ({})", status);
            return (None, backend);
        }
        slot.mark_installed();
        (Some(BrightnessRegistration { display }), backend)
    }
}

impl BrightnessBackend for DisplayBrightness {
    fn subscribe(&self, callback: Callback<BrightnessSignal>) -> Result<SourceHandle> {
        self.slot.subscribe(callback)
    }

    fn brightness(&self) -> Option<f32> {
        let mut level = 0.0f32;
        let status = unsafe { DisplayServicesGetBrightness(self.display, &mut level) };
        (status == 0).then_some(level)
    }

    fn set_brightness(&self, level: f32) -> Result<()> {
        match unsafe { DisplayServicesSetBrightness(self.display, level) } {
            0 => Ok(()),
            status => Err(Error::platform(format!(
                "DisplayServices refused brightness {} ({})",
                level, status
            ))),
        }
    }
}

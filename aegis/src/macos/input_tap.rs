use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use core_foundation::base::TCFType;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop, CFRunLoopSource};
use core_foundation_sys::mach_port::CFMachPortRef;
use core_graphics::event::{
    CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventType, CallbackResult, EventField,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::platform::{InputIntercept, PlatformEvent};
use crate::switcher::{KeyRouter, Modifiers, TapAction};

extern "C" {
    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
}

/// Shared capture state between the runtime and the input tap.
#[derive(Clone, Default)]
pub struct CaptureFlag(Arc<AtomicBool>);

impl InputIntercept for CaptureFlag {
    fn set_capturing(&self, capturing: bool) {
        self.0.store(capturing, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn modifiers(flags: CGEventFlags) -> Modifiers {
    Modifiers {
        cmd: flags.contains(CGEventFlags::CGEventFlagCommand),
        alt: flags.contains(CGEventFlags::CGEventFlagAlternate),
        ctrl: flags.contains(CGEventFlags::CGEventFlagControl),
        shift: flags.contains(CGEventFlags::CGEventFlagShift),
    }
}

/// Session event tap feeding the switcher. Must be created and dropped
/// on the thread whose run loop it is attached to.
pub struct InputTap {
    _tap: CGEventTap<'static>,
    _source: CFRunLoopSource,
}

impl InputTap {
    pub fn start(
        router: KeyRouter,
        capture: CaptureFlag,
        event_tx: UnboundedSender<PlatformEvent>,
    ) -> Result<Self, String> {
        // Filled in once the tap exists, so the callback can re-enable it
        let tap_port: Arc<AtomicPtr<c_void>> = Arc::new(AtomicPtr::new(std::ptr::null_mut()));
        let tap_port_callback = Arc::clone(&tap_port);

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![
                CGEventType::KeyDown,
                CGEventType::FlagsChanged,
                CGEventType::ScrollWheel,
            ],
            move |_proxy, event_type, event| {
                let capturing = capture.is_capturing();
                let action = match event_type {
                    CGEventType::KeyDown => {
                        let key_code =
                            event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
                        router.key_down(capturing, key_code, modifiers(event.get_flags()))
                    }
                    CGEventType::FlagsChanged => {
                        router.flags_changed(capturing, modifiers(event.get_flags()))
                    }
                    CGEventType::ScrollWheel => {
                        let delta = event
                            .get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1)
                            as f64;
                        router.scroll(capturing, delta)
                    }
                    CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                        let port = tap_port_callback.load(Ordering::SeqCst);
                        if port.is_null() {
                            tracing::warn!("Input tap disabled before it was registered");
                        } else {
                            tracing::warn!("Input tap disabled by the system, re-enabling");
                            unsafe { CGEventTapEnable(port as CFMachPortRef, true) };
                        }
                        return CallbackResult::Keep;
                    }
                    _ => TapAction::Pass,
                };

                let forwarded = match action {
                    TapAction::Pass => return CallbackResult::Keep,
                    TapAction::Consume => None,
                    TapAction::Trigger { reverse } => {
                        // Route the rest of the gesture to the switcher before the
                        // runtime has seen the trigger
                        capture.set_capturing(true);
                        Some(PlatformEvent::SwitcherTrigger { reverse })
                    }
                    TapAction::Input(input) => Some(PlatformEvent::Switcher(input)),
                };
                if let Some(event) = forwarded {
                    if event_tx.send(event).is_err() {
                        tracing::error!("Failed to forward input to the runtime");
                        return CallbackResult::Keep;
                    }
                }
                // Flag changes always reach the system so modifiers never stick
                if matches!(event_type, CGEventType::FlagsChanged) {
                    return CallbackResult::Keep;
                }
                CallbackResult::Drop
            },
        )
        .map_err(|_| "Failed to create event tap. Make sure Accessibility permission is granted.")?;

        tap_port.store(
            tap.mach_port().as_concrete_TypeRef() as *mut c_void,
            Ordering::SeqCst,
        );
        tap.enable();

        let source = tap
            .mach_port()
            .create_runloop_source(0)
            .map_err(|_| "Failed to create run loop source")?;

        CFRunLoop::get_current().add_source(&source, unsafe { kCFRunLoopCommonModes });
        tracing::info!("Input tap started");

        Ok(Self {
            _tap: tap,
            _source: source,
        })
    }
}

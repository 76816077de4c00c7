use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use objc2_core_audio::{
    kAudioDevicePropertyMute, kAudioDevicePropertyVolumeScalar, kAudioHardwareNoError,
    kAudioHardwarePropertyDefaultOutputDevice, kAudioObjectPropertyElementMain,
    kAudioObjectPropertyName, kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeOutput,
    kAudioObjectSystemObject, AudioDeviceID, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectHasProperty, AudioObjectID,
    AudioObjectPropertyAddress, AudioObjectPropertySelector, AudioObjectRemovePropertyListener,
    AudioObjectSetPropertyData,
};

use crate::error::{Error, Result};
use crate::monitors::{AudioBackend, AudioSample, AudioSignal, Callback, SourceHandle};

const SYSTEM_OBJECT: AudioObjectID = kAudioObjectSystemObject as AudioObjectID;
/// Left and right channels, for devices without a main volume control
const STEREO_CHANNELS: [u32; 2] = [1, 2];

fn address(selector: AudioObjectPropertySelector, scope: u32, element: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: element,
    }
}

fn has_property(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> bool {
    unsafe { AudioObjectHasProperty(object, NonNull::from(address)) }
}

fn get_property<T: Copy>(object: AudioObjectID, address: &AudioObjectPropertyAddress, mut value: T) -> Option<T> {
    let mut size = size_of::<T>() as u32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            NonNull::from(address),
            0,
            ptr::null(),
            NonNull::from(&mut size),
            NonNull::from(&mut value).cast(),
        )
    };
    (status == kAudioHardwareNoError).then_some(value)
}

fn set_property<T: Copy>(object: AudioObjectID, address: &AudioObjectPropertyAddress, value: T) -> bool {
    let status = unsafe {
        AudioObjectSetPropertyData(
            object,
            NonNull::from(address),
            0,
            ptr::null(),
            size_of::<T>() as u32,
            NonNull::from(&value).cast(),
        )
    };
    status == kAudioHardwareNoError
}

fn default_output() -> Option<AudioDeviceID> {
    let addr = address(
        kAudioHardwarePropertyDefaultOutputDevice,
        kAudioObjectPropertyScopeGlobal,
        kAudioObjectPropertyElementMain,
    );
    get_property::<AudioDeviceID>(SYSTEM_OBJECT, &addr, 0).filter(|&id| id != 0)
}

fn device_name(device: AudioDeviceID) -> Option<String> {
    let addr = address(
        kAudioObjectPropertyName,
        kAudioObjectPropertyScopeGlobal,
        kAudioObjectPropertyElementMain,
    );
    let raw = get_property::<CFStringRef>(device, &addr, ptr::null())?;
    if raw.is_null() {
        return None;
    }
    Some(unsafe { CFString::wrap_under_create_rule(raw) }.to_string())
}

/// Elements carrying the output volume: the main element when the device
/// has one, otherwise the individual stereo channels.
fn volume_elements(device: AudioDeviceID) -> Vec<u32> {
    let main = address(
        kAudioDevicePropertyVolumeScalar,
        kAudioObjectPropertyScopeOutput,
        kAudioObjectPropertyElementMain,
    );
    if has_property(device, &main) {
        return vec![kAudioObjectPropertyElementMain];
    }
    STEREO_CHANNELS
        .into_iter()
        .filter(|&channel| {
            has_property(
                device,
                &address(kAudioDevicePropertyVolumeScalar, kAudioObjectPropertyScopeOutput, channel),
            )
        })
        .collect()
}

fn read_sample(device: AudioDeviceID) -> Option<AudioSample> {
    let elements = volume_elements(device);
    let levels: Vec<f32> = elements
        .iter()
        .filter_map(|&element| {
            get_property::<f32>(
                device,
                &address(kAudioDevicePropertyVolumeScalar, kAudioObjectPropertyScopeOutput, element),
                0.0,
            )
        })
        .collect();
    if levels.is_empty() {
        return None;
    }
    let level = levels.iter().sum::<f32>() / levels.len() as f32;

    let mute = address(
        kAudioDevicePropertyMute,
        kAudioObjectPropertyScopeOutput,
        kAudioObjectPropertyElementMain,
    );
    let muted = get_property::<u32>(device, &mute, 0).is_some_and(|m| m != 0);
    Some(AudioSample { level, muted })
}

/// Properties watched on the current output device.
fn device_addresses(device: AudioDeviceID) -> Vec<AudioObjectPropertyAddress> {
    let mut addresses: Vec<_> = volume_elements(device)
        .into_iter()
        .map(|element| address(kAudioDevicePropertyVolumeScalar, kAudioObjectPropertyScopeOutput, element))
        .collect();
    addresses.push(address(
        kAudioDevicePropertyMute,
        kAudioObjectPropertyScopeOutput,
        kAudioObjectPropertyElementMain,
    ));
    addresses
}

struct ListenerContext {
    callback: Callback<AudioSignal>,
    /// Output device whose properties are currently watched
    device: Mutex<Option<AudioDeviceID>>,
}

impl ListenerContext {
    fn as_client_data(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    fn watch(&self, device: AudioDeviceID) {
        for addr in device_addresses(device) {
            unsafe {
                AudioObjectAddPropertyListener(
                    device,
                    NonNull::from(&addr),
                    Some(property_listener),
                    self.as_client_data(),
                );
            }
        }
    }

    fn unwatch(&self, device: AudioDeviceID) {
        for addr in device_addresses(device) {
            unsafe {
                AudioObjectRemovePropertyListener(
                    device,
                    NonNull::from(&addr),
                    Some(property_listener),
                    self.as_client_data(),
                );
            }
        }
    }

    /// Move the device listeners to the new default output.
    fn follow_default_output(&self) -> Option<AudioDeviceID> {
        let current = default_output();
        let mut device = self.device.lock().expect("audio device lock poisoned");
        if *device == current {
            return None;
        }
        if let Some(old) = *device {
            self.unwatch(old);
        }
        if let Some(new) = current {
            self.watch(new);
        }
        *device = current;
        current
    }
}

unsafe extern "C-unwind" fn property_listener(
    object: AudioObjectID,
    _count: u32,
    _addresses: NonNull<AudioObjectPropertyAddress>,
    client_data: *mut c_void,
) -> i32 {
    if client_data.is_null() {
        return 0;
    }
    let context = unsafe { &*(client_data as *const ListenerContext) };

    if object == SYSTEM_OBJECT {
        if let Some(device) = context.follow_default_output() {
            let name = device_name(device).unwrap_or_default();
            let supports_volume = !volume_elements(device).is_empty();
            tracing::debug!("Default output changed to {}", name);
            (context.callback)(AudioSignal::OutputChanged {
                device: name,
                supports_volume,
            });
        }
    } else {
        (context.callback)(AudioSignal::PropertyChanged);
    }
    0
}

struct ContextPtr(*mut ListenerContext);

// The context is only dereferenced by CoreAudio callbacks and freed once
// every listener has been removed.
unsafe impl Send for ContextPtr {}

/// Default output volume and mute through CoreAudio property listeners.
/// Listeners fire on a CoreAudio thread.
pub struct CoreAudioOutput;

impl AudioBackend for CoreAudioOutput {
    fn subscribe(&self, callback: Callback<AudioSignal>) -> Result<SourceHandle> {
        let context = Box::new(ListenerContext {
            callback,
            device: Mutex::new(None),
        });
        let default_addr = address(
            kAudioHardwarePropertyDefaultOutputDevice,
            kAudioObjectPropertyScopeGlobal,
            kAudioObjectPropertyElementMain,
        );
        let status = unsafe {
            AudioObjectAddPropertyListener(
                SYSTEM_OBJECT,
                NonNull::from(&default_addr),
                Some(property_listener),
                context.as_client_data(),
            )
        };
        if status != kAudioHardwareNoError {
            return Err(Error::platform(format!(
                "CoreAudio listener registration failed ({})",
                status
            )));
        }
        context.follow_default_output();

        let ptr = ContextPtr(Box::into_raw(context));
        Ok(SourceHandle::new(move || {
            let ptr = ptr;
            let context = unsafe { Box::from_raw(ptr.0) };
            unsafe {
                AudioObjectRemovePropertyListener(
                    SYSTEM_OBJECT,
                    NonNull::from(&default_addr),
                    Some(property_listener),
                    context.as_client_data(),
                );
            }
            let device = *context.device.lock().expect("audio device lock poisoned");
            if let Some(device) = device {
                context.unwatch(device);
            }
        }))
    }

    fn sample(&self) -> Option<AudioSample> {
        read_sample(default_output()?)
    }

    fn set_volume(&self, level: f32) -> Result<()> {
        let device = default_output().ok_or_else(|| Error::platform("no default output device"))?;
        let elements = volume_elements(device);
        if elements.is_empty() {
            return Err(Error::platform("output device has no volume control"));
        }
        for element in elements {
            let addr = address(kAudioDevicePropertyVolumeScalar, kAudioObjectPropertyScopeOutput, element);
            if !set_property(device, &addr, level) {
                return Err(Error::platform("output device rejected the volume change"));
            }
        }
        Ok(())
    }

    fn output(&self) -> Option<(String, bool)> {
        let device = default_output()?;
        Some((device_name(device)?, !volume_elements(device).is_empty()))
    }
}

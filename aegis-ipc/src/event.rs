use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BluetoothDeviceInfo, MediaInfo, Space, WindowInfo};

/// Closed set of event kinds carried by the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SpaceChanged,
    WindowsChanged,
    VolumeChanged,
    BrightnessChanged,
    MediaChanged,
    DeviceConnected,
    DeviceDisconnected,
    FocusChanged,
    NotificationReceived,
    AudioOutputChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::SpaceChanged,
        EventKind::WindowsChanged,
        EventKind::VolumeChanged,
        EventKind::BrightnessChanged,
        EventKind::MediaChanged,
        EventKind::DeviceConnected,
        EventKind::DeviceDisconnected,
        EventKind::FocusChanged,
        EventKind::NotificationReceived,
        EventKind::AudioOutputChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SpaceChanged => "space_changed",
            EventKind::WindowsChanged => "windows_changed",
            EventKind::VolumeChanged => "volume_changed",
            EventKind::BrightnessChanged => "brightness_changed",
            EventKind::MediaChanged => "media_changed",
            EventKind::DeviceConnected => "device_connected",
            EventKind::DeviceDisconnected => "device_disconnected",
            EventKind::FocusChanged => "focus_changed",
            EventKind::NotificationReceived => "notification_received",
            EventKind::AudioOutputChanged => "audio_output_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| format!("Unknown event kind: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationInfo {
    /// Bundle identifier of the posting application, when known
    pub app: Option<String>,
    pub title: String,
    pub body: String,
}

/// Events published on the bus. Each kind carries its own payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SpaceChanged {
        spaces: Vec<Space>,
    },
    WindowsChanged {
        windows: Vec<WindowInfo>,
    },
    VolumeChanged {
        level: f32,
        muted: bool,
        /// Level is modeled locally because the output cannot report one
        estimated: bool,
    },
    BrightnessChanged {
        level: f32,
        estimated: bool,
    },
    MediaChanged {
        /// `None` when nothing is playing
        media: Option<MediaInfo>,
    },
    DeviceConnected {
        device: BluetoothDeviceInfo,
    },
    DeviceDisconnected {
        device: BluetoothDeviceInfo,
    },
    FocusChanged {
        /// Active focus mode name, `None` when focus is off
        mode: Option<String>,
    },
    NotificationReceived {
        notification: NotificationInfo,
    },
    AudioOutputChanged {
        device: String,
        supports_volume: bool,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SpaceChanged { .. } => EventKind::SpaceChanged,
            Event::WindowsChanged { .. } => EventKind::WindowsChanged,
            Event::VolumeChanged { .. } => EventKind::VolumeChanged,
            Event::BrightnessChanged { .. } => EventKind::BrightnessChanged,
            Event::MediaChanged { .. } => EventKind::MediaChanged,
            Event::DeviceConnected { .. } => EventKind::DeviceConnected,
            Event::DeviceDisconnected { .. } => EventKind::DeviceDisconnected,
            Event::FocusChanged { .. } => EventKind::FocusChanged,
            Event::NotificationReceived { .. } => EventKind::NotificationReceived,
            Event::AudioOutputChanged { .. } => EventKind::AudioOutputChanged,
        }
    }
}

/// Request sent by a client when connecting to the event stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Replay the current spaces and windows before streaming
    #[serde(default)]
    pub snapshot: bool,
    /// Kinds to receive; empty means every kind
    #[serde(default)]
    pub kinds: Vec<EventKind>,
}

impl SubscribeRequest {
    pub fn with_snapshot() -> Self {
        Self {
            snapshot: true,
            kinds: Vec::new(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.kind())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bluetooth hardware address, normalized to lowercase hex digits with
/// punctuation stripped so `AA:BB-CC...` and `aabbcc...` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareAddress(String);

impl HardwareAddress {
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| c.is_ascii_hexdigit())
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        for (i, pair) in bytes.chunks(2).enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            f.write_str(std::str::from_utf8(pair).map_err(|_| fmt::Error)?)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Earbuds,
    Headset,
    Speaker,
    Keyboard,
    Mouse,
    Trackpad,
    Other,
}

impl DeviceCategory {
    /// Infer a category from the advertised device name.
    pub fn infer(name: &str) -> Self {
        let name = name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["airpods", "buds", "earbud", "earphone"]) {
            DeviceCategory::Earbuds
        } else if has(&["headphone", "headset", "beats", "wh-", "qc", "momentum"]) {
            DeviceCategory::Headset
        } else if has(&["speaker", "homepod", "soundlink", "boom", "sonos"]) {
            DeviceCategory::Speaker
        } else if has(&["trackpad"]) {
            DeviceCategory::Trackpad
        } else if has(&["keyboard", "keys"]) {
            DeviceCategory::Keyboard
        } else if has(&["mouse", "mx master", "mx anywhere"]) {
            DeviceCategory::Mouse
        } else {
            DeviceCategory::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothDeviceInfo {
    pub name: String,
    pub address: HardwareAddress,
    pub category: DeviceCategory,
    pub connected: bool,
    /// 0-100
    pub battery: Option<u8>,
}

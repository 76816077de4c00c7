use serde::{Deserialize, Deserializer, Serialize};

pub type SpaceId = u64;
pub type WindowId = u64;

/// A virtual desktop as reported by `query --spaces`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Space {
    pub id: SpaceId,
    /// 1-based display order
    pub index: u32,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub display: u32,
    #[serde(default)]
    pub windows: Vec<WindowId>,
    #[serde(default, rename = "has-focus")]
    pub focused: bool,
    #[serde(default)]
    pub is_native_fullscreen: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A window as reported by `query --windows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WindowInfo {
    pub id: WindowId,
    #[serde(default)]
    pub pid: i32,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub space: u32,
    #[serde(default)]
    pub frame: Frame,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub subrole: String,
    #[serde(default)]
    pub has_focus: bool,
    #[serde(default)]
    pub is_minimized: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_floating: bool,
    #[serde(default)]
    pub is_native_fullscreen: bool,
    /// 0 = not stacked, >0 = position within a stack
    #[serde(default)]
    pub stack_index: u32,
}

pub const ROLE_WINDOW: &str = "AXWindow";
pub const SUBROLE_STANDARD: &str = "AXStandardWindow";

impl WindowInfo {
    /// Popups, panels, sheets and dialogs are not standard windows.
    pub fn is_standard(&self) -> bool {
        self.role == ROLE_WINDOW && self.subrole == SUBROLE_STANDARD
    }

    /// Visible on its space (neither minimized nor hidden with its app).
    pub fn is_active(&self) -> bool {
        !self.is_minimized && !self.is_hidden
    }
}

/// Projection of a window handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowIcon {
    pub id: WindowId,
    pub pid: i32,
    pub app: String,
    pub title: String,
    pub space: u32,
    pub has_focus: bool,
    pub is_minimized: bool,
    pub is_hidden: bool,
    pub stack_index: u32,
}

impl From<&WindowInfo> for WindowIcon {
    fn from(w: &WindowInfo) -> Self {
        Self {
            id: w.id,
            pid: w.pid,
            app: w.app.clone(),
            title: w.title.clone(),
            space: w.space,
            has_focus: w.has_focus,
            is_minimized: w.is_minimized,
            is_hidden: w.is_hidden,
            stack_index: w.stack_index,
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_space() {
        let json = r#"{
            "id": 3,
            "uuid": "",
            "index": 2,
            "label": "",
            "type": "bsp",
            "display": 1,
            "windows": [101, 102],
            "first-window": 101,
            "last-window": 102,
            "has-focus": true,
            "is-visible": true,
            "is-native-fullscreen": false
        }"#;

        let space: Space = serde_json::from_str(json).unwrap();
        assert_eq!(space.id, 3);
        assert_eq!(space.index, 2);
        assert_eq!(space.label, None);
        assert!(space.focused);
        assert!(!space.is_native_fullscreen);
        assert_eq!(space.windows, vec![101, 102]);
    }

    #[test]
    fn test_decode_space_with_label() {
        let json = r#"{"id": 7, "index": 1, "label": "code", "is-native-fullscreen": true}"#;
        let space: Space = serde_json::from_str(json).unwrap();
        assert_eq!(space.label.as_deref(), Some("code"));
        assert!(space.is_native_fullscreen);
        assert!(!space.focused);
    }

    #[test]
    fn test_decode_window() {
        let json = r#"{
            "id": 4242,
            "pid": 812,
            "app": "Safari",
            "title": "Start Page",
            "frame": {"x": 10.0, "y": 40.0, "w": 800.0, "h": 600.0},
            "role": "AXWindow",
            "subrole": "AXStandardWindow",
            "display": 1,
            "space": 2,
            "stack-index": 1,
            "has-focus": true,
            "is-minimized": false,
            "is-hidden": false,
            "is-floating": false
        }"#;

        let window: WindowInfo = serde_json::from_str(json).unwrap();
        assert_eq!(window.id, 4242);
        assert_eq!(window.app, "Safari");
        assert_eq!(window.space, 2);
        assert_eq!(window.stack_index, 1);
        assert_eq!(window.frame.w, 800.0);
        assert!(window.has_focus);
        assert!(window.is_standard());
        assert!(window.is_active());
    }

    #[test]
    fn test_non_standard_window() {
        let json = r#"{"id": 1, "role": "AXWindow", "subrole": "AXDialog"}"#;
        let window: WindowInfo = serde_json::from_str(json).unwrap();
        assert!(!window.is_standard());
    }

    #[test]
    fn test_minimized_window_is_inactive() {
        let json = r#"{"id": 1, "is-minimized": true}"#;
        let window: WindowInfo = serde_json::from_str(json).unwrap();
        assert!(!window.is_active());
    }
}

use serde::{Deserialize, Serialize};

use crate::{Space, WindowIcon, WindowId};

/// Where `MoveWindow` sends a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MoveTarget {
    Space { space: u32 },
    Stack { window_id: WindowId },
    Insert { window_id: WindowId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    Bsp,
    Float,
}

impl LayoutMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            LayoutMode::Bsp => "bsp",
            LayoutMode::Float => "float",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Axis::X => "x-axis",
            Axis::Y => "y-axis",
        }
    }
}

/// Requests accepted by the daemon's command socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Queries
    ListSpaces,
    WindowIcons { space: u32 },
    FocusedSpace,

    // Window manager commands
    FocusSpace { space: u32 },
    FocusWindow { window_id: WindowId },
    MoveWindow { window_id: WindowId, target: MoveTarget },
    CreateSpace,
    DestroySpace { space: u32 },
    Rotate { degrees: u32 },
    Balance,
    SetLayout { layout: LayoutMode },
    Mirror { axis: Axis },
    ToggleFloat { window_id: WindowId },
    StackAll,
    UnstackAll,
    Refresh,

    // Signal commands
    SetVolume { level: f32 },
    SetBrightness { level: f32 },

    // Control
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Error { message: String },
    Spaces { spaces: Vec<Space> },
    WindowIcons { icons: Vec<WindowIcon> },
    Space { space: Option<Space> },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

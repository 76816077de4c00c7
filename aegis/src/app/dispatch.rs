use std::sync::Arc;

use aegis_ipc::{Request, Response};

use crate::error::Result;
use crate::mirror::{RefreshOutcome, RefreshSource, WindowManagerMirror};
use crate::monitors::{AudioBackend, BrightnessBackend, BrightnessMonitor, VolumeMonitor};
use crate::runner::ToolRunner;

/// A signal whose level can be set from a request.
pub trait LevelControl: Send + Sync {
    fn set_level(&self, level: f32) -> Result<()>;
}

impl<B: AudioBackend> LevelControl for VolumeMonitor<B> {
    fn set_level(&self, level: f32) -> Result<()> {
        VolumeMonitor::set_level(self, level)
    }
}

impl<B: BrightnessBackend> LevelControl for BrightnessMonitor<B> {
    fn set_level(&self, level: f32) -> Result<()> {
        BrightnessMonitor::set_level(self, level)
    }
}

/// Maps presentation-layer requests onto the mirror and the monitors.
///
/// Window manager commands are fire-and-forget: the response is sent
/// once the command is queued, and the resulting state arrives later as
/// `SpaceChanged`/`WindowsChanged` events.
pub struct Dispatcher<R: ToolRunner> {
    mirror: WindowManagerMirror<R>,
    volume: Option<Arc<dyn LevelControl>>,
    brightness: Option<Arc<dyn LevelControl>>,
}

impl<R: ToolRunner> Dispatcher<R> {
    pub fn new(mirror: WindowManagerMirror<R>) -> Self {
        Self {
            mirror,
            volume: None,
            brightness: None,
        }
    }

    pub fn with_volume(mut self, volume: Arc<dyn LevelControl>) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_brightness(mut self, brightness: Arc<dyn LevelControl>) -> Self {
        self.brightness = Some(brightness);
        self
    }

    pub async fn dispatch(&self, request: &Request) -> Response {
        let mirror = &self.mirror;
        match request {
            Request::ListSpaces => Response::Spaces {
                spaces: mirror.get_current_spaces(),
            },
            Request::WindowIcons { space } => Response::WindowIcons {
                icons: mirror.get_window_icons_for_space(*space),
            },
            Request::FocusedSpace => match mirror.focused_space().await {
                Ok(space) => Response::Space { space: Some(space) },
                Err(e) => {
                    tracing::warn!("Focused space query failed: {}", e);
                    let space = mirror.get_current_spaces().into_iter().find(|s| s.focused);
                    Response::Space { space }
                }
            },

            Request::FocusSpace { space } => queued(mirror.focus_space(*space)),
            Request::FocusWindow { window_id } => queued(mirror.focus_window(*window_id)),
            Request::MoveWindow { window_id, target } => {
                queued(mirror.move_window(*window_id, *target))
            }
            Request::CreateSpace => queued(mirror.create_space()),
            Request::DestroySpace { space } => queued(mirror.destroy_space(*space)),
            Request::Rotate { degrees } => {
                if ![90, 180, 270].contains(degrees) {
                    return Response::error(format!("Invalid rotation: {}", degrees));
                }
                queued(mirror.rotate(*degrees))
            }
            Request::Balance => queued(mirror.balance()),
            Request::SetLayout { layout } => queued(mirror.set_layout(*layout)),
            Request::Mirror { axis } => queued(mirror.mirror(*axis)),
            Request::ToggleFloat { window_id } => queued(mirror.toggle_float(*window_id)),
            Request::StackAll => queued(mirror.stack_all()),
            Request::UnstackAll => queued(mirror.unstack_all()),
            Request::Refresh => {
                mirror.invalidate_focused_space();
                match mirror.refresh_all(RefreshSource::Request, true).await {
                    RefreshOutcome::Failed | RefreshOutcome::SpacesFailed => {
                        Response::error("Refresh failed")
                    }
                    _ => Response::Ok,
                }
            }

            Request::SetVolume { level } => set_level(self.volume.as_deref(), "volume", *level),
            Request::SetBrightness { level } => {
                set_level(self.brightness.as_deref(), "brightness", *level)
            }

            Request::Quit => {
                tracing::info!("Quit requested");
                Response::Ok
            }
        }
    }
}

fn queued<T>(_handle: tokio::task::JoinHandle<T>) -> Response {
    Response::Ok
}

fn set_level(control: Option<&dyn LevelControl>, what: &str, level: f32) -> Response {
    let Some(control) = control else {
        return Response::error(format!("{} control is not available", what));
    };
    if !level.is_finite() {
        return Response::error(format!("Invalid {} level: {}", what, level));
    }
    match control.set_level(level) {
        Ok(()) => Response::Ok,
        Err(e) => Response::error(format!("Failed to set {}: {}", what, e)),
    }
}

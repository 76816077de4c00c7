mod dispatch;

pub use dispatch::{Dispatcher, LevelControl};

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use aegis_ipc::{Event, Request, Response};

use crate::bus::EventBus;
use crate::config::Settings;
use crate::ipc::{EventBroadcaster, EventServer, IpcServer, RequestWithResponse, SnapshotFn};
use crate::mirror::{spawn_pipe_listener, RefreshSource, WindowManagerMirror};
use crate::monitors::{
    start_all, BluetoothMonitor, BrightnessMonitor, FocusMonitor, MediaMonitor, Monitor,
    NotificationMonitor, SignalBackends, VolumeMonitor,
};
use crate::platform::{AppEnumerator, InputIntercept, PlatformEvent};
use crate::runner::{CommandRunner, ToolRunner};
use crate::switcher::{SwitcherController, SwitcherInput};

const EVENT_CAPACITY: usize = 256;

pub struct App {
    settings: Settings,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the daemon until a `Quit` request or Ctrl-C.
    ///
    /// On macOS the calling thread must be the main thread: it runs the
    /// CFRunLoop that hosts the workspace observers, the input tap and the
    /// main-thread signal sources, while the tokio runtime lives on its
    /// own thread.
    #[cfg(target_os = "macos")]
    pub fn run(self) -> Result<()> {
        use crate::macos;
        use crate::switcher::parse_trigger;
        use objc2_foundation::MainThreadMarker;

        let Some(mtm) = MainThreadMarker::new() else {
            anyhow::bail!("aegis must be started on the main thread");
        };

        if !macos::is_trusted() {
            tracing::warn!("Accessibility permission not granted, switcher capture is disabled");
            macos::is_trusted_with_prompt();
        }

        let (platform_tx, platform_rx) = mpsc::unbounded_channel::<PlatformEvent>();
        let (quit_tx, quit_rx) = std_mpsc::channel::<()>();

        let capture = macos::CaptureFlag::default();
        let router = if self.settings.switcher.enabled {
            match parse_trigger(&self.settings.switcher.trigger) {
                Ok(trigger) => Some(crate::switcher::KeyRouter::new(trigger)),
                Err(e) => {
                    tracing::warn!("Invalid switcher trigger, switcher disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        // Guards stay on the main thread until the run loop exits
        let (_signal_guards, signals) = macos::SignalSources::install(mtm);

        let settings = self.settings;
        let apps = Arc::new(macos::WorkspaceApps);
        let intercept = Arc::new(capture.clone());
        std::thread::Builder::new()
            .name("aegis-runtime".to_string())
            .spawn(move || {
                let result =
                    run_runtime(settings, signals, apps, intercept, platform_rx, quit_tx);
                if let Err(e) = result {
                    tracing::error!("Runtime error: {}", e);
                }
            })?;

        macos::run_main_loop(platform_tx, capture, router, quit_rx)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn run(self) -> Result<()> {
        use crate::monitors::unsupported::UnsupportedSignals;
        use crate::platform::NoPlatform;

        tracing::warn!("No platform integration on this OS, running mirror and IPC only");
        let (_platform_tx, platform_rx) = mpsc::unbounded_channel::<PlatformEvent>();
        let (quit_tx, _quit_rx) = std_mpsc::channel::<()>();
        run_runtime(
            self.settings,
            UnsupportedSignals,
            Arc::new(NoPlatform),
            Arc::new(NoPlatform),
            platform_rx,
            quit_tx,
        )
    }
}

fn run_runtime<S: SignalBackends, A: AppEnumerator, I: InputIntercept>(
    settings: Settings,
    signals: S,
    apps: Arc<A>,
    intercept: Arc<I>,
    platform_rx: mpsc::UnboundedReceiver<PlatformEvent>,
    quit_tx: std_mpsc::Sender<()>,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(serve(settings, signals, apps, intercept, platform_rx));
    // Stop the platform loop whatever the outcome
    let _ = quit_tx.send(());
    result
}

struct Monitors {
    all: Vec<Arc<dyn Monitor>>,
    volume: Option<Arc<dyn LevelControl>>,
    brightness: Option<Arc<dyn LevelControl>>,
}

/// Build the enabled monitors. Sources without a backend on this
/// platform report a missing permission at start and stay inert.
fn build_monitors<S: SignalBackends>(settings: &Settings, bus: &EventBus, signals: &S) -> Monitors {
    let config = &settings.monitors;
    let mut monitors = Monitors {
        all: Vec::new(),
        volume: None,
        brightness: None,
    };

    if config.volume_enabled {
        let volume = Arc::new(VolumeMonitor::new(signals.audio(), bus.clone(), config));
        let control: Arc<dyn LevelControl> = volume.clone();
        monitors.volume = Some(control);
        monitors.all.push(volume);
    }
    if config.brightness_enabled {
        let brightness = Arc::new(BrightnessMonitor::new(
            signals.brightness(),
            bus.clone(),
            config,
        ));
        let control: Arc<dyn LevelControl> = brightness.clone();
        monitors.brightness = Some(control);
        monitors.all.push(brightness);
    }
    if config.bluetooth_enabled {
        monitors.all.push(Arc::new(BluetoothMonitor::new(
            signals.bluetooth(),
            signals.battery(),
            bus.clone(),
            config,
        )));
    }
    if config.media_enabled {
        monitors.all.push(Arc::new(MediaMonitor::new(bus.clone(), config)));
    }
    if config.notifications_enabled {
        monitors.all.push(Arc::new(NotificationMonitor::new(
            signals.notifications(),
            bus.clone(),
            config,
        )));
    }
    if config.focus_enabled {
        monitors.all.push(Arc::new(FocusMonitor::new(bus.clone(), config)));
    }
    monitors
}

fn spawn_event_server<R: ToolRunner>(bus: &EventBus, mirror: &WindowManagerMirror<R>) {
    let broadcaster = EventBroadcaster::new(EVENT_CAPACITY);
    broadcaster.attach(bus).detach();

    let snapshot_mirror = mirror.clone();
    let snapshot: SnapshotFn = Arc::new(move || {
        let (spaces, windows) = snapshot_mirror.snapshot();
        vec![
            Event::SpaceChanged { spaces },
            Event::WindowsChanged { windows },
        ]
    });

    let event_server = EventServer::new(broadcaster.subscribe(), snapshot);
    tokio::spawn(async move {
        if let Err(e) = event_server.run().await {
            tracing::error!("Event server error: {}", e);
        }
    });
}

async fn serve<S: SignalBackends, A: AppEnumerator, I: InputIntercept>(
    settings: Settings,
    signals: S,
    apps: Arc<A>,
    intercept: Arc<I>,
    mut platform_rx: mpsc::UnboundedReceiver<PlatformEvent>,
) -> Result<()> {
    tracing::info!("Tokio runtime started");

    let bus = EventBus::new();
    let runner = Arc::new(CommandRunner::new(&settings.tool));
    let mirror = WindowManagerMirror::new(
        runner,
        bus.clone(),
        &settings.tool,
        settings.mirror.clone(),
    );

    spawn_event_server(&bus, &mirror);

    let (request_tx, mut request_rx) = mpsc::channel::<RequestWithResponse>(256);
    let ipc_server = IpcServer::new(request_tx);
    tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            tracing::error!("IPC server error: {}", e);
        }
    });

    let monitors = build_monitors(&settings, &bus, &signals);
    let started = start_all(&monitors.all);
    tracing::info!("{} of {} monitors running", started.len(), monitors.all.len());

    let mut dispatcher = Dispatcher::new(mirror.clone());
    if let Some(volume) = monitors.volume.clone() {
        dispatcher = dispatcher.with_volume(volume);
    }
    if let Some(brightness) = monitors.brightness.clone() {
        dispatcher = dispatcher.with_brightness(brightness);
    }
    let dispatcher = Arc::new(dispatcher);

    let runtime = tokio::runtime::Handle::current();
    let pipe_mirror = mirror.clone();
    let pipe = spawn_pipe_listener(settings.mirror.pipe_path.clone(), move |token| {
        let _guard = runtime.enter();
        pipe_mirror.handle_pipe_token(token);
    });
    if let Err(e) = pipe {
        tracing::warn!("Notification pipe unavailable, relying on OS triggers: {}", e);
    }

    mirror.refresh_all(RefreshSource::Startup, true).await;

    // Switcher input is handled in arrival order on one task
    let (switcher_tx, switcher_rx) = mpsc::unbounded_channel::<SwitcherCommand>();
    if settings.switcher.enabled {
        let controller = SwitcherController::new(mirror.clone(), apps, intercept, &settings.switcher);
        tokio::spawn(run_switcher(controller, switcher_rx));
    }

    loop {
        tokio::select! {
            Some((request, resp_tx)) = request_rx.recv() => {
                if matches!(request, Request::Quit) {
                    tracing::info!("Quit requested");
                    let _ = resp_tx.send(Response::Ok).await;
                    break;
                }
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(&request).await;
                    let _ = resp_tx.send(response).await;
                });
            }
            Some(event) = platform_rx.recv() => {
                handle_platform_event(&mirror, &switcher_tx, event);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    tracing::info!("Tokio runtime exiting");
    Ok(())
}

enum SwitcherCommand {
    Trigger { reverse: bool },
    Input(SwitcherInput),
}

fn handle_platform_event<R: ToolRunner>(
    mirror: &WindowManagerMirror<R>,
    switcher_tx: &mpsc::UnboundedSender<SwitcherCommand>,
    event: PlatformEvent,
) {
    match event {
        PlatformEvent::AppActivated { pid } => {
            mirror.handle_app_activated(pid);
        }
        PlatformEvent::ActiveSpaceChanged => {
            mirror.handle_active_space_changed();
        }
        PlatformEvent::SwitcherTrigger { reverse } => {
            let _ = switcher_tx.send(SwitcherCommand::Trigger { reverse });
        }
        PlatformEvent::Switcher(input) => {
            let _ = switcher_tx.send(SwitcherCommand::Input(input));
        }
    }
}

async fn run_switcher<R: ToolRunner, A: AppEnumerator, I: InputIntercept>(
    controller: SwitcherController<R, A, I>,
    mut rx: mpsc::UnboundedReceiver<SwitcherCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            SwitcherCommand::Trigger { reverse } => {
                controller.trigger(reverse).await;
            }
            SwitcherCommand::Input(input) => {
                let outcome = controller.handle(input).await;
                tracing::trace!("Switcher outcome: {:?}", outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MirrorSettings, SwitcherSettings, ToolSettings};
    use crate::monitors::unsupported::UnsupportedSignals;
    use crate::platform::mock::{MockApps, MockIntercept};
    use crate::runner::mock::MockToolRunner;
    use crate::switcher::SwitcherKey;
    use aegis_ipc::{Frame, Space, WindowInfo};
    use tokio::time::Duration;

    fn window(id: u64) -> WindowInfo {
        WindowInfo {
            id,
            pid: 300 + id as i32,
            app: format!("App{}", id),
            title: format!("Window {}", id),
            space: 1,
            frame: Frame {
                x: id as f64 * 200.0,
                y: 0.0,
                w: 150.0,
                h: 150.0,
            },
            role: "AXWindow".to_string(),
            subrole: "AXStandardWindow".to_string(),
            has_focus: id == 1,
            is_minimized: false,
            is_hidden: false,
            is_floating: false,
            is_native_fullscreen: false,
            stack_index: 0,
        }
    }

    fn mirror() -> (WindowManagerMirror<MockToolRunner>, Arc<MockToolRunner>) {
        let spaces = vec![Space {
            id: 1,
            index: 1,
            label: None,
            display: 1,
            windows: vec![1, 2, 3],
            focused: true,
            is_native_fullscreen: false,
        }];
        let windows = vec![window(1), window(2), window(3)];
        let runner = Arc::new(
            MockToolRunner::new()
                .with_output("query --spaces", &serde_json::to_string(&spaces).unwrap())
                .with_output("query --windows", &serde_json::to_string(&windows).unwrap()),
        );
        let mirror = WindowManagerMirror::new(
            Arc::clone(&runner),
            EventBus::new(),
            &ToolSettings::default(),
            MirrorSettings::default(),
        );
        (mirror, runner)
    }

    #[tokio::test(start_paused = true)]
    async fn test_switcher_inputs_handled_in_order() {
        let (mirror, runner) = mirror();
        let intercept = Arc::new(MockIntercept::default());
        let controller = SwitcherController::new(
            mirror.clone(),
            Arc::new(MockApps::default()),
            Arc::clone(&intercept),
            &SwitcherSettings::default(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_switcher(controller, rx));

        // Sent back to back: the key must not overtake the activation
        handle_platform_event(&mirror, &tx, PlatformEvent::SwitcherTrigger { reverse: false });
        handle_platform_event(
            &mirror,
            &tx,
            PlatformEvent::Switcher(SwitcherInput::Key(SwitcherKey::Char('3'))),
        );
        handle_platform_event(
            &mirror,
            &tx,
            PlatformEvent::Switcher(SwitcherInput::ModifierReleased),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(runner.count("window --focus 3"), 1);
        assert_eq!(intercept.transitions(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_space_change_refreshes_after_settle() {
        let (mirror, runner) = mirror();
        let (tx, _rx) = mpsc::unbounded_channel();

        handle_platform_event(&mirror, &tx, PlatformEvent::ActiveSpaceChanged);
        assert_eq!(runner.count("query --spaces"), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.count("query --spaces"), 1);
        assert_eq!(mirror.get_windows().len(), 3);
    }

    #[test]
    fn test_disabled_monitors_are_not_built() {
        let mut settings = Settings::default();
        settings.monitors.volume_enabled = false;
        settings.monitors.media_enabled = false;
        let monitors = build_monitors(&settings, &EventBus::new(), &UnsupportedSignals);

        let names: Vec<&str> = monitors.all.iter().map(|m| m.name()).collect();
        assert!(!names.contains(&"volume"));
        assert!(!names.contains(&"media"));
        assert!(names.contains(&"brightness"));
        assert!(monitors.volume.is_none());
        assert!(monitors.brightness.is_some());
    }
}

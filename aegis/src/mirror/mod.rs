mod notify;
mod order;
mod probe;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tokio::time::Instant;

use aegis_ipc::{
    Axis, Event, LayoutMode, MoveTarget, Space, SpaceId, WindowIcon, WindowId, WindowInfo,
};

use crate::bus::EventBus;
use crate::config::{MirrorSettings, ToolSettings};
use crate::error::{Error, Result};
use crate::runner::ToolRunner;

pub use notify::{classify, ensure_fifo, read_tokens, spawn_pipe_listener, PipeSignal};
pub use order::{stable_order, WindowOrderCache};
pub use probe::FocusedSpaceProbe;

/// What asked for a refresh. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Startup,
    Pipe,
    AppActivated,
    ActiveSpaceChanged,
    Command,
    Request,
    Switcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Inside the debounce window and not forced
    Skipped,
    /// Every query succeeded and the cache was replaced
    Refreshed,
    /// The windows were replaced but the spaces query failed, so the
    /// spaces kept their previous value
    SpacesFailed,
    /// The windows query failed; the failed parts kept their previous value
    Failed,
}

/// Which part of the mirror a command invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    All,
    Windows,
}

struct Cache {
    spaces: HashMap<SpaceId, Space>,
    windows: HashMap<WindowId, WindowInfo>,
    order: WindowOrderCache,
}

struct Inner<R> {
    runner: Arc<R>,
    bus: EventBus,
    settings: MirrorSettings,
    failure_marker: String,
    cache: RwLock<Cache>,
    last_refresh: Mutex<Option<Instant>>,
    probe: FocusedSpaceProbe,
    own_pid: i32,
}

/// Eventually-consistent mirror of the window manager's spaces and
/// windows.
///
/// The cache is replaced wholesale under a write lock and the matching
/// event is published only after the lock is released, so a handler that
/// queries the mirror always sees at least the data it was notified of.
pub struct WindowManagerMirror<R: ToolRunner> {
    inner: Arc<Inner<R>>,
}

impl<R: ToolRunner> Clone for WindowManagerMirror<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl<R: ToolRunner> WindowManagerMirror<R> {
    pub fn new(runner: Arc<R>, bus: EventBus, tool: &ToolSettings, settings: MirrorSettings) -> Self {
        let probe = FocusedSpaceProbe::new(settings.focus_probe_interval());
        let order = WindowOrderCache::new(settings.stack_tolerance);
        Self {
            inner: Arc::new(Inner {
                runner,
                bus,
                failure_marker: tool.failure_marker.clone(),
                cache: RwLock::new(Cache {
                    spaces: HashMap::new(),
                    windows: HashMap::new(),
                    order,
                }),
                last_refresh: Mutex::new(None),
                probe,
                settings,
                own_pid: std::process::id() as i32,
            }),
        }
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.inner.settings
    }

    // Queries

    /// Cached spaces sorted by index.
    pub fn get_current_spaces(&self) -> Vec<Space> {
        let cache = self.read_cache();
        let mut spaces: Vec<Space> = cache.spaces.values().cloned().collect();
        spaces.sort_by_key(|s| s.index);
        spaces
    }

    /// Cached windows sorted by space, then by stable order within a space.
    pub fn get_windows(&self) -> Vec<WindowInfo> {
        let cache = self.read_cache();
        let mut spaces: Vec<u32> = cache.windows.values().map(|w| w.space).collect();
        spaces.sort_unstable();
        spaces.dedup();

        let windows: Vec<WindowInfo> = spaces
            .into_iter()
            .flat_map(|space| ordered_windows(&cache, space))
            .cloned()
            .collect();
        windows
    }

    pub fn get_window(&self, id: WindowId) -> Option<WindowInfo> {
        self.read_cache().windows.get(&id).cloned()
    }

    pub fn get_space_by_index(&self, index: u32) -> Option<Space> {
        self.read_cache()
            .spaces
            .values()
            .find(|s| s.index == index)
            .cloned()
    }

    /// Standard, non-excluded windows on a space in stable order, with
    /// active windows before minimized or hidden ones.
    pub fn get_window_icons_for_space(&self, index: u32) -> Vec<WindowIcon> {
        let cache = self.read_cache();
        let (active, inactive): (Vec<&WindowInfo>, Vec<&WindowInfo>) =
            ordered_windows(&cache, index)
                .into_iter()
                .filter(|w| w.is_standard() && !self.inner.settings.is_excluded(&w.app))
                .partition(|w| w.is_active());

        let icons: Vec<WindowIcon> = active
            .into_iter()
            .chain(inactive)
            .map(WindowIcon::from)
            .collect();
        icons
    }

    /// Current spaces and windows for a new subscriber.
    pub fn snapshot(&self) -> (Vec<Space>, Vec<WindowInfo>) {
        (self.get_current_spaces(), self.get_windows())
    }

    /// Fresh focused-space lookup that bypasses the cache.
    pub async fn focused_space(&self) -> Result<Space> {
        self.inner
            .probe
            .focused_space(self.inner.runner.as_ref())
            .await
    }

    pub fn invalidate_focused_space(&self) {
        self.inner.probe.invalidate();
    }

    // Refresh

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, Cache> {
        self.inner.cache.read().expect("mirror cache lock poisoned")
    }

    /// Claim the refresh slot. Returns false when a refresh already ran
    /// within the debounce window and this one is not forced.
    fn claim_refresh(&self, force: bool) -> bool {
        let mut last = self
            .inner
            .last_refresh
            .lock()
            .expect("mirror refresh lock poisoned");
        let now = Instant::now();
        if !force {
            if let Some(at) = *last {
                if now.duration_since(at) < self.inner.settings.debounce() {
                    return false;
                }
            }
        }
        *last = Some(now);
        true
    }

    /// Query spaces and windows concurrently and replace the cache.
    pub async fn refresh_all(&self, source: RefreshSource, force: bool) -> RefreshOutcome {
        if !self.claim_refresh(force) {
            tracing::trace!("Refresh from {:?} debounced", source);
            return RefreshOutcome::Skipped;
        }
        tracing::debug!("Refreshing spaces and windows ({:?}, force={})", source, force);

        let (spaces, windows) = tokio::join!(self.query_spaces(), self.query_windows());

        let spaces_ok = match spaces {
            Ok(spaces) => {
                self.apply_spaces(spaces);
                true
            }
            Err(e) => {
                tracing::warn!("Spaces refresh failed: {}", e);
                false
            }
        };
        match windows {
            Ok(windows) => self.apply_windows(windows),
            Err(e) => {
                tracing::warn!("Windows refresh failed: {}", e);
                return RefreshOutcome::Failed;
            }
        }

        if spaces_ok {
            RefreshOutcome::Refreshed
        } else {
            RefreshOutcome::SpacesFailed
        }
    }

    /// Query windows only and replace the window cache.
    pub async fn refresh_windows(&self, source: RefreshSource, force: bool) -> RefreshOutcome {
        if !self.claim_refresh(force) {
            tracing::trace!("Windows refresh from {:?} debounced", source);
            return RefreshOutcome::Skipped;
        }
        tracing::debug!("Refreshing windows ({:?}, force={})", source, force);

        match self.query_windows().await {
            Ok(windows) => {
                self.apply_windows(windows);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                tracing::warn!("Windows refresh failed: {}", e);
                RefreshOutcome::Failed
            }
        }
    }

    async fn query_spaces(&self) -> Result<Vec<Space>> {
        let output = self.inner.runner.run(args(["query", "--spaces"])).await?;
        serde_json::from_str(&output).map_err(|source| Error::Decode {
            what: "spaces",
            source,
        })
    }

    async fn query_windows(&self) -> Result<Vec<WindowInfo>> {
        let output = self.inner.runner.run(args(["query", "--windows"])).await?;
        serde_json::from_str(&output).map_err(|source| Error::Decode {
            what: "windows",
            source,
        })
    }

    fn apply_spaces(&self, spaces: Vec<Space>) {
        let by_id: HashMap<SpaceId, Space> = spaces.iter().map(|s| (s.id, s.clone())).collect();
        let live: HashSet<u32> = spaces.iter().map(|s| s.index).collect();
        {
            let mut cache = self.inner.cache.write().expect("mirror cache lock poisoned");
            cache.spaces = by_id;
            cache.order.prune(&live);
        }
        self.inner.bus.publish(Event::SpaceChanged { spaces });
    }

    fn apply_windows(&self, windows: Vec<WindowInfo>) {
        let by_id: HashMap<WindowId, WindowInfo> =
            windows.iter().map(|w| (w.id, w.clone())).collect();
        {
            let mut cache = self.inner.cache.write().expect("mirror cache lock poisoned");
            cache.windows = by_id;
            cache.order.update(&windows);
        }
        self.inner.bus.publish(Event::WindowsChanged { windows });
    }

    // Notification triggers

    /// React to one token from the window manager's notification pipe.
    pub fn handle_pipe_token(&self, token: &str) -> JoinHandle<RefreshOutcome> {
        let signal = classify(token);
        tracing::debug!("Pipe notification {:?} -> {:?}", token, signal);

        let mirror = self.clone();
        match signal {
            PipeSignal::Critical | PipeSignal::SpaceDestroyed | PipeSignal::Unknown => {
                self.invalidate_focused_space();
                tokio::spawn(async move { mirror.refresh_all(RefreshSource::Pipe, true).await })
            }
            PipeSignal::WindowSet => {
                tokio::spawn(
                    async move { mirror.refresh_windows(RefreshSource::Pipe, false).await },
                )
            }
        }
    }

    /// Foreground application changed. Ignored when it is this process.
    pub fn handle_app_activated(&self, pid: i32) -> Option<JoinHandle<RefreshOutcome>> {
        if pid == self.inner.own_pid {
            tracing::debug!("Ignoring activation of own process");
            return None;
        }
        Some(self.settle_then_refresh(RefreshSource::AppActivated))
    }

    /// The OS reports a different active space.
    pub fn handle_active_space_changed(&self) -> JoinHandle<RefreshOutcome> {
        self.settle_then_refresh(RefreshSource::ActiveSpaceChanged)
    }

    fn settle_then_refresh(&self, source: RefreshSource) -> JoinHandle<RefreshOutcome> {
        self.invalidate_focused_space();
        let mirror = self.clone();
        let delay = self.inner.settings.settle_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mirror.invalidate_focused_space();
            mirror.refresh_all(source, true).await
        })
    }

    // Commands

    /// Run a command in the background, then refresh `scope` forcibly.
    /// The handle resolves to whether the command succeeded. The scoped
    /// refresh runs either way.
    fn spawn_command(&self, argv: Vec<String>, scope: Scope) -> JoinHandle<bool> {
        let mirror = self.clone();
        tokio::spawn(async move {
            let ok = mirror.run_command(argv).await;
            mirror.refresh_after_command(scope).await;
            ok
        })
    }

    /// Run one command. Failures are logged and otherwise ignored.
    async fn run_command(&self, argv: Vec<String>) -> bool {
        let joined = argv.join(" ");
        match self.inner.runner.run(argv).await {
            Ok(output) => {
                let marker = &self.inner.failure_marker;
                if !marker.is_empty() && output.contains(marker.as_str()) {
                    tracing::warn!("Command `{}` reported failure: {}", joined, output.trim());
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                tracing::warn!("Command `{}` failed: {}", joined, e);
                false
            }
        }
    }

    async fn refresh_after_command(&self, scope: Scope) {
        match scope {
            Scope::All => {
                self.invalidate_focused_space();
                self.refresh_all(RefreshSource::Command, true).await;
            }
            Scope::Windows => {
                self.refresh_windows(RefreshSource::Command, true).await;
            }
        }
    }

    /// Focus the space at `index`. A native fullscreen space cannot be
    /// targeted directly, so one of its windows is focused instead.
    pub fn focus_space(&self, index: u32) -> JoinHandle<bool> {
        let fullscreen_window = self
            .get_space_by_index(index)
            .filter(|s| s.is_native_fullscreen)
            .and_then(|s| s.windows.first().copied());

        let argv = match fullscreen_window {
            Some(window) => {
                tracing::debug!("Space {} is native fullscreen, focusing window {}", index, window);
                vec!["window".to_string(), "--focus".to_string(), window.to_string()]
            }
            None => vec!["space".to_string(), "--focus".to_string(), index.to_string()],
        };
        self.spawn_command(argv, Scope::All)
    }

    pub fn focus_window(&self, id: WindowId) -> JoinHandle<bool> {
        self.spawn_command(
            vec!["window".to_string(), "--focus".to_string(), id.to_string()],
            Scope::All,
        )
    }

    pub fn deminimize_window(&self, id: WindowId) -> JoinHandle<bool> {
        self.spawn_command(
            vec!["window".to_string(), "--deminimize".to_string(), id.to_string()],
            Scope::Windows,
        )
    }

    /// Move a window to another space, or stack/insert it relative to
    /// another window.
    pub fn move_window(&self, id: WindowId, target: MoveTarget) -> JoinHandle<bool> {
        let (flag, value, scope) = match target {
            MoveTarget::Space { space } => ("--space", space.to_string(), Scope::All),
            MoveTarget::Stack { window_id } => ("--stack", window_id.to_string(), Scope::Windows),
            MoveTarget::Insert { window_id } => {
                ("--insert", window_id.to_string(), Scope::Windows)
            }
        };
        self.spawn_command(
            vec!["window".to_string(), id.to_string(), flag.to_string(), value],
            scope,
        )
    }

    pub fn create_space(&self) -> JoinHandle<bool> {
        self.spawn_command(args(["space", "--create"]), Scope::All)
    }

    pub fn destroy_space(&self, index: u32) -> JoinHandle<bool> {
        self.spawn_command(
            vec!["space".to_string(), index.to_string(), "--destroy".to_string()],
            Scope::All,
        )
    }

    pub fn rotate(&self, degrees: u32) -> JoinHandle<bool> {
        self.spawn_command(
            vec!["space".to_string(), "--rotate".to_string(), degrees.to_string()],
            Scope::Windows,
        )
    }

    pub fn balance(&self) -> JoinHandle<bool> {
        self.spawn_command(args(["space", "--balance"]), Scope::Windows)
    }

    pub fn set_layout(&self, layout: LayoutMode) -> JoinHandle<bool> {
        self.spawn_command(args(["space", "--layout", layout.as_arg()]), Scope::All)
    }

    pub fn mirror(&self, axis: Axis) -> JoinHandle<bool> {
        self.spawn_command(args(["space", "--mirror", axis.as_arg()]), Scope::Windows)
    }

    pub fn toggle_float(&self, id: WindowId) -> JoinHandle<bool> {
        self.spawn_command(
            vec!["window".to_string(), id.to_string(), "--toggle".to_string(), "float".to_string()],
            Scope::Windows,
        )
    }

    /// Tiled windows on the focused space, in stable order.
    async fn focused_space_tiles(&self) -> Option<Vec<WindowInfo>> {
        let index = match self.focused_space().await {
            Ok(space) => space.index,
            Err(e) => {
                tracing::warn!("Failed to look up focused space: {}", e);
                self.get_current_spaces().iter().find(|s| s.focused)?.index
            }
        };
        let cache = self.read_cache();
        let tiles: Vec<WindowInfo> = ordered_windows(&cache, index)
            .into_iter()
            .filter(|w| w.is_standard() && w.is_active() && !w.is_floating)
            .cloned()
            .collect();
        Some(tiles)
    }

    /// Stack every tiled window of the focused space onto the first one.
    pub fn stack_all(&self) -> JoinHandle<()> {
        let mirror = self.clone();
        tokio::spawn(async move {
            let Some(tiles) = mirror.focused_space_tiles().await else {
                return;
            };
            let Some((base, rest)) = tiles.split_first() else {
                return;
            };
            let tolerance = mirror.inner.settings.stack_tolerance;
            let already_stacked = |w: &WindowInfo| {
                base.stack_index > 0
                    && w.stack_index > 0
                    && (w.frame.x - base.frame.x).abs() <= tolerance
            };
            for window in rest.iter().filter(|w| !already_stacked(w)) {
                mirror
                    .run_command(vec![
                        "window".to_string(),
                        base.id.to_string(),
                        "--stack".to_string(),
                        window.id.to_string(),
                    ])
                    .await;
            }
            mirror.refresh_after_command(Scope::Windows).await;
        })
    }

    /// Pull every stacked window of the focused space back into the
    /// tiling layout. Toggling float twice re-inserts a window unstacked.
    pub fn unstack_all(&self) -> JoinHandle<()> {
        let mirror = self.clone();
        tokio::spawn(async move {
            let Some(tiles) = mirror.focused_space_tiles().await else {
                return;
            };
            // Leave one window per stack in place
            let stacked: Vec<WindowId> = tiles
                .iter()
                .filter(|w| w.stack_index > 1)
                .map(|w| w.id)
                .collect();
            for id in stacked {
                for _ in 0..2 {
                    mirror
                        .run_command(vec![
                            "window".to_string(),
                            id.to_string(),
                            "--toggle".to_string(),
                            "float".to_string(),
                        ])
                        .await;
                }
            }
            mirror.refresh_after_command(Scope::Windows).await;
        })
    }
}

/// Windows on `space` in cached stable order. Windows the order cache has
/// not seen yet are appended in their own stable order.
fn ordered_windows(cache: &Cache, space: u32) -> Vec<&WindowInfo> {
    let members: Vec<&WindowInfo> = cache.windows.values().filter(|w| w.space == space).collect();
    let cached = cache.order.order(space).unwrap_or(&[]);

    let mut result: Vec<&WindowInfo> = cached
        .iter()
        .filter_map(|id| cache.windows.get(id))
        .filter(|w| w.space == space)
        .collect();

    if result.len() < members.len() {
        let seen: HashSet<WindowId> = result.iter().map(|w| w.id).collect();
        let missing: Vec<&WindowInfo> =
            members.into_iter().filter(|w| !seen.contains(&w.id)).collect();
        for id in stable_order(&missing, 0.0) {
            if let Some(w) = cache.windows.get(&id) {
                result.push(w);
            }
        }
    }
    result
}

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use super::{
    SwitchTarget, SwitcherEngine, SwitcherInput, SwitcherItem, SwitcherOutcome, SwitcherView,
};
use crate::config::SwitcherSettings;
use crate::mirror::{RefreshOutcome, RefreshSource, WindowManagerMirror};
use crate::platform::{AppEnumerator, InputIntercept};
use crate::runner::ToolRunner;

struct State {
    engine: SwitcherEngine,
    /// Inputs received while the item list is loading. `Some` from the
    /// moment the trigger fires until the engine is activated.
    pending: Option<Vec<SwitcherInput>>,
}

/// Drives a `SwitcherEngine` from live window manager state and turns
/// its outcomes into commands.
pub struct SwitcherController<R: ToolRunner, A: AppEnumerator, I: InputIntercept> {
    mirror: WindowManagerMirror<R>,
    apps: Arc<A>,
    intercept: Arc<I>,
    state: Mutex<State>,
}

impl<R: ToolRunner, A: AppEnumerator, I: InputIntercept> SwitcherController<R, A, I> {
    pub fn new(
        mirror: WindowManagerMirror<R>,
        apps: Arc<A>,
        intercept: Arc<I>,
        settings: &SwitcherSettings,
    ) -> Self {
        Self {
            mirror,
            apps,
            intercept,
            state: Mutex::new(State {
                engine: SwitcherEngine::new(settings),
                pending: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("switcher state lock poisoned")
    }

    pub fn is_active(&self) -> bool {
        self.lock().engine.is_active()
    }

    pub fn view(&self) -> Option<SwitcherView> {
        self.lock().engine.view()
    }

    /// Current windows with the focused one first, or running
    /// applications when the windows cannot be queried.
    async fn collect_items(&self) -> Vec<SwitcherItem> {
        let outcome = self.mirror.refresh_all(RefreshSource::Switcher, true).await;
        if outcome == RefreshOutcome::Failed {
            tracing::warn!("Window query failed, switching between applications instead");
            return match self.apps.running_apps() {
                Ok(apps) => apps.iter().map(SwitcherItem::from_app).collect(),
                Err(e) => {
                    tracing::warn!("Failed to enumerate applications: {}", e);
                    Vec::new()
                }
            };
        }

        let settings = self.mirror.settings();
        let mut windows: Vec<_> = self
            .mirror
            .get_windows()
            .into_iter()
            .filter(|w| w.is_standard() && !settings.is_excluded(&w.app))
            .collect();
        windows.sort_by_key(|w| !w.has_focus);
        windows.iter().map(SwitcherItem::from_window).collect()
    }

    /// Feed one input to the engine, releasing capture when the session ends.
    fn apply(&self, engine: &mut SwitcherEngine, input: SwitcherInput) -> SwitcherOutcome {
        let outcome = engine.handle(input);
        if matches!(
            outcome,
            SwitcherOutcome::Confirmed(_) | SwitcherOutcome::Cancelled
        ) {
            self.intercept.set_capturing(false);
        }
        outcome
    }

    /// The trigger combination was pressed. Activates the switcher, or
    /// cycles when it is already active. Returns whether it is active.
    ///
    /// Capture starts before the item list is loaded. Inputs arriving in
    /// the meantime, a modifier release included, are replayed once the
    /// engine is active.
    pub async fn trigger(&self, reverse: bool) -> bool {
        let cycling = {
            let mut state = self.lock();
            if let Some(queued) = state.pending.as_mut() {
                queued.push(SwitcherInput::Trigger { reverse });
                return true;
            }
            if state.engine.is_active() {
                true
            } else {
                state.pending = Some(Vec::new());
                self.intercept.set_capturing(true);
                false
            }
        };
        if cycling {
            self.handle(SwitcherInput::Trigger { reverse }).await;
            return true;
        }

        let items = self.collect_items().await;
        let outcome = {
            let mut state = self.lock();
            let queued = state.pending.take().unwrap_or_default();
            if !state.engine.activate(items, reverse) {
                self.intercept.set_capturing(false);
                return false;
            }
            let mut outcome = SwitcherOutcome::Updated;
            for input in queued {
                outcome = self.apply(&mut state.engine, input);
                if !state.engine.is_active() {
                    break;
                }
            }
            outcome
        };

        if let SwitcherOutcome::Confirmed(item) = &outcome {
            tracing::debug!("Switcher released while loading, confirming immediately");
            self.focus(item).await;
        }
        self.is_active()
    }

    pub async fn handle(&self, input: SwitcherInput) -> SwitcherOutcome {
        let outcome = {
            let mut state = self.lock();
            if let Some(queued) = state.pending.as_mut() {
                queued.push(input);
                return SwitcherOutcome::Ignored;
            }
            self.apply(&mut state.engine, input)
        };

        if let SwitcherOutcome::Confirmed(item) = &outcome {
            self.focus(item).await;
        }
        outcome
    }

    /// Switch to the confirmed item. Returns whether every step succeeded;
    /// later steps still run after a failed one.
    async fn focus(&self, item: &SwitcherItem) -> bool {
        match item.target {
            SwitchTarget::Window {
                id,
                space,
                minimized,
            } => {
                tracing::debug!("Switching to window {} on space {}", id, space);
                let mut ok = true;
                if minimized {
                    ok &= step("deminimize window", self.mirror.deminimize_window(id)).await;
                }
                let on_focused_space = self
                    .mirror
                    .get_current_spaces()
                    .iter()
                    .any(|s| s.focused && s.index == space);
                if !on_focused_space {
                    ok &= step("focus space", self.mirror.focus_space(space)).await;
                }
                ok &= step("focus window", self.mirror.focus_window(id)).await;
                ok
            }
            SwitchTarget::App { pid } => match self.apps.activate(pid) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to activate pid {}: {}", pid, e);
                    false
                }
            },
        }
    }
}

async fn step(what: &str, handle: JoinHandle<bool>) -> bool {
    match handle.await {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!("Switcher could not {}", what);
            false
        }
        Err(e) => {
            tracing::warn!("Switcher {} task failed: {}", what, e);
            false
        }
    }
}

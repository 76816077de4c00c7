//! Keyboard/pointer window switcher.
//!
//! `SwitcherEngine` is a pure state machine: inputs go in, an outcome comes
//! out, and the controller turns a confirmed outcome into window manager
//! commands. Nothing here touches the OS.

mod controller;
mod hotkey;

pub use controller::SwitcherController;
pub use hotkey::{
    format_trigger, parse_trigger, switcher_key, KeyRouter, Modifiers, TapAction, Trigger,
};

use aegis_ipc::{WindowId, WindowInfo};

use crate::config::{ScrollMode, SwitcherSettings};
use crate::platform::RunningApp;

/// What confirming an item should bring to the front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    Window {
        id: WindowId,
        space: u32,
        minimized: bool,
    },
    /// Degraded entry when the window manager could not be queried
    App { pid: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitcherItem {
    pub title: String,
    pub app: String,
    /// Owning space index, `None` for application entries
    pub space: Option<u32>,
    pub target: SwitchTarget,
}

impl SwitcherItem {
    pub fn from_window(window: &WindowInfo) -> Self {
        Self {
            title: window.title.clone(),
            app: window.app.clone(),
            space: Some(window.space),
            target: SwitchTarget::Window {
                id: window.id,
                space: window.space,
                minimized: window.is_minimized,
            },
        }
    }

    pub fn from_app(app: &RunningApp) -> Self {
        Self {
            title: app.name.clone(),
            app: app.name.clone(),
            space: None,
            target: SwitchTarget::App { pid: app.pid },
        }
    }

    fn matches(&self, query: &str) -> bool {
        query.is_empty()
            || self.title.to_lowercase().contains(query)
            || self.app.to_lowercase().contains(query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherKey {
    Char(char),
    Backspace,
    Enter,
    Escape,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwitcherInput {
    /// The trigger combination pressed again while active
    Trigger { reverse: bool },
    Key(SwitcherKey),
    /// The held modifier was released
    ModifierReleased,
    /// The pointer moved; `row` is the row now under it
    PointerMoved { row: Option<usize> },
    /// A row came under a stationary pointer (list opened or re-laid out)
    PointerEntered { row: usize },
    /// Two-finger scroll, positive moves forward
    Scroll { delta: f64 },
    /// Click on a row, or outside the list when `None`
    Click { row: Option<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitcherOutcome {
    /// Not active, or the input had no effect
    Ignored,
    /// Selection or filter changed
    Updated,
    Confirmed(SwitcherItem),
    Cancelled,
}

/// Windows sharing one space, as positions in the filtered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceGroup {
    pub space: Option<u32>,
    pub rows: std::ops::Range<usize>,
}

#[derive(Debug)]
struct Session {
    items: Vec<SwitcherItem>,
    query: String,
    /// Indices into `items`
    filtered: Vec<usize>,
    groups: Vec<SpaceGroup>,
    selected: usize,
    scroll: f64,
    hovered: Option<usize>,
    pointer_armed: bool,
}

impl Session {
    fn new(items: Vec<SwitcherItem>) -> Self {
        let mut session = Session {
            items,
            query: String::new(),
            filtered: Vec::new(),
            groups: Vec::new(),
            selected: 0,
            scroll: 0.0,
            hovered: None,
            pointer_armed: false,
        };
        session.rebuild();
        session
    }

    /// Recompute the filtered list and its grouping from scratch.
    fn rebuild(&mut self) {
        let query = self.query.to_lowercase();
        let mut filtered: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.items[i].matches(&query))
            .collect();
        // Stable, so the incoming order survives within a space
        filtered.sort_by_key(|&i| match self.items[i].space {
            Some(space) => (0, space),
            None => (1, 0),
        });

        let mut groups: Vec<SpaceGroup> = Vec::new();
        for (row, &i) in filtered.iter().enumerate() {
            let space = self.items[i].space;
            match groups.last_mut() {
                Some(group) if group.space == space => group.rows.end = row + 1,
                _ => groups.push(SpaceGroup {
                    space,
                    rows: row..row + 1,
                }),
            }
        }

        self.filtered = filtered;
        self.groups = groups;
        self.selected = 0;
        self.scroll = 0.0;
    }

    fn len(&self) -> usize {
        self.filtered.len()
    }

    fn step(&mut self, forward: bool) -> bool {
        let len = self.len();
        if len == 0 {
            return false;
        }
        self.selected = if forward {
            (self.selected + 1) % len
        } else {
            (self.selected + len - 1) % len
        };
        true
    }

    fn select(&mut self, row: usize) -> bool {
        if row >= self.len() || row == self.selected {
            return false;
        }
        self.selected = row;
        true
    }

    fn current(&self) -> Option<SwitcherItem> {
        self.filtered
            .get(self.selected)
            .map(|&i| self.items[i].clone())
    }
}

/// Read-only view of an active switcher for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitcherView {
    pub query: String,
    pub items: Vec<SwitcherItem>,
    pub groups: Vec<SpaceGroup>,
    pub selected: usize,
}

pub struct SwitcherEngine {
    scroll_threshold: f64,
    scroll_mode: ScrollMode,
    session: Option<Session>,
}

impl SwitcherEngine {
    pub fn new(settings: &SwitcherSettings) -> Self {
        Self {
            scroll_threshold: settings.scroll_threshold.max(f64::EPSILON),
            scroll_mode: settings.scroll_mode,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Enter the active state. An empty list aborts and stays inactive.
    ///
    /// The first item is the current window, so a forward activation
    /// preselects the row after it.
    pub fn activate(&mut self, items: Vec<SwitcherItem>, reverse: bool) -> bool {
        if items.is_empty() {
            tracing::debug!("Switcher activation aborted, nothing to switch to");
            return false;
        }
        let mut session = Session::new(items);
        session.selected = session.filtered.iter().position(|&i| i == 0).unwrap_or(0);
        session.step(!reverse);
        self.session = Some(session);
        true
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.selected)
    }

    pub fn view(&self) -> Option<SwitcherView> {
        self.session.as_ref().map(|s| SwitcherView {
            query: s.query.clone(),
            items: s.filtered.iter().map(|&i| s.items[i].clone()).collect(),
            groups: s.groups.clone(),
            selected: s.selected,
        })
    }

    fn confirm(&mut self) -> SwitcherOutcome {
        match self.session.take().and_then(|s| s.current()) {
            Some(item) => SwitcherOutcome::Confirmed(item),
            None => SwitcherOutcome::Cancelled,
        }
    }

    fn cancel(&mut self) -> SwitcherOutcome {
        self.session = None;
        SwitcherOutcome::Cancelled
    }

    pub fn handle(&mut self, input: SwitcherInput) -> SwitcherOutcome {
        let threshold = self.scroll_threshold;
        let mode = self.scroll_mode;
        let Some(session) = self.session.as_mut() else {
            return SwitcherOutcome::Ignored;
        };

        let changed = match input {
            SwitcherInput::Trigger { reverse } => session.step(!reverse),
            SwitcherInput::ModifierReleased => return self.confirm(),
            SwitcherInput::Key(key) => match key {
                SwitcherKey::Enter => return self.confirm(),
                SwitcherKey::Escape => return self.cancel(),
                SwitcherKey::Down | SwitcherKey::Right => session.step(true),
                SwitcherKey::Up | SwitcherKey::Left => session.step(false),
                SwitcherKey::Char(c @ '1'..='9') => {
                    let row = c as usize - '1' as usize;
                    row < session.len() && {
                        session.selected = row;
                        true
                    }
                }
                SwitcherKey::Char(c) if !c.is_control() => {
                    session.query.push(c);
                    session.rebuild();
                    true
                }
                SwitcherKey::Char(_) => false,
                SwitcherKey::Backspace => {
                    session.query.pop().is_some() && {
                        session.rebuild();
                        true
                    }
                }
            },
            SwitcherInput::PointerEntered { row } => {
                if session.pointer_armed {
                    session.select(row)
                } else {
                    session.hovered = Some(row);
                    false
                }
            }
            SwitcherInput::PointerMoved { row } => {
                if row != session.hovered {
                    session.hovered = row;
                    session.pointer_armed = true;
                }
                match row {
                    Some(row) if session.pointer_armed => session.select(row),
                    _ => false,
                }
            }
            SwitcherInput::Scroll { delta } => {
                session.scroll += delta;
                let mut moved = false;
                while session.scroll.abs() >= threshold {
                    let forward = session.scroll > 0.0;
                    moved |= session.step(forward);
                    match mode {
                        ScrollMode::Notch => {
                            session.scroll = 0.0;
                            break;
                        }
                        ScrollMode::Continuous => {
                            session.scroll -= threshold.copysign(session.scroll);
                        }
                    }
                }
                moved
            }
            SwitcherInput::Click { row: Some(row) } => {
                if row >= session.len() {
                    return self.cancel();
                }
                session.selected = row;
                return self.confirm();
            }
            SwitcherInput::Click { row: None } => return self.cancel(),
        };

        if changed {
            SwitcherOutcome::Updated
        } else {
            SwitcherOutcome::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: WindowId, space: u32, title: &str, app: &str) -> SwitcherItem {
        SwitcherItem {
            title: title.to_string(),
            app: app.to_string(),
            space: Some(space),
            target: SwitchTarget::Window {
                id,
                space,
                minimized: false,
            },
        }
    }

    fn five() -> Vec<SwitcherItem> {
        vec![
            item(1, 1, "Inbox", "Mail"),
            item(2, 1, "main.rs", "Code"),
            item(3, 2, "Docs", "Safari"),
            item(4, 2, "Terminal", "Terminal"),
            item(5, 3, "Music", "Music"),
        ]
    }

    fn engine(mode: ScrollMode) -> SwitcherEngine {
        SwitcherEngine::new(&SwitcherSettings {
            scroll_mode: mode,
            ..Default::default()
        })
    }

    fn confirmed_id(outcome: SwitcherOutcome) -> WindowId {
        match outcome {
            SwitcherOutcome::Confirmed(SwitcherItem {
                target: SwitchTarget::Window { id, .. },
                ..
            }) => id,
            other => panic!("Expected a confirmed window, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_activation_aborts() {
        let mut engine = engine(ScrollMode::Notch);
        assert!(!engine.activate(Vec::new(), false));
        assert!(!engine.is_active());
        assert_eq!(
            engine.handle(SwitcherInput::ModifierReleased),
            SwitcherOutcome::Ignored
        );
    }

    #[test]
    fn test_activation_preselects_next() {
        let mut engine = engine(ScrollMode::Notch);
        assert!(engine.activate(five(), false));
        assert_eq!(engine.selected_index(), Some(1));

        let mut engine = self::engine(ScrollMode::Notch);
        engine.activate(five(), true);
        assert_eq!(engine.selected_index(), Some(4));
    }

    #[test]
    fn test_cycling_wraps() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);
        for _ in 0..4 {
            engine.handle(SwitcherInput::Trigger { reverse: false });
        }
        assert_eq!(engine.selected_index(), Some(0));
        engine.handle(SwitcherInput::Trigger { reverse: true });
        assert_eq!(engine.selected_index(), Some(4));
        engine.handle(SwitcherInput::Key(SwitcherKey::Down));
        assert_eq!(engine.selected_index(), Some(0));
    }

    #[test]
    fn test_numeric_jump_then_release_focuses_once() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);

        assert_eq!(
            engine.handle(SwitcherInput::Key(SwitcherKey::Char('3'))),
            SwitcherOutcome::Updated
        );
        assert_eq!(engine.selected_index(), Some(2));
        assert!(engine.is_active());

        assert_eq!(confirmed_id(engine.handle(SwitcherInput::ModifierReleased)), 3);
        assert!(!engine.is_active());
        assert_eq!(
            engine.handle(SwitcherInput::ModifierReleased),
            SwitcherOutcome::Ignored
        );
    }

    #[test]
    fn test_numeric_jump_out_of_range_ignored() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);
        assert_eq!(
            engine.handle(SwitcherInput::Key(SwitcherKey::Char('9'))),
            SwitcherOutcome::Ignored
        );
        assert_eq!(engine.selected_index(), Some(1));
    }

    #[test]
    fn test_filter_rebuilds_groups() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);

        for c in "te".chars() {
            engine.handle(SwitcherInput::Key(SwitcherKey::Char(c)));
        }
        let view = engine.view().unwrap();
        assert_eq!(view.query, "te");
        let titles: Vec<&str> = view.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Terminal"]);
        assert_eq!(view.selected, 0);
        assert_eq!(
            view.groups,
            vec![SpaceGroup {
                space: Some(2),
                rows: 0..1
            }]
        );

        engine.handle(SwitcherInput::Key(SwitcherKey::Backspace));
        engine.handle(SwitcherInput::Key(SwitcherKey::Backspace));
        let view = engine.view().unwrap();
        assert_eq!(view.items.len(), 5);
        assert_eq!(view.groups.len(), 3);
        assert_eq!(view.groups[1].rows, 2..4);
        assert_eq!(
            engine.handle(SwitcherInput::Key(SwitcherKey::Backspace)),
            SwitcherOutcome::Ignored
        );
    }

    #[test]
    fn test_filter_with_no_match_confirms_nothing() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);
        for c in "zzz".chars() {
            engine.handle(SwitcherInput::Key(SwitcherKey::Char(c)));
        }
        assert_eq!(
            engine.handle(SwitcherInput::Key(SwitcherKey::Enter)),
            SwitcherOutcome::Cancelled
        );
    }

    #[test]
    fn test_hover_requires_pointer_movement() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);

        // List opened under a stationary pointer
        engine.handle(SwitcherInput::PointerEntered { row: 3 });
        assert_eq!(engine.selected_index(), Some(1));
        // Jitter inside the same row still does not count
        engine.handle(SwitcherInput::PointerMoved { row: Some(3) });
        assert_eq!(engine.selected_index(), Some(1));

        engine.handle(SwitcherInput::PointerMoved { row: Some(4) });
        assert_eq!(engine.selected_index(), Some(4));
        engine.handle(SwitcherInput::PointerEntered { row: 0 });
        assert_eq!(engine.selected_index(), Some(0));
    }

    #[test]
    fn test_scroll_notch_mode_resets() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);

        engine.handle(SwitcherInput::Scroll { delta: 20.0 });
        assert_eq!(engine.selected_index(), Some(1));
        // 20 + 75 crosses the threshold, but one notch moves one row
        engine.handle(SwitcherInput::Scroll { delta: 75.0 });
        assert_eq!(engine.selected_index(), Some(2));
        engine.handle(SwitcherInput::Scroll { delta: 20.0 });
        assert_eq!(engine.selected_index(), Some(2));
    }

    #[test]
    fn test_scroll_continuous_mode_subtracts() {
        let mut engine = engine(ScrollMode::Continuous);
        engine.activate(five(), false);

        // 95 = three steps of 30 with 5 left over
        engine.handle(SwitcherInput::Scroll { delta: 95.0 });
        assert_eq!(engine.selected_index(), Some(4));
        engine.handle(SwitcherInput::Scroll { delta: 25.0 });
        assert_eq!(engine.selected_index(), Some(0));
        engine.handle(SwitcherInput::Scroll { delta: -30.0 });
        assert_eq!(engine.selected_index(), Some(4));
    }

    #[test]
    fn test_click_and_cancel() {
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(five(), false);
        assert_eq!(confirmed_id(engine.handle(SwitcherInput::Click { row: Some(4) })), 5);

        engine.activate(five(), false);
        assert_eq!(
            engine.handle(SwitcherInput::Click { row: None }),
            SwitcherOutcome::Cancelled
        );
        assert!(!engine.is_active());

        engine.activate(five(), false);
        assert_eq!(
            engine.handle(SwitcherInput::Key(SwitcherKey::Escape)),
            SwitcherOutcome::Cancelled
        );
    }

    #[test]
    fn test_application_fallback_items() {
        let app = RunningApp {
            pid: 42,
            name: "Finder".to_string(),
            bundle_id: Some("com.apple.finder".to_string()),
        };
        let mut engine = engine(ScrollMode::Notch);
        engine.activate(vec![SwitcherItem::from_app(&app)], false);
        // Single entry wraps onto itself
        assert_eq!(engine.selected_index(), Some(0));
        match engine.handle(SwitcherInput::Key(SwitcherKey::Enter)) {
            SwitcherOutcome::Confirmed(item) => {
                assert_eq!(item.target, SwitchTarget::App { pid: 42 })
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }
}

use super::{SwitcherInput, SwitcherKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub cmd: bool,
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        !(self.cmd || self.alt || self.ctrl || self.shift)
    }

    /// All of `self` are held in `other`, ignoring shift which reverses.
    pub fn held_in(&self, other: &Modifiers) -> bool {
        (!self.cmd || other.cmd) && (!self.alt || other.alt) && (!self.ctrl || other.ctrl)
    }
}

/// The switcher combination: modifiers that stay held plus a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub key_code: u16,
    pub modifiers: Modifiers,
}

// macOS virtual key codes
const KEYS: &[(&str, u16)] = &[
    ("a", 0x00),
    ("b", 0x0B),
    ("c", 0x08),
    ("d", 0x02),
    ("e", 0x0E),
    ("f", 0x03),
    ("g", 0x05),
    ("h", 0x04),
    ("i", 0x22),
    ("j", 0x26),
    ("k", 0x28),
    ("l", 0x25),
    ("m", 0x2E),
    ("n", 0x2D),
    ("o", 0x1F),
    ("p", 0x23),
    ("q", 0x0C),
    ("r", 0x0F),
    ("s", 0x01),
    ("t", 0x11),
    ("u", 0x20),
    ("v", 0x09),
    ("w", 0x0D),
    ("x", 0x07),
    ("y", 0x10),
    ("z", 0x06),
    ("1", 0x12),
    ("2", 0x13),
    ("3", 0x14),
    ("4", 0x15),
    ("5", 0x17),
    ("6", 0x16),
    ("7", 0x1A),
    ("8", 0x1C),
    ("9", 0x19),
    ("0", 0x1D),
    ("return", 0x24),
    ("tab", 0x30),
    ("space", 0x31),
    ("delete", 0x33),
    ("escape", 0x35),
    ("left", 0x7B),
    ("right", 0x7C),
    ("down", 0x7D),
    ("up", 0x7E),
    ("minus", 0x1B),
    ("period", 0x2F),
    ("grave", 0x32),
];

fn key_code(name: &str) -> Option<u16> {
    let name = match name {
        "enter" => "return",
        "backspace" => "delete",
        "esc" => "escape",
        "backtick" => "grave",
        other => other,
    };
    KEYS.iter().find(|(n, _)| *n == name).map(|(_, code)| *code)
}

fn key_name(code: u16) -> Option<&'static str> {
    KEYS.iter().find(|(_, c)| *c == code).map(|(name, _)| *name)
}

/// Parse `modifier-...-key`, e.g. `alt-tab` or `cmd-shift-grave`.
pub fn parse_trigger(combo: &str) -> Result<Trigger, String> {
    let parts: Vec<String> = combo.split('-').map(|p| p.trim().to_lowercase()).collect();
    let Some((key, modifier_parts)) = parts.split_last() else {
        return Err("Empty trigger".to_string());
    };
    if key.is_empty() {
        return Err(format!("Missing key in trigger: {}", combo));
    }

    let mut modifiers = Modifiers::default();
    for part in modifier_parts {
        match part.as_str() {
            "cmd" | "super" | "command" => modifiers.cmd = true,
            "alt" | "opt" | "option" => modifiers.alt = true,
            "ctrl" | "control" => modifiers.ctrl = true,
            "shift" => modifiers.shift = true,
            _ => return Err(format!("Unknown modifier: {}", part)),
        }
    }
    if modifiers.is_empty() {
        return Err(format!("Trigger needs a held modifier: {}", combo));
    }

    let key_code = key_code(key).ok_or_else(|| format!("Unknown key: {}", key))?;
    Ok(Trigger {
        key_code,
        modifiers,
    })
}

pub fn format_trigger(trigger: &Trigger) -> String {
    let mut parts = Vec::new();
    if trigger.modifiers.cmd {
        parts.push("cmd");
    }
    if trigger.modifiers.alt {
        parts.push("alt");
    }
    if trigger.modifiers.ctrl {
        parts.push("ctrl");
    }
    if trigger.modifiers.shift {
        parts.push("shift");
    }
    parts.push(key_name(trigger.key_code).unwrap_or("unknown"));
    parts.join("-")
}

/// Translate a key press seen while the switcher is active.
pub fn switcher_key(key_code: u16) -> Option<SwitcherKey> {
    let key = match key_name(key_code)? {
        "return" => SwitcherKey::Enter,
        "escape" => SwitcherKey::Escape,
        "delete" => SwitcherKey::Backspace,
        "up" => SwitcherKey::Up,
        "down" => SwitcherKey::Down,
        "left" => SwitcherKey::Left,
        "right" => SwitcherKey::Right,
        "space" => SwitcherKey::Char(' '),
        "minus" => SwitcherKey::Char('-'),
        "period" => SwitcherKey::Char('.'),
        name if name.len() == 1 => SwitcherKey::Char(name.chars().next()?),
        _ => return None,
    };
    Some(key)
}

/// What a global key tap should do with one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapAction {
    /// Let the event through untouched
    Pass,
    /// Swallow the event
    Consume,
    /// Swallow the event: the trigger was pressed
    Trigger { reverse: bool },
    /// Swallow the event and hand it to the active switcher
    Input(SwitcherInput),
}

/// Routes key events between the switcher and the focused application.
///
/// Outside capture only the trigger is taken. While capturing, every key
/// press belongs to the switcher and releasing the trigger modifiers
/// confirms the selection.
#[derive(Debug, Clone, Copy)]
pub struct KeyRouter {
    trigger: Trigger,
}

impl KeyRouter {
    pub fn new(trigger: Trigger) -> Self {
        Self { trigger }
    }

    pub fn key_down(&self, capturing: bool, key_code: u16, held: Modifiers) -> TapAction {
        let is_trigger = key_code == self.trigger.key_code && self.trigger.modifiers.held_in(&held);
        if is_trigger {
            return TapAction::Trigger {
                reverse: held.shift && !self.trigger.modifiers.shift,
            };
        }
        if !capturing {
            return TapAction::Pass;
        }
        match switcher_key(key_code) {
            Some(key) => TapAction::Input(SwitcherInput::Key(key)),
            None => TapAction::Consume,
        }
    }

    pub fn flags_changed(&self, capturing: bool, held: Modifiers) -> TapAction {
        if capturing && !self.trigger.modifiers.held_in(&held) {
            return TapAction::Input(SwitcherInput::ModifierReleased);
        }
        TapAction::Pass
    }

    pub fn scroll(&self, capturing: bool, delta: f64) -> TapAction {
        if capturing {
            TapAction::Input(SwitcherInput::Scroll { delta })
        } else {
            TapAction::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alt_tab() {
        let trigger = parse_trigger("alt-tab").unwrap();
        assert_eq!(trigger.key_code, 0x30);
        assert!(trigger.modifiers.alt);
        assert!(!trigger.modifiers.cmd);
    }

    #[test]
    fn test_parse_multiple_modifiers_and_aliases() {
        let trigger = parse_trigger("Command-Shift-backtick").unwrap();
        assert_eq!(trigger.key_code, 0x32);
        assert_eq!(
            trigger.modifiers,
            Modifiers {
                cmd: true,
                shift: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_trigger("").is_err());
        assert!(parse_trigger("tab").is_err());
        assert!(parse_trigger("hyper-tab").is_err());
        assert!(parse_trigger("alt-f13").is_err());
        assert!(parse_trigger("alt-").is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        for combo in ["alt-tab", "cmd-shift-grave", "ctrl-space"] {
            assert_eq!(format_trigger(&parse_trigger(combo).unwrap()), combo);
        }
    }

    #[test]
    fn test_held_in_ignores_shift() {
        let trigger = parse_trigger("alt-tab").unwrap();
        let held = Modifiers {
            alt: true,
            shift: true,
            ..Default::default()
        };
        assert!(trigger.modifiers.held_in(&held));
        assert!(!trigger.modifiers.held_in(&Modifiers::default()));
    }

    #[test]
    fn test_switcher_key_mapping() {
        assert_eq!(switcher_key(0x24), Some(SwitcherKey::Enter));
        assert_eq!(switcher_key(0x33), Some(SwitcherKey::Backspace));
        assert_eq!(switcher_key(0x14), Some(SwitcherKey::Char('3')));
        assert_eq!(switcher_key(0x00), Some(SwitcherKey::Char('a')));
        assert_eq!(switcher_key(0x30), None);
    }

    fn alt(shift: bool) -> Modifiers {
        Modifiers {
            alt: true,
            shift,
            ..Default::default()
        }
    }

    #[test]
    fn test_router_takes_only_trigger_when_idle() {
        let router = KeyRouter::new(parse_trigger("alt-tab").unwrap());
        assert_eq!(
            router.key_down(false, 0x30, alt(false)),
            TapAction::Trigger { reverse: false }
        );
        assert_eq!(
            router.key_down(false, 0x30, alt(true)),
            TapAction::Trigger { reverse: true }
        );
        assert_eq!(router.key_down(false, 0x30, Modifiers::default()), TapAction::Pass);
        assert_eq!(router.key_down(false, 0x00, alt(false)), TapAction::Pass);
        assert_eq!(router.flags_changed(false, Modifiers::default()), TapAction::Pass);
        assert_eq!(router.scroll(false, 3.0), TapAction::Pass);
    }

    #[test]
    fn test_router_captures_everything_while_active() {
        let router = KeyRouter::new(parse_trigger("alt-tab").unwrap());
        assert_eq!(
            router.key_down(true, 0x14, alt(false)),
            TapAction::Input(SwitcherInput::Key(SwitcherKey::Char('3')))
        );
        assert_eq!(router.key_down(true, 0x7A, alt(false)), TapAction::Consume);
        assert_eq!(router.flags_changed(true, alt(true)), TapAction::Pass);
        assert_eq!(
            router.flags_changed(true, Modifiers::default()),
            TapAction::Input(SwitcherInput::ModifierReleased)
        );
        assert_eq!(
            router.scroll(true, -12.0),
            TapAction::Input(SwitcherInput::Scroll { delta: -12.0 })
        );
    }
}

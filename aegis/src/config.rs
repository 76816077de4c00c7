use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "aegis";
const CONFIG_FILE: &str = "config.json";

/// Read-only settings handed to each component at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tool: ToolSettings,
    pub mirror: MirrorSettings,
    pub monitors: MonitorSettings,
    pub switcher: SwitcherSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub binary: String,
    /// Arguments placed before every command, e.g. `-m` for yabai
    pub prefix_args: Vec<String>,
    pub min_interval_ms: u64,
    pub max_concurrent: usize,
    pub timeout_ms: u64,
    /// Substring in a command's output that marks it as failed
    pub failure_marker: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            binary: "yabai".to_string(),
            prefix_args: vec!["-m".to_string()],
            min_interval_ms: 50,
            max_concurrent: 3,
            timeout_ms: 3000,
            failure_marker: "could not".to_string(),
        }
    }
}

impl ToolSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSettings {
    pub debounce_ms: u64,
    /// Delay before refreshing after an OS-level activation or space change
    pub settle_delay_ms: u64,
    pub stack_tolerance: f64,
    pub excluded_apps: Vec<String>,
    pub pipe_path: PathBuf,
    pub focus_probe_interval_ms: u64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            settle_delay_ms: 150,
            stack_tolerance: 10.0,
            excluded_apps: Vec::new(),
            pipe_path: PathBuf::from("/tmp/aegis_yabai.fifo"),
            focus_probe_interval_ms: 100,
        }
    }
}

impl MirrorSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn focus_probe_interval(&self) -> Duration {
        Duration::from_millis(self.focus_probe_interval_ms)
    }

    pub fn is_excluded(&self, app: &str) -> bool {
        self.excluded_apps
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(app))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub volume_enabled: bool,
    pub brightness_enabled: bool,
    pub bluetooth_enabled: bool,
    pub media_enabled: bool,
    pub notifications_enabled: bool,
    pub focus_enabled: bool,

    pub bluetooth_settle_ms: u64,
    pub reconnect_window_ms: u64,
    pub battery_cache_size: usize,
    pub battery_max_age_ms: u64,
    pub artwork_cache_size: usize,
    /// Step applied per key press when a level has to be modeled locally
    pub estimated_step: f32,
    pub estimated_default: f32,
    pub media_command: Vec<String>,
    pub focus_dir: String,
    pub suppress_native_banners: bool,
    pub notification_dedup_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            volume_enabled: true,
            brightness_enabled: true,
            bluetooth_enabled: true,
            media_enabled: true,
            notifications_enabled: true,
            focus_enabled: true,
            bluetooth_settle_ms: 500,
            reconnect_window_ms: 2000,
            battery_cache_size: 8,
            battery_max_age_ms: 60_000,
            artwork_cache_size: 5,
            estimated_step: 0.0625,
            estimated_default: 0.5,
            media_command: vec!["media-control".to_string(), "stream".to_string()],
            focus_dir: "~/Library/DoNotDisturb/DB".to_string(),
            suppress_native_banners: true,
            notification_dedup_ms: 1000,
        }
    }
}

impl MonitorSettings {
    pub fn focus_dir(&self) -> PathBuf {
        expand_home(&self.focus_dir)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    /// Reset the accumulator after each step
    #[default]
    Notch,
    /// Subtract only the consumed threshold
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherSettings {
    pub enabled: bool,
    pub trigger: String,
    pub scroll_threshold: f64,
    pub scroll_mode: ScrollMode,
}

impl Default for SwitcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger: "alt-tab".to_string(),
            scroll_threshold: 30.0,
            scroll_mode: ScrollMode::Notch,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl Settings {
    /// Load settings from `path`, or from the default location.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(settings)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

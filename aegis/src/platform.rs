use crate::error::Result;
use crate::switcher::SwitcherInput;

/// OS notifications forwarded from the platform thread to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    AppActivated { pid: i32 },
    ActiveSpaceChanged,
    SwitcherTrigger { reverse: bool },
    Switcher(SwitcherInput),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub pid: i32,
    pub name: String,
    pub bundle_id: Option<String>,
}

/// Running regular applications. Used by the switcher when the window
/// manager cannot be queried.
pub trait AppEnumerator: Send + Sync + 'static {
    fn running_apps(&self) -> Result<Vec<RunningApp>>;
    fn activate(&self, pid: i32) -> Result<()>;
}

/// Global low-level keyboard capture for the switcher.
///
/// While capturing, every key event is swallowed and handed to the
/// switcher instead of the focused application.
pub trait InputIntercept: Send + Sync + 'static {
    fn set_capturing(&self, capturing: bool);
    fn is_capturing(&self) -> bool;
}

/// Platforms without application enumeration or an input tap.
pub struct NoPlatform;

impl AppEnumerator for NoPlatform {
    fn running_apps(&self) -> Result<Vec<RunningApp>> {
        Ok(Vec::new())
    }

    fn activate(&self, pid: i32) -> Result<()> {
        Err(crate::error::Error::permission(format!(
            "cannot activate pid {} on this platform",
            pid
        )))
    }
}

impl InputIntercept for NoPlatform {
    fn set_capturing(&self, _capturing: bool) {}

    fn is_capturing(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockApps {
        pub apps: Vec<RunningApp>,
        pub activated: Mutex<Vec<i32>>,
    }

    impl MockApps {
        pub fn with_apps(names: &[(i32, &str)]) -> Self {
            Self {
                apps: names
                    .iter()
                    .map(|(pid, name)| RunningApp {
                        pid: *pid,
                        name: name.to_string(),
                        bundle_id: None,
                    })
                    .collect(),
                activated: Mutex::new(Vec::new()),
            }
        }

        pub fn activated(&self) -> Vec<i32> {
            self.activated.lock().unwrap().clone()
        }
    }

    impl AppEnumerator for MockApps {
        fn running_apps(&self) -> Result<Vec<RunningApp>> {
            Ok(self.apps.clone())
        }

        fn activate(&self, pid: i32) -> Result<()> {
            self.activated.lock().unwrap().push(pid);
            Ok(())
        }
    }

    /// Records every capture transition.
    #[derive(Default)]
    pub struct MockIntercept {
        capturing: AtomicBool,
        pub transitions: Mutex<Vec<bool>>,
    }

    impl MockIntercept {
        pub fn transitions(&self) -> Vec<bool> {
            self.transitions.lock().unwrap().clone()
        }
    }

    impl InputIntercept for MockIntercept {
        fn set_capturing(&self, capturing: bool) {
            self.capturing.store(capturing, Ordering::SeqCst);
            self.transitions.lock().unwrap().push(capturing);
        }

        fn is_capturing(&self) -> bool {
            self.capturing.load(Ordering::SeqCst)
        }
    }
}

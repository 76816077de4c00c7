use objc2_app_kit::{
    NSApplicationActivationOptions, NSApplicationActivationPolicy, NSRunningApplication,
    NSWorkspace,
};

use crate::error::{Error, Result};
use crate::platform::{AppEnumerator, RunningApp};

/// Regular (Dock-visible) applications from the shared workspace.
pub struct WorkspaceApps;

impl AppEnumerator for WorkspaceApps {
    fn running_apps(&self) -> Result<Vec<RunningApp>> {
        let own_pid = std::process::id() as i32;
        let mut apps = Vec::new();

        unsafe {
            let running = NSWorkspace::sharedWorkspace().runningApplications();
            for i in 0..running.count() {
                let app = running.objectAtIndex(i);
                if app.activationPolicy() != NSApplicationActivationPolicy::Regular {
                    continue;
                }
                let pid = app.processIdentifier();
                if pid == own_pid {
                    continue;
                }
                let Some(name) = app.localizedName() else {
                    continue;
                };
                apps.push(RunningApp {
                    pid,
                    name: name.to_string(),
                    bundle_id: app.bundleIdentifier().map(|id| id.to_string()),
                });
            }
        }

        Ok(apps)
    }

    fn activate(&self, pid: i32) -> Result<()> {
        unsafe {
            let app = NSRunningApplication::runningApplicationWithProcessIdentifier(pid)
                .ok_or_else(|| Error::Io(std::io::Error::other(format!("no process {}", pid))))?;
            if !app.activateWithOptions(NSApplicationActivationOptions::ActivateAllWindows) {
                return Err(Error::Io(std::io::Error::other(format!(
                    "activation of pid {} refused",
                    pid
                ))));
            }
        }
        Ok(())
    }
}

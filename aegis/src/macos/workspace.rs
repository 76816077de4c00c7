use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{define_class, msg_send, sel, DefinedClass};
use objc2_app_kit::{NSRunningApplication, NSWorkspace};
use objc2_foundation::{MainThreadMarker, NSNotification, NSObject, NSObjectProtocol, NSString};
use tokio::sync::mpsc::UnboundedSender;

use crate::platform::PlatformEvent;

struct Ivars {
    event_tx: UnboundedSender<PlatformEvent>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[ivars = Ivars]
    struct WorkspaceObserver;

    unsafe impl NSObjectProtocol for WorkspaceObserver {}

    impl WorkspaceObserver {
        #[unsafe(method(appActivated:))]
        fn app_activated(&self, notification: &NSNotification) {
            if let Some(pid) = get_pid_from_notification(notification) {
                tracing::debug!("App activated: pid {}", pid);
                let _ = self.ivars().event_tx.send(PlatformEvent::AppActivated { pid });
            }
        }

        #[unsafe(method(activeSpaceChanged:))]
        fn active_space_changed(&self, _notification: &NSNotification) {
            tracing::debug!("Active space changed");
            let _ = self.ivars().event_tx.send(PlatformEvent::ActiveSpaceChanged);
        }
    }
);

fn get_pid_from_notification(notification: &NSNotification) -> Option<i32> {
    unsafe {
        let user_info = notification.userInfo()?;
        let key = NSString::from_str("NSWorkspaceApplicationKey");
        let app: Option<Retained<NSRunningApplication>> =
            msg_send![&user_info, objectForKey: &*key];
        app.map(|a| a.processIdentifier())
    }
}

impl WorkspaceObserver {
    fn new(event_tx: UnboundedSender<PlatformEvent>, mtm: MainThreadMarker) -> Retained<Self> {
        let this = mtm.alloc::<Self>();
        let this = this.set_ivars(Ivars { event_tx });
        unsafe { msg_send![super(this), init] }
    }
}

/// Forwards application activation and active-space changes from the
/// shared workspace notification center. Lives on the main thread.
pub struct WorkspaceWatcher {
    observer: Retained<WorkspaceObserver>,
}

impl WorkspaceWatcher {
    pub fn new(event_tx: UnboundedSender<PlatformEvent>, mtm: MainThreadMarker) -> Self {
        let observer = WorkspaceObserver::new(event_tx, mtm);

        unsafe {
            let center = NSWorkspace::sharedWorkspace().notificationCenter();
            let observer_obj: &AnyObject =
                std::mem::transmute::<&WorkspaceObserver, &AnyObject>(&*observer);

            let activated = NSString::from_str("NSWorkspaceDidActivateApplicationNotification");
            let space_changed = NSString::from_str("NSWorkspaceActiveSpaceDidChangeNotification");

            center.addObserver_selector_name_object(
                observer_obj,
                sel!(appActivated:),
                Some(&activated),
                None,
            );
            center.addObserver_selector_name_object(
                observer_obj,
                sel!(activeSpaceChanged:),
                Some(&space_changed),
                None,
            );
        }

        tracing::info!("Workspace watcher started");
        Self { observer }
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        unsafe {
            let center = NSWorkspace::sharedWorkspace().notificationCenter();
            let observer_obj: &AnyObject =
                std::mem::transmute::<&WorkspaceObserver, &AnyObject>(&*self.observer);
            center.removeObserver(observer_obj);
        }
    }
}

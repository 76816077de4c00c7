use std::collections::BTreeMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use core_foundation::base::{CFTypeID, TCFType};
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource, CFRunLoopSourceRef};
use core_foundation::string::{CFString, CFStringRef};
use core_foundation::{declare_TCFType, impl_TCFType};
use objc2_app_kit::NSRunningApplication;
use objc2_foundation::NSString;

use super::accessibility::{AXError, AXUIElement, AXUIElementRef, AX_ERROR_SUCCESS};
use crate::error::{Error, Result};
use crate::monitors::{Callback, CallbackSlot, NotificationBackend, RawNotification, SourceHandle};

const NOTIFICATION_CENTER: &str = "com.apple.notificationcenterui";
const WINDOW_CREATED: &str = "AXWindowCreated";
/// Banners kept around for dismissal; older ones are forgotten first
const REGISTRY_CAPACITY: usize = 32;
const MAX_DEPTH: usize = 8;

#[repr(C)]
pub struct __AXObserver(c_void);
pub type AXObserverRef = *mut __AXObserver;

declare_TCFType!(AXObserver, AXObserverRef);
impl_TCFType!(AXObserver, AXObserverRef, AXObserverGetTypeID);

type AXObserverCallback = unsafe extern "C" fn(
    observer: AXObserverRef,
    element: AXUIElementRef,
    notification: CFStringRef,
    refcon: *mut c_void,
);

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXObserverGetTypeID() -> CFTypeID;
    fn AXObserverCreate(pid: i32, callback: AXObserverCallback, out: *mut AXObserverRef) -> AXError;
    fn AXObserverAddNotification(
        observer: AXObserverRef,
        element: AXUIElementRef,
        notification: CFStringRef,
        refcon: *mut c_void,
    ) -> AXError;
    fn AXObserverRemoveNotification(
        observer: AXObserverRef,
        element: AXUIElementRef,
        notification: CFStringRef,
    ) -> AXError;
    fn AXObserverGetRunLoopSource(observer: AXObserverRef) -> CFRunLoopSourceRef;
}

/// Banner windows by the handle handed out in `RawNotification::banner`.
#[derive(Default)]
struct Registry {
    next: AtomicU64,
    banners: Mutex<BTreeMap<u64, AXUIElement>>,
}

impl Registry {
    fn insert(&self, banner: AXUIElement) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let mut banners = self.banners.lock().expect("banner registry lock poisoned");
        banners.insert(id, banner);
        while banners.len() > REGISTRY_CAPACITY {
            banners.pop_first();
        }
        id
    }

    fn take(&self, id: u64) -> Option<AXUIElement> {
        self.banners
            .lock()
            .expect("banner registry lock poisoned")
            .remove(&id)
    }
}

struct ObserverContext {
    slot: Arc<CallbackSlot<RawNotification>>,
    registry: Arc<Registry>,
}

fn collect_texts(element: &AXUIElement, depth: usize, texts: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    if element.role().as_deref() == Some("AXStaticText") {
        if let Some(text) = element.value().or_else(|| element.description()) {
            let text = text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
    }
    for child in element.children() {
        collect_texts(&child, depth + 1, texts);
    }
}

fn find_close_button(element: &AXUIElement, depth: usize) -> Option<AXUIElement> {
    if depth > MAX_DEPTH {
        return None;
    }
    if element.subrole().as_deref() == Some("AXCloseButton") {
        return Some(element.clone());
    }
    element
        .children()
        .iter()
        .find_map(|child| find_close_button(child, depth + 1))
}

/// Map the static texts of a banner, in tree order, onto a notification.
/// Three or more texts read as app, title, then body lines.
pub fn notification_from_texts(texts: &[String], banner: Option<u64>) -> Option<RawNotification> {
    let (app, title, body) = match texts {
        [] => return None,
        [title] => (None, title.clone(), String::new()),
        [title, body] => (None, title.clone(), body.clone()),
        [app, title, body @ ..] => (Some(app.clone()), title.clone(), body.join("\n")),
    };
    Some(RawNotification {
        app,
        title,
        body,
        banner,
    })
}

unsafe extern "C" fn window_created(
    _observer: AXObserverRef,
    element: AXUIElementRef,
    _notification: CFStringRef,
    refcon: *mut c_void,
) {
    if refcon.is_null() || element.is_null() {
        return;
    }
    let context = unsafe { &*(refcon as *const ObserverContext) };
    let window = unsafe { AXUIElement::wrap_under_get_rule(element) };

    let mut texts = Vec::new();
    collect_texts(&window, 0, &mut texts);
    if texts.is_empty() {
        return;
    }
    let banner = context.registry.insert(window);
    if let Some(raw) = notification_from_texts(&texts, Some(banner)) {
        tracing::debug!("Banner observed: {:?}", raw.title);
        context.slot.emit(raw);
    }
}

/// Keeps the accessibility observer on the notification center process
/// registered. Main thread only.
pub struct BannerWatcher {
    observer: AXObserver,
    app: AXUIElement,
    source: CFRunLoopSource,
    context: *mut ObserverContext,
}

impl Drop for BannerWatcher {
    fn drop(&mut self) {
        let notification = CFString::new(WINDOW_CREATED);
        unsafe {
            AXObserverRemoveNotification(
                self.observer.as_concrete_TypeRef(),
                self.app.as_concrete_TypeRef(),
                notification.as_concrete_TypeRef(),
            );
            CFRunLoop::get_current().remove_source(&self.source, kCFRunLoopDefaultMode);
            drop(Box::from_raw(self.context));
        }
    }
}

fn notification_center_pid() -> Option<i32> {
    let bundle = NSString::from_str(NOTIFICATION_CENTER);
    let apps = NSRunningApplication::runningApplicationsWithBundleIdentifier(&bundle);
    let app = apps.firstObject()?;
    Some(app.processIdentifier())
}

/// Notification banners read from the accessibility tree of the
/// notification center process.
pub struct BannerSource {
    slot: Arc<CallbackSlot<RawNotification>>,
    registry: Arc<Registry>,
}

impl BannerSource {
    pub fn install() -> (Option<BannerWatcher>, Arc<Self>) {
        let slot = CallbackSlot::new("notification banners");
        let registry = Arc::new(Registry::default());
        let backend = Arc::new(Self {
            slot: Arc::clone(&slot),
            registry: Arc::clone(&registry),
        });

        if !super::is_trusted() {
            tracing::warn!("Notification banners unavailable without Accessibility permission");
            return (None, backend);
        }
        let Some(pid) = notification_center_pid() else {
            tracing::warn!("Notification center process not found");
            return (None, backend);
        };

        let mut raw: AXObserverRef = std::ptr::null_mut();
        let err = unsafe { AXObserverCreate(pid, window_created, &mut raw) };
        if err != AX_ERROR_SUCCESS || raw.is_null() {
            tracing::warn!("Failed to create banner observer: AXError {}", err);
            return (None, backend);
        }
        let observer = unsafe { AXObserver::wrap_under_create_rule(raw) };
        let app = AXUIElement::application(pid);

        let context = Box::into_raw(Box::new(ObserverContext {
            slot: Arc::clone(&slot),
            registry,
        }));
        let notification = CFString::new(WINDOW_CREATED);
        let err = unsafe {
            AXObserverAddNotification(
                observer.as_concrete_TypeRef(),
                app.as_concrete_TypeRef(),
                notification.as_concrete_TypeRef(),
                context as *mut c_void,
            )
        };
        if err != AX_ERROR_SUCCESS {
            tracing::warn!("Failed to observe notification banners: AXError {}", err);
            unsafe { drop(Box::from_raw(context)) };
            return (None, backend);
        }

        let source = unsafe {
            CFRunLoopSource::wrap_under_get_rule(AXObserverGetRunLoopSource(
                observer.as_concrete_TypeRef(),
            ))
        };
        unsafe { CFRunLoop::get_current().add_source(&source, kCFRunLoopDefaultMode) };

        slot.mark_installed();
        let watcher = BannerWatcher {
            observer,
            app,
            source,
            context,
        };
        (Some(watcher), backend)
    }
}

impl NotificationBackend for BannerSource {
    fn subscribe(&self, callback: Callback<RawNotification>) -> Result<SourceHandle> {
        self.slot.subscribe(callback)
    }

    fn dismiss_banner(&self, banner: u64) -> Result<()> {
        let window = self
            .registry
            .take(banner)
            .ok_or_else(|| Error::platform(format!("unknown banner {}", banner)))?;
        let result = match find_close_button(&window, 0) {
            Some(button) => button.perform_action("AXPress"),
            None => window.perform_action("AXCancel"),
        };
        result.map_err(|err| Error::platform(format!("banner dismissal failed: AXError {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_banner_text_layouts() {
        assert_eq!(notification_from_texts(&[], None), None);

        let single = notification_from_texts(&texts(&["Low battery"]), Some(1)).unwrap();
        assert_eq!(single.app, None);
        assert_eq!(single.title, "Low battery");
        assert_eq!(single.body, "");
        assert_eq!(single.banner, Some(1));

        let pair = notification_from_texts(&texts(&["Build finished", "2 warnings"]), None).unwrap();
        assert_eq!(pair.app, None);
        assert_eq!(pair.title, "Build finished");
        assert_eq!(pair.body, "2 warnings");
    }

    #[test]
    fn test_extra_lines_join_into_body() {
        let raw = notification_from_texts(
            &texts(&["Messages", "Alice", "See you at 6", "Bring the keys"]),
            Some(4),
        )
        .unwrap();
        assert_eq!(raw.app.as_deref(), Some("Messages"));
        assert_eq!(raw.title, "Alice");
        assert_eq!(raw.body, "See you at 6\nBring the keys");
    }
}

use std::sync::mpsc as std_mpsc;

use anyhow::Result;
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};
use objc2_foundation::MainThreadMarker;
use tokio::sync::mpsc::UnboundedSender;

use super::{is_trusted, CaptureFlag, InputTap, WorkspaceWatcher};
use crate::platform::PlatformEvent;
use crate::switcher::KeyRouter;

const POLL_INTERVAL_SECS: f64 = 0.05;

struct RunLoopContext {
    quit_rx: std_mpsc::Receiver<()>,
}

/// Host the workspace observers and the input tap on the main thread
/// until `quit_rx` fires or its sender is dropped.
pub fn run_main_loop(
    event_tx: UnboundedSender<PlatformEvent>,
    capture: CaptureFlag,
    router: Option<KeyRouter>,
    quit_rx: std_mpsc::Receiver<()>,
) -> Result<()> {
    let Some(mtm) = MainThreadMarker::new() else {
        anyhow::bail!("The platform loop must run on the main thread");
    };

    let _workspace_watcher = WorkspaceWatcher::new(event_tx.clone(), mtm);

    let _input_tap = match router {
        Some(router) if is_trusted() => match InputTap::start(router, capture, event_tx) {
            Ok(tap) => Some(tap),
            Err(e) => {
                tracing::warn!("Switcher input unavailable: {}", e);
                None
            }
        },
        Some(_) => {
            tracing::warn!("Switcher input unavailable without Accessibility permission");
            None
        }
        None => None,
    };

    let context = Box::new(RunLoopContext { quit_rx });
    let mut timer_context = core_foundation::runloop::CFRunLoopTimerContext {
        version: 0,
        info: Box::into_raw(context) as *mut _,
        retain: None,
        release: None,
        copyDescription: None,
    };

    extern "C" fn timer_callback(
        _timer: core_foundation::runloop::CFRunLoopTimerRef,
        info: *mut std::ffi::c_void,
    ) {
        let ctx = unsafe { &*(info as *const RunLoopContext) };
        match ctx.quit_rx.try_recv() {
            Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => {
                CFRunLoop::get_current().stop();
            }
            Err(std_mpsc::TryRecvError::Empty) => {}
        }
    }

    let timer = unsafe {
        core_foundation::runloop::CFRunLoopTimer::new(
            core_foundation::date::CFAbsoluteTimeGetCurrent(),
            POLL_INTERVAL_SECS,
            0,
            0,
            timer_callback,
            &mut timer_context,
        )
    };

    let run_loop = CFRunLoop::get_current();
    run_loop.add_timer(&timer, unsafe { kCFRunLoopDefaultMode });

    tracing::info!("Entering CFRunLoop");
    CFRunLoop::run_current();
    tracing::info!("CFRunLoop exited");

    run_loop.remove_timer(&timer, unsafe { kCFRunLoopDefaultMode });
    // Reclaim the context now that the timer can no longer fire
    drop(unsafe { Box::from_raw(timer_context.info as *mut RunLoopContext) });
    Ok(())
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use aegis_ipc::Space;

use crate::error::{Error, Result};
use crate::runner::ToolRunner;

#[derive(Default)]
struct ProbeState {
    cached: Option<Space>,
    fetched_at: Option<Instant>,
}

/// Throttled lookup of the focused space that bypasses the mirror cache.
/// Concurrent callers share one query.
pub struct FocusedSpaceProbe {
    min_interval: Duration,
    stale: AtomicBool,
    state: Mutex<ProbeState>,
}

impl FocusedSpaceProbe {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            stale: AtomicBool::new(true),
            state: Mutex::new(ProbeState::default()),
        }
    }

    /// Mark the cached answer as outdated. The next lookup queries the
    /// tool, still respecting the throttle.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub async fn focused_space<R: ToolRunner>(&self, runner: &R) -> Result<Space> {
        let mut state = self.state.lock().await;
        let stale = self.stale.swap(false, Ordering::SeqCst);

        if let (Some(space), Some(at)) = (&state.cached, state.fetched_at) {
            if !stale && at.elapsed() < self.min_interval {
                return Ok(space.clone());
            }
        }

        if let Some(at) = state.fetched_at {
            tokio::time::sleep_until(at + self.min_interval).await;
        }

        let output = runner
            .run(vec![
                "query".to_string(),
                "--spaces".to_string(),
                "--space".to_string(),
            ])
            .await;
        state.fetched_at = Some(Instant::now());

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                self.stale.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let space: Space = serde_json::from_str(&output).map_err(|source| {
            self.stale.store(true, Ordering::SeqCst);
            Error::Decode {
                what: "focused space",
                source,
            }
        })?;

        state.cached = Some(space.clone());
        Ok(space)
    }
}

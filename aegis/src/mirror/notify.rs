use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::sys::stat::Mode;

use crate::error::{Error, Result};

const REOPEN_BACKOFF: Duration = Duration::from_secs(1);

/// How the mirror reacts to a token read from the notification pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeSignal {
    /// Focus or space layout changed: full refresh, bypassing debounce
    Critical,
    /// A space went away: like `Critical`, then prune its order entry
    SpaceDestroyed,
    /// Window set changed: windows-only refresh subject to debounce
    WindowSet,
    /// Unrecognized token: full forced refresh
    Unknown,
}

pub fn classify(token: &str) -> PipeSignal {
    match token {
        "space_changed" | "space_created" | "window_focused" => PipeSignal::Critical,
        "space_destroyed" => PipeSignal::SpaceDestroyed,
        "window_created" | "window_destroyed" | "window_moved" => PipeSignal::WindowSet,
        _ => PipeSignal::Unknown,
    }
}

/// Split a chunk read from the pipe into event tokens.
pub fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace()
}

/// Create the FIFO at `path`, replacing any non-FIFO file found there.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            tracing::warn!("{:?} exists but is not a FIFO, replacing it", path);
            std::fs::remove_file(path)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }

    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|errno| Error::Io(std::io::Error::from(errno)))?;
    tracing::info!("Created notification pipe at {:?}", path);
    Ok(())
}

/// Read tokens from the FIFO forever on a dedicated thread.
///
/// The pipe is reopened whenever the writer closes it. Each token is
/// handed to `on_token` from the listener thread.
pub fn spawn_pipe_listener<F>(path: PathBuf, on_token: F) -> Result<thread::JoinHandle<()>>
where
    F: Fn(&str) + Send + 'static,
{
    ensure_fifo(&path)?;

    let handle = thread::Builder::new()
        .name("aegis-pipe".to_string())
        .spawn(move || loop {
            // Blocks until a writer opens the pipe
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Failed to open notification pipe {:?}: {}", path, e);
                    thread::sleep(REOPEN_BACKOFF);
                    continue;
                }
            };

            if let Err(e) = read_tokens(BufReader::new(file), &on_token) {
                tracing::warn!("Notification pipe read error: {}", e);
            }
            tracing::trace!("Notification pipe writer closed, reopening");
        })?;

    Ok(handle)
}

/// Feed every token from `reader` to `on_token` until EOF.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_tokens<B: BufRead>(mut reader: B, on_token: &dyn Fn(&str)) -> std::io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        for token in tokens(&line) {
            on_token(token);
        }
    }
}

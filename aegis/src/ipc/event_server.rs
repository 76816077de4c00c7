use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use aegis_ipc::{Event, SubscribeRequest};

use super::EVENT_SOCKET_PATH;
use crate::bus::{EventBus, Subscription};

/// Produces the events replayed to a subscriber that asked for a snapshot.
pub type SnapshotFn = Arc<dyn Fn() -> Vec<Event> + Send + Sync>;

/// Event stream socket. A client sends one `SubscribeRequest` line, then
/// receives every matching bus event as a JSON line.
pub struct EventServer {
    socket_path: PathBuf,
    event_rx: broadcast::Receiver<Event>,
    snapshot: SnapshotFn,
}

impl EventServer {
    pub fn new(event_rx: broadcast::Receiver<Event>, snapshot: SnapshotFn) -> Self {
        Self::with_path(EVENT_SOCKET_PATH, event_rx, snapshot)
    }

    pub fn with_path(
        socket_path: impl AsRef<Path>,
        event_rx: broadcast::Receiver<Event>,
        snapshot: SnapshotFn,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            event_rx,
            snapshot,
        }
    }

    fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Event server listening on {:?}", self.socket_path);
        Ok(listener)
    }

    pub async fn run(self) -> Result<()> {
        let listener = self.bind()?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let event_rx = self.event_rx.resubscribe();
                    let snapshot = Arc::clone(&self.snapshot);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, event_rx, snapshot).await {
                            tracing::debug!("Event subscriber disconnected: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Event server accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: UnixStream,
        mut event_rx: broadcast::Receiver<Event>,
        snapshot: SnapshotFn,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }

        let request: SubscribeRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed subscribe request, streaming everything: {}", e);
                SubscribeRequest::default()
            }
        };
        tracing::debug!("New event subscriber for {:?}", request.kinds);

        if request.snapshot {
            for event in snapshot() {
                if request.matches(&event) {
                    write_event(&mut writer, &event).await?;
                }
            }
        }

        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if request.matches(&event) {
                        write_event(&mut writer, &event).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event subscriber lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(())
    }
}

async fn write_event(writer: &mut OwnedWriteHalf, event: &Event) -> Result<()> {
    let json = serde_json::to_string(event)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

impl Drop for EventServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Fans bus events out to socket subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    event_tx: broadcast::Sender<Event>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Forward every event published on `bus`.
    pub fn attach(&self, bus: &EventBus) -> Subscription {
        let broadcaster = self.clone();
        bus.subscribe_all(move |event| broadcaster.send(event.clone()))
    }
}

mod client;
mod event_server;
mod server;

pub use client::{subscribe_and_print, EventClient, IpcClient};
pub use event_server::{EventBroadcaster, EventServer, SnapshotFn};
pub use server::{IpcServer, RequestWithResponse};

pub const SOCKET_PATH: &str = "/tmp/aegis.sock";
pub const EVENT_SOCKET_PATH: &str = "/tmp/aegis-events.sock";

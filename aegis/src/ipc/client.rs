use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result};

use aegis_ipc::{Event, EventKind, Request, Response, SubscribeRequest};

use super::{EVENT_SOCKET_PATH, SOCKET_PATH};

pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    pub fn connect() -> Result<Self> {
        Self::connect_to(SOCKET_PATH)
    }

    pub fn connect_to(path: impl AsRef<Path>) -> Result<Self> {
        let stream =
            UnixStream::connect(path.as_ref()).context("Failed to connect to aegis daemon")?;
        Ok(Self { stream })
    }

    pub fn send(&mut self, request: &Request) -> Result<Response> {
        let json = serde_json::to_string(request)?;
        writeln!(self.stream, "{}", json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.is_empty() {
            anyhow::bail!("Daemon closed the connection");
        }

        let response: Response = serde_json::from_str(&line)?;
        Ok(response)
    }
}

/// Blocking reader of the daemon's event stream
pub struct EventClient {
    reader: BufReader<UnixStream>,
}

impl EventClient {
    pub fn connect(request: &SubscribeRequest) -> Result<Self> {
        Self::connect_to(EVENT_SOCKET_PATH, request)
    }

    pub fn connect_to(path: impl AsRef<Path>, request: &SubscribeRequest) -> Result<Self> {
        let mut stream = UnixStream::connect(path.as_ref())
            .context("Failed to connect to aegis event server")?;

        let json = serde_json::to_string(request)?;
        writeln!(stream, "{}", json)?;
        stream.flush()?;

        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Next event, or `None` once the daemon closes the stream.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let event: Event = serde_json::from_str(&line)?;
        Ok(Some(event))
    }
}

/// Subscribe and print events to stdout as JSON lines
pub fn subscribe_and_print(snapshot: bool, kinds: Vec<EventKind>) -> Result<()> {
    let request = SubscribeRequest { snapshot, kinds };
    let mut client = EventClient::connect(&request)?;

    while let Some(event) = client.next_event()? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    #[test]
    fn test_send_reads_one_response_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let request: Request = serde_json::from_str(&line).unwrap();
            let mut stream = stream;
            writeln!(stream, r#"{{"type":"ok"}}"#).unwrap();
            request
        });

        let mut client = IpcClient::connect_to(&path).unwrap();
        let response = client.send(&Request::FocusSpace { space: 2 }).unwrap();
        assert_eq!(response, Response::Ok);
        assert_eq!(server.join().unwrap(), Request::FocusSpace { space: 2 });
    }

    #[test]
    fn test_event_client_sends_request_and_stops_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut stream = stream;
            writeln!(stream, r#"{{"type":"focus_changed","mode":null}}"#).unwrap();
            line
        });

        let request = SubscribeRequest {
            snapshot: true,
            kinds: vec![EventKind::FocusChanged],
        };
        let mut client = EventClient::connect_to(&path, &request).unwrap();
        assert_eq!(
            client.next_event().unwrap(),
            Some(Event::FocusChanged { mode: None })
        );
        let sent = server.join().unwrap();
        assert!(sent.contains("\"snapshot\":true"));
        assert!(sent.contains("focus_changed"));
        assert_eq!(client.next_event().unwrap(), None);
    }
}

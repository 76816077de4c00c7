use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use aegis_ipc::{Request, Response};

use super::SOCKET_PATH;

pub type RequestWithResponse = (Request, mpsc::Sender<Response>);

/// Command socket. Each line is a JSON `Request`, answered by one JSON
/// `Response` line after the request has been handled.
pub struct IpcServer {
    socket_path: PathBuf,
    request_tx: mpsc::Sender<RequestWithResponse>,
}

impl IpcServer {
    pub fn new(request_tx: mpsc::Sender<RequestWithResponse>) -> Self {
        Self::with_path(SOCKET_PATH, request_tx)
    }

    pub fn with_path(
        socket_path: impl AsRef<Path>,
        request_tx: mpsc::Sender<RequestWithResponse>,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            request_tx,
        }
    }

    fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let request_tx = self.request_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, request_tx).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: UnixStream,
        request_tx: mpsc::Sender<RequestWithResponse>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Request>(line) {
                Ok(request) => {
                    tracing::debug!("Received request: {:?}", request);
                    let (resp_tx, mut resp_rx) = mpsc::channel(1);

                    if request_tx.send((request, resp_tx)).await.is_err() {
                        Response::error("Internal error: request channel closed")
                    } else {
                        resp_rx
                            .recv()
                            .await
                            .unwrap_or_else(|| Response::error("Internal error: no response"))
                    }
                }
                Err(e) => Response::error(format!("Invalid request: {}", e)),
            };

            let response_json = serde_json::to_string(&response)?;
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_ipc::Space;

    async fn roundtrip(stream: &mut BufReader<UnixStream>, line: &str) -> Response {
        stream.get_mut().write_all(line.as_bytes()).await.unwrap();
        stream.get_mut().write_all(b"\n").await.unwrap();
        let mut reply = String::new();
        stream.read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_requests_are_forwarded_and_answered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.sock");
        let (tx, mut rx) = mpsc::channel::<RequestWithResponse>(8);

        let server = IpcServer::with_path(&path, tx);
        let listener = server.bind().unwrap();
        let request_tx = server.request_tx.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = IpcServer::handle_connection(stream, request_tx).await;
        });
        tokio::spawn(async move {
            while let Some((request, resp_tx)) = rx.recv().await {
                let response = match request {
                    Request::FocusedSpace => Response::Space {
                        space: Some(Space {
                            id: 7,
                            index: 2,
                            label: None,
                            display: 1,
                            windows: vec![],
                            focused: true,
                            is_native_fullscreen: false,
                        }),
                    },
                    _ => Response::Ok,
                };
                let _ = resp_tx.send(response).await;
            }
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let mut stream = BufReader::new(stream);

        let response = roundtrip(&mut stream, r#"{"type":"focused_space"}"#).await;
        match response {
            Response::Space { space: Some(space) } => assert_eq!(space.index, 2),
            other => panic!("Unexpected response: {:?}", other),
        }
        assert_eq!(roundtrip(&mut stream, r#"{"type":"balance"}"#).await, Response::Ok);

        match roundtrip(&mut stream, r#"{"type":"teleport"}"#).await {
            Response::Error { message } => assert!(message.starts_with("Invalid request")),
            other => panic!("Unexpected response: {:?}", other),
        }
        drop(server);
    }
}

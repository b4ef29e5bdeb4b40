//! niri IPC connections
//!
//! niri listens on `$NIRI_SOCKET` and speaks JSON lines: one `Request` per
//! line in, one `Reply` per line out. After `Request::EventStream` the
//! connection carries only `Event` lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::warn;

use super::types::WindowInfo;
use super::NiriError;

const INITIAL_RETRY_DELAY_MS: u64 = 100;

const MAX_RETRY_DELAY_MS: u64 = 5000;

const NIRI_SOCKET_ENV: &str = "NIRI_SOCKET";

/// Discover the niri IPC socket path from `$NIRI_SOCKET`
pub fn get_socket_path() -> Result<PathBuf, NiriError> {
    let socket_path = std::env::var(NIRI_SOCKET_ENV).map_err(|_| NiriError::SocketNotSet)?;
    let socket_path = PathBuf::from(socket_path);

    if !socket_path.exists() {
        return Err(NiriError::SocketNotFound { path: socket_path });
    }

    Ok(socket_path)
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(path: &Path) -> Result<Self, NiriError> {
        let socket = UnixStream::connect(path)
            .await
            .map_err(|source| NiriError::ConnectionFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let (read_half, writer) = socket.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    async fn write_request(&mut self, request: &niri_ipc::Request) -> Result<(), NiriError> {
        let mut line = serde_json::to_string(request).map_err(NiriError::SerializeFailed)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(NiriError::SendFailed)?;
        self.writer.flush().await.map_err(NiriError::SendFailed)
    }

    async fn read_line(&mut self) -> Result<String, NiriError> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(NiriError::ReceiveFailed)?;
        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }
        Ok(line)
    }

    async fn request(&mut self, request: &niri_ipc::Request) -> Result<niri_ipc::Response, NiriError> {
        self.write_request(request).await?;
        let line = self.read_line().await?;
        let reply: niri_ipc::Reply =
            serde_json::from_str(&line).map_err(NiriError::DeserializeFailed)?;
        reply.map_err(|message| NiriError::Rejected { message })
    }
}

/// Request/response client
pub struct NiriClient {
    connection: Connection,
}

impl NiriClient {
    /// Connect to the socket named by `$NIRI_SOCKET`
    pub async fn connect() -> Result<Self, NiriError> {
        Self::connect_to(&get_socket_path()?).await
    }

    pub async fn connect_to(path: &Path) -> Result<Self, NiriError> {
        Ok(Self {
            connection: Connection::open(path).await?,
        })
    }

    pub async fn send_request(
        &mut self,
        request: niri_ipc::Request,
    ) -> Result<niri_ipc::Response, NiriError> {
        self.connection.request(&request).await
    }

    /// The focused window, or `None` when nothing has focus
    pub async fn focused_window(&mut self) -> Result<Option<WindowInfo>, NiriError> {
        match self.send_request(niri_ipc::Request::FocusedWindow).await? {
            niri_ipc::Response::FocusedWindow(window) => Ok(window.map(WindowInfo::from)),
            _ => Err(NiriError::UnexpectedResponse {
                request: "FocusedWindow",
            }),
        }
    }

    pub async fn windows(&mut self) -> Result<Vec<WindowInfo>, NiriError> {
        match self.send_request(niri_ipc::Request::Windows).await? {
            niri_ipc::Response::Windows(windows) => {
                Ok(windows.into_iter().map(WindowInfo::from).collect())
            }
            _ => Err(NiriError::UnexpectedResponse { request: "Windows" }),
        }
    }

    pub async fn action(&mut self, action: niri_ipc::Action) -> Result<(), NiriError> {
        match self.send_request(niri_ipc::Request::Action(action)).await? {
            niri_ipc::Response::Handled => Ok(()),
            _ => Err(NiriError::UnexpectedResponse { request: "Action" }),
        }
    }
}

/// A connection switched into event-stream mode
pub struct NiriEventStream {
    connection: Connection,
}

impl NiriEventStream {
    pub async fn connect() -> Result<Self, NiriError> {
        Self::connect_to(&get_socket_path()?).await
    }

    pub async fn connect_to(path: &Path) -> Result<Self, NiriError> {
        let mut connection = Connection::open(path).await?;
        match connection.request(&niri_ipc::Request::EventStream).await? {
            niri_ipc::Response::Handled => Ok(Self { connection }),
            _ => Err(NiriError::UnexpectedResponse {
                request: "EventStream",
            }),
        }
    }

    /// Connect with exponential backoff, capped at 5s between attempts.
    ///
    /// `SocketNotSet` is not retried; niri is simply not the compositor.
    pub async fn connect_with_retry(max_retries: u32) -> Result<Self, NiriError> {
        let mut attempt = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        loop {
            attempt += 1;

            match Self::connect().await {
                Ok(stream) => return Ok(stream),
                Err(NiriError::SocketNotSet) => return Err(NiriError::SocketNotSet),
                Err(e) => {
                    if attempt > max_retries {
                        warn!(attempts = attempt, error = %e, "Giving up on niri event stream");
                        return Err(NiriError::MaxRetriesExceeded { attempts: attempt });
                    }

                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay_ms,
                        "Niri event stream connection failed, retrying..."
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
            }
        }
    }

    pub async fn next_event(&mut self) -> Result<niri_ipc::Event, NiriError> {
        let line = self.connection.read_line().await?;
        serde_json::from_str(&line).map_err(NiriError::DeserializeFailed)
    }
}

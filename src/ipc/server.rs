//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the configuration and UI
//! collaborators, forwards their signals to the engine, and pushes engine
//! events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::EngineEvent;
use crate::state::EngineInput;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

type ParsedRequest = std::result::Result<Request, serde_json::Error>;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Signals for the engine task
    input_tx: mpsc::Sender<EngineInput>,
    /// Source of pushed notifications
    event_tx: broadcast::Sender<EngineEvent>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// Per-connection handles cloned from the server
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    input_tx: mpsc::Sender<EngineInput>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        input_tx: mpsc::Sender<EngineInput>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            state,
            shutdown_tx,
            input_tx,
            event_tx,
        })
    }

    /// Fold an engine event into the status served to clients
    pub async fn apply_event(&self, event: &EngineEvent) {
        let mut state = self.state.write().await;
        state.status.apply_event(event);
    }

    /// Current status snapshot
    pub async fn status(&self) -> DaemonStatus {
        let state = self.state.read().await;
        let mut status = state.status.clone();
        status.uptime_secs = state.start_time.elapsed().as_secs();
        status
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = ClientContext {
                        state: Arc::clone(&self.state),
                        input_tx: self.input_tx.clone(),
                        event_tx: self.event_tx.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Frames are read on a separate task so that a subscribed client can
    /// receive pushes while its next request is still arriving.
    async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel::<ParsedRequest>(8);

        let reader_task = tokio::spawn(async move {
            if let Err(e) = Self::read_requests(reader, request_tx).await {
                debug!(?e, "client read error");
            }
        });

        let mut events: Option<broadcast::Receiver<EngineEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        break Ok(());
                    };
                    let response = match request {
                        Ok(Request::Subscribe) => {
                            events = Some(context.event_tx.subscribe());
                            debug!("client subscribed to notifications");
                            Response::Subscribed
                        }
                        Ok(request) => {
                            debug!(?request, "received request");
                            Self::process_request(request, &context).await
                        }
                        Err(e) => {
                            warn!(%e, "malformed request");
                            Response::error("invalid_request", e.to_string())
                        }
                    };
                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        let notification = Notification::Event { event };
                        if let Err(e) = Self::send_message(&mut writer, &notification).await {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        };

        reader_task.abort();
        debug!("client disconnected");
        result
    }

    /// Read length-prefixed frames until EOF or an oversized frame
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<ParsedRequest>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            if request_tx.send(serde_json::from_slice(&msg_buf)).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: serde::Serialize,
    {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ClientContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let state = context.state.read().await;
                let mut status = state.status.clone();
                status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(status)
            }

            Request::SetMode { mode } => {
                info!(%mode, "mode change requested via IPC");
                forward(context, EngineInput::SetMode(mode), Response::ModeChange { mode }).await
            }

            Request::ReplaceConfiguration { configuration } => {
                let workflows = configuration.workflow_count();
                forward(
                    context,
                    EngineInput::ConfigurationReplaced(configuration),
                    Response::ConfigurationAccepted { workflows },
                )
                .await
            }

            Request::ApplicationActivated { bundle_identifier } => {
                forward(
                    context,
                    EngineInput::FrontmostApplicationChanged(bundle_identifier),
                    Response::Acknowledged,
                )
                .await
            }

            Request::ApplicationLaunched { bundle_identifier } => {
                forward(
                    context,
                    EngineInput::ApplicationLaunched(bundle_identifier),
                    Response::Acknowledged,
                )
                .await
            }

            Request::ApplicationTerminated { bundle_identifier } => {
                forward(
                    context,
                    EngineInput::ApplicationTerminated(bundle_identifier),
                    Response::Acknowledged,
                )
                .await
            }

            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

async fn forward(context: &ClientContext, input: EngineInput, response: Response) -> Response {
    match context.input_tx.send(input).await {
        Ok(()) => response,
        Err(_) => Response::error("engine_unavailable", "engine task is not running"),
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> std::result::Result<EngineEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::state::Mode;

    struct TestServer {
        server: Arc<Server>,
        input_rx: mpsc::Receiver<EngineInput>,
        event_tx: broadcast::Sender<EngineEvent>,
        socket_path: PathBuf,
    }

    fn start(name: &str) -> TestServer {
        let socket_path =
            std::env::temp_dir().join(format!("keyflow-{}-{}.sock", name, std::process::id()));
        let (input_tx, input_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(16);
        let server = Arc::new(Server::new(&socket_path, input_tx, event_tx.clone()).unwrap());

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        TestServer {
            server,
            input_rx,
            event_tx,
            socket_path,
        }
    }

    async fn send(stream: &mut UnixStream, request: &Request) {
        Server::send_message(stream, request).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> serde_json::Value {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let t = start("ping");
        let mut stream = UnixStream::connect(&t.socket_path).await.unwrap();

        send(&mut stream, &Request::Ping).await;
        assert_eq!(recv(&mut stream).await["type"], "pong");

        t.server
            .apply_event(&EngineEvent::SnapshotInstalled {
                active_workflows: 3,
                frontmost_application: None,
            })
            .await;
        send(&mut stream, &Request::GetStatus).await;
        let status = recv(&mut stream).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["active_workflows"], 3);
        assert_eq!(status["mode"], "intercept");

        t.server.shutdown().await;
        assert!(!t.socket_path.exists());
    }

    #[tokio::test]
    async fn test_requests_are_forwarded_to_engine() {
        let mut t = start("forward");
        let mut stream = UnixStream::connect(&t.socket_path).await.unwrap();

        send(&mut stream, &Request::SetMode { mode: Mode::Disabled }).await;
        assert_eq!(recv(&mut stream).await["type"], "mode_change");
        assert!(matches!(
            t.input_rx.recv().await,
            Some(EngineInput::SetMode(Mode::Disabled))
        ));

        send(
            &mut stream,
            &Request::ApplicationActivated {
                bundle_identifier: "com.apple.Safari".to_string(),
            },
        )
        .await;
        assert_eq!(recv(&mut stream).await["type"], "acknowledged");
        match t.input_rx.recv().await {
            Some(EngineInput::FrontmostApplicationChanged(bundle)) => {
                assert_eq!(bundle, "com.apple.Safari");
            }
            other => panic!("unexpected input: {other:?}"),
        }

        t.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let t = start("malformed");
        let mut stream = UnixStream::connect(&t.socket_path).await.unwrap();

        let body = br#"{"type":"no_such_request"}"#;
        stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let response = recv(&mut stream).await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "invalid_request");

        // Connection stays usable
        send(&mut stream, &Request::Ping).await;
        assert_eq!(recv(&mut stream).await["type"], "pong");

        t.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let t = start("subscribe");
        let mut stream = UnixStream::connect(&t.socket_path).await.unwrap();

        send(&mut stream, &Request::Subscribe).await;
        assert_eq!(recv(&mut stream).await["type"], "subscribed");

        t.event_tx
            .send(EngineEvent::WorkflowFired {
                workflow_id: "w1".to_string(),
                name: "Open example".to_string(),
            })
            .unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(2), recv(&mut stream))
            .await
            .unwrap();
        assert_eq!(notification["type"], "event");
        assert_eq!(notification["event"]["type"], "workflow_fired");
        assert_eq!(notification["event"]["workflow_id"], "w1");

        t.server.shutdown().await;
    }
}

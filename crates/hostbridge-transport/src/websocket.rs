//! WebSocket transport for the browser terminal.
//!
//! Each socket gets its own session. Widget commands become
//! [`ServerMessage`]s on the socket, and widget queries are matched to
//! their `query_reply` by request id.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt};
use hostbridge_core::{
    BridgeConfig, BridgeError, Credential, QueryReply, ScrollTarget, ShellConnector,
    TerminalCommand, TerminalQuery, TerminalSink,
};
use hostbridge_session::SessionHandle;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{ClientMessage, ServerMessage};

/// How long the widget has to answer a query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub config: Arc<BridgeConfig>,
    pub connector: Arc<dyn ShellConnector>,
}

impl WsState {
    #[must_use]
    pub fn new(config: Arc<BridgeConfig>, connector: Arc<dyn ShellConnector>) -> Self {
        Self { config, connector }
    }
}

/// [`TerminalSink`] writing to one socket's outbound queue.
pub struct WsTerminalSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
    pending: Mutex<HashMap<u64, oneshot::Sender<QueryReply>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl WsTerminalSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>, timeout: Duration) -> Self {
        Self {
            tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<QueryReply>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Deliver a widget answer. Returns false for unknown or expired ids.
    pub fn resolve(&self, request_id: u64, reply: QueryReply) -> bool {
        match self.pending().remove(&request_id) {
            Some(waiter) => waiter.send(reply).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl TerminalSink for WsTerminalSink {
    fn push(&self, command: TerminalCommand) {
        if self.tx.send(ServerMessage::from(command)).is_err() {
            tracing::debug!("Socket gone, dropping terminal command");
        }
    }

    async fn query(&self, query: TerminalQuery) -> Result<QueryReply, BridgeError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending().insert(request_id, reply_tx);

        if self
            .tx
            .send(ServerMessage::Query { request_id, query })
            .is_err()
        {
            self.pending().remove(&request_id);
            return Err(BridgeError::Terminal("socket closed".to_string()));
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::Terminal("query abandoned".to_string())),
            Err(_) => {
                self.pending().remove(&request_id);
                Err(BridgeError::Terminal(format!(
                    "no answer to {query:?} within {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let sink = Arc::new(WsTerminalSink::new(tx.clone(), QUERY_TIMEOUT));
    let (session, session_task) =
        SessionHandle::spawn(&state.config, Arc::clone(&state.connector), sink.clone());
    let session_id = session.id();
    tracing::info!(%session_id, "WebSocket connected");

    let _ = tx.send(ServerMessage::SessionStarted {
        session_id: session_id.to_string(),
    });

    let mode_task = {
        let mut modes = session.subscribe_mode();
        let tx = tx.clone();
        tokio::spawn(async move {
            while modes.changed().await.is_ok() {
                let mode = *modes.borrow_and_update();
                if tx.send(ServerMessage::ModeChanged { mode }).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(msg) = receiver.next().await {
        let mut frame = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg = match parse_frame(&mut frame) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        if let Err(e) = dispatch(client_msg, &session, &sink, &tx).await {
            tracing::warn!(%session_id, error = %e, "Client message failed");
            let _ = tx.send(ServerMessage::Error {
                message: e.to_string(),
            });
            if matches!(e, BridgeError::SessionClosed) {
                break;
            }
        }
    }

    session.shutdown();
    let _ = session_task.await;
    mode_task.abort();
    send_task.abort();
    tracing::info!(%session_id, "WebSocket disconnected, session closed");
}

/// Parse one client frame, wiping it when it carried sign-in codes.
fn parse_frame(frame: &mut String) -> serde_json::Result<ClientMessage> {
    let parsed = serde_json::from_str::<ClientMessage>(frame);
    if matches!(parsed, Ok(ClientMessage::Login { .. })) {
        Credential::new(std::mem::take(frame)).wipe();
    }
    parsed
}

async fn dispatch(
    msg: ClientMessage,
    session: &SessionHandle,
    sink: &WsTerminalSink,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), BridgeError> {
    match msg {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::Input { data } => match BASE64.decode(&data) {
            Ok(bytes) => session.input(String::from_utf8_lossy(&bytes)).await?,
            Err(e) => tracing::warn!("Undecodable input: {e}"),
        },
        ClientMessage::Login {
            access_code,
            verify_code,
        } => {
            let access = Credential::new(access_code);
            let verify = Credential::new(verify_code);
            // Sign-in can take many rounds; keep reading query replies meanwhile.
            let session = session.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = session.login(access, verify).await;
                let _ = tx.send(ServerMessage::LoginResult {
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                });
            });
        }
        ClientMessage::Logout => {
            // Waits behind any sign-in in progress.
            let session = session.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = session.logout().await {
                    let _ = tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            });
        }
        ClientMessage::Reconnect => {
            let session = session.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = session.reconnect().await {
                    let _ = tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            });
        }
        ClientMessage::Resize { cols, rows } => session.resize(cols, rows).await?,
        ClientMessage::ReportMode { active } => {
            if active {
                session.enter_report().await?;
            } else {
                session.leave_report().await?;
            }
        }
        ClientMessage::Clear => session.bridge().clear(),
        ClientMessage::Reinitialize => session.bridge().reinitialize(),
        ClientMessage::ScrollTo { target } => session
            .bridge()
            .scroll_to(target.map_or(ScrollTarget::Bottom, ScrollTarget::Element)),
        ClientMessage::DownloadTranscript => session.download_transcript().await?,
        ClientMessage::QueryReply { request_id, reply } => {
            if !sink.resolve(request_id, reply) {
                tracing::debug!(request_id, "Reply to unknown or expired query");
            }
        }
    }
    Ok(())
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(config, connector)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}

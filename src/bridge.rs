//! WebSocket bridge to the browser-automation sidecar
//!
//! The WhatsApp Web client runs out of process. The sidecar connects to
//! `/bridge`, authenticates, relays lifecycle and message notifications, and
//! executes `send_message` / `logout` commands that we correlate by request id.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::transport::Transport;
use crate::types::{BridgeFrame, ClientEvent, SentMessage};

type CommandResult = Result<Option<Value>, String>;

/// The currently attached sidecar
struct Sidecar {
    conn_id: Uuid,
    addr: SocketAddr,
    tx: mpsc::Sender<BridgeFrame>,
}

/// Transport backed by a sidecar connected over WebSocket
#[derive(Clone)]
pub struct BridgeTransport {
    api_key: Option<String>,
    command_timeout: Duration,
    debug_mode: bool,
    sidecar: Arc<RwLock<Option<Sidecar>>>,
    /// Pending commands: request_id -> reply channel
    pending: Arc<DashMap<Uuid, oneshot::Sender<CommandResult>>>,
    /// Set by `connect`; notifications are dropped until then
    events: Arc<RwLock<Option<mpsc::Sender<ClientEvent>>>>,
}

impl BridgeTransport {
    pub fn new(api_key: Option<String>, command_timeout: Duration, debug_mode: bool) -> Self {
        Self {
            api_key,
            command_timeout,
            debug_mode,
            sidecar: Arc::new(RwLock::new(None)),
            pending: Arc::new(DashMap::new()),
            events: Arc::new(RwLock::new(None)),
        }
    }

    fn is_authorized(&self, api_key: &str) -> bool {
        self.api_key.as_deref().is_none_or(|expected| expected == api_key)
    }

    /// Attach a sidecar, replacing any previous one. Returns its connection id.
    pub fn attach(&self, addr: SocketAddr, tx: mpsc::Sender<BridgeFrame>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let previous = self.sidecar.write().replace(Sidecar { conn_id, addr, tx });
        if let Some(previous) = previous {
            warn!(
                "Sidecar from {} replaced by new connection from {}",
                previous.addr, addr
            );
        }
        info!("Sidecar {} attached from {}", conn_id, addr);
        conn_id
    }

    /// Detach a sidecar if it is still the current one; fails all pending commands
    pub async fn detach(&self, conn_id: Uuid) {
        let removed = {
            let mut guard = self.sidecar.write();
            if guard.as_ref().map(|s| s.conn_id) == Some(conn_id) {
                guard.take()
            } else {
                None
            }
        };

        if let Some(sidecar) = removed {
            info!("Sidecar {} from {} detached", conn_id, sidecar.addr);
            // Dropping the reply senders wakes every waiter with an error
            self.pending.clear();
            self.emit(ClientEvent::Disconnected {
                reason: "bridge connection closed".to_string(),
            })
            .await;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sidecar.read().is_some()
    }

    /// Whether `conn_id` is the sidecar currently driving the session
    pub fn is_current(&self, conn_id: Uuid) -> bool {
        self.sidecar.read().as_ref().map(|s| s.conn_id) == Some(conn_id)
    }

    /// Route a command result or client notification from an authenticated
    /// sidecar. Frames from a replaced sidecar are dropped.
    pub async fn dispatch(&self, conn_id: Uuid, frame: BridgeFrame) {
        if !self.is_current(conn_id) {
            warn!("Dropping frame from replaced sidecar {}", conn_id);
            return;
        }

        match frame {
            BridgeFrame::Result {
                request_id,
                ok,
                data,
                error,
            } => self.complete(request_id, ok, data, error),
            other => match other.into_event() {
                Some(event) => self.emit(event).await,
                None => warn!("Unexpected frame from sidecar"),
            },
        }
    }

    /// Complete a pending command with the sidecar's reply
    pub fn complete(&self, request_id: Uuid, ok: bool, data: Option<Value>, error: Option<String>) {
        let Some((_, reply)) = self.pending.remove(&request_id) else {
            warn!("No pending command found for request {}", request_id);
            return;
        };

        let result = if ok {
            Ok(data)
        } else {
            Err(error.unwrap_or_else(|| "command failed".to_string()))
        };
        if reply.send(result).is_err() {
            debug!("Command {} was abandoned before its reply arrived", request_id);
        }
    }

    /// Pass a client notification to the session manager
    pub async fn emit(&self, event: ClientEvent) {
        let tx = self.events.read().clone();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!("Session event loop is gone, dropping client event");
                }
            }
            None => debug!("Client event before connect, dropped: {:?}", event),
        }
    }

    fn sidecar_tx(&self) -> Option<mpsc::Sender<BridgeFrame>> {
        self.sidecar.read().as_ref().map(|s| s.tx.clone())
    }

    /// Send a command frame and wait for its `result`
    async fn command(
        &self,
        make_frame: impl FnOnce(Uuid) -> BridgeFrame,
    ) -> Result<Option<Value>, SessionError> {
        let tx = self
            .sidecar_tx()
            .ok_or_else(|| SessionError::Transport("No automation sidecar attached".to_string()))?;

        let request_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id, reply_tx);

        if tx.send(make_frame(request_id)).await.is_err() {
            self.pending.remove(&request_id);
            return Err(SessionError::Transport(
                "Sidecar connection closed".to_string(),
            ));
        }

        match timeout(self.command_timeout, reply_rx).await {
            Ok(Ok(result)) => result.map_err(SessionError::Transport),
            Ok(Err(_)) => Err(SessionError::Transport(
                "Sidecar disconnected before replying".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(SessionError::Transport(format!(
                    "Timeout waiting for sidecar after {}s",
                    self.command_timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, events: mpsc::Sender<ClientEvent>) -> Result<(), SessionError> {
        *self.events.write() = Some(events);

        match self.sidecar_tx() {
            Some(tx) => tx
                .send(BridgeFrame::Initialize)
                .await
                .map_err(|_| SessionError::Transport("Sidecar connection closed".to_string())),
            None => {
                info!("Waiting for the automation sidecar to attach");
                Ok(())
            }
        }
    }

    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, SessionError> {
        let data = self
            .command(|request_id| BridgeFrame::SendMessage {
                request_id,
                to: chat_id.to_string(),
                body: body.to_string(),
            })
            .await?
            .ok_or_else(|| SessionError::Transport("Sidecar returned no message data".to_string()))?;

        serde_json::from_value(data)
            .map_err(|e| SessionError::Transport(format!("Invalid send result from sidecar: {}", e)))
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.command(|request_id| BridgeFrame::Logout { request_id })
            .await
            .map(|_| ())
    }
}

/// Run the bridge WebSocket server
pub async fn run_server(addr: SocketAddr, bridge: Arc<BridgeTransport>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/bridge", get(bridge_handler))
        .with_state(bridge);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Bridge server listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// WebSocket upgrade handler
async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(bridge): State<Arc<BridgeTransport>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, bridge, addr))
}

/// Handle one sidecar connection
async fn handle_socket(socket: WebSocket, bridge: Arc<BridgeTransport>, addr: SocketAddr) {
    debug!("New bridge connection from {}", addr);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Channel for outgoing frames
    let (tx, mut rx) = mpsc::channel::<BridgeFrame>(32);

    let mut conn_id: Option<Uuid> = None;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode bridge frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("Sidecar closed connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Bridge WebSocket error: {}", e);
                break;
            }
        };

        if bridge.debug_mode {
            debug!("Bridge frame: {}", text.as_str());
        }

        let frame = match serde_json::from_str::<BridgeFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to parse bridge frame: {}", e);
                continue;
            }
        };

        match frame {
            BridgeFrame::Auth { api_key } => {
                if !bridge.is_authorized(&api_key) {
                    warn!("Sidecar from {} presented an invalid API key", addr);
                    let _ = tx
                        .send(BridgeFrame::AuthResult {
                            success: false,
                            message: "Invalid API key".to_string(),
                        })
                        .await;
                    continue;
                }

                if conn_id.is_none() {
                    conn_id = Some(bridge.attach(addr, tx.clone()));
                }
                let _ = tx
                    .send(BridgeFrame::AuthResult {
                        success: true,
                        message: "Authenticated successfully".to_string(),
                    })
                    .await;

                // The session is already waiting for a client
                let connecting = bridge.events.read().is_some();
                if connecting {
                    let _ = tx.send(BridgeFrame::Initialize).await;
                }
            }
            BridgeFrame::Ping => {
                let _ = tx.send(BridgeFrame::Pong).await;
            }
            other => match conn_id {
                Some(id) => bridge.dispatch(id, other).await,
                None => warn!("Unauthenticated sidecar from {} sent a frame", addr),
            },
        }
    }

    if let Some(id) = conn_id {
        bridge.detach(id).await;
    }

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> BridgeTransport {
        BridgeTransport::new(Some("secret".to_string()), Duration::from_secs(1), false)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_api_key_check() {
        assert!(bridge().is_authorized("secret"));
        assert!(!bridge().is_authorized("wrong"));

        let open = BridgeTransport::new(None, Duration::from_secs(1), false);
        assert!(open.is_authorized("anything"));
    }

    #[tokio::test]
    async fn test_send_without_sidecar_fails() {
        let result = bridge().send_text("12345@c.us", "hi").await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_round_trip_through_sidecar() {
        let bridge = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        bridge.attach(addr(), tx);

        // Fake sidecar answering the command
        let responder = bridge.clone();
        tokio::spawn(async move {
            if let Some(BridgeFrame::SendMessage { request_id, to, .. }) = rx.recv().await {
                responder.complete(
                    request_id,
                    true,
                    Some(json!({"id": "3EB0ABC", "to": to, "timestamp": 1700000000})),
                    None,
                );
            }
        });

        let sent = bridge.send_text("999@c.us", "hey").await.unwrap();
        assert_eq!(sent.id, "3EB0ABC");
        assert_eq!(sent.to, "999@c.us");
    }

    #[tokio::test]
    async fn test_failed_command_carries_sidecar_error() {
        let bridge = bridge();
        let (tx, mut rx) = mpsc::channel(8);
        bridge.attach(addr(), tx);

        let responder = bridge.clone();
        tokio::spawn(async move {
            if let Some(BridgeFrame::Logout { request_id }) = rx.recv().await {
                responder.complete(request_id, false, None, Some("not logged in".to_string()));
            }
        });

        match bridge.logout().await {
            Err(SessionError::Transport(message)) => assert_eq!(message, "not logged in"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_times_out() {
        let bridge = bridge();
        let (tx, _rx) = mpsc::channel(8);
        bridge.attach(addr(), tx);

        let result = bridge.logout().await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(bridge.pending.is_empty());
    }

    #[tokio::test]
    async fn test_detach_reports_disconnect() {
        let bridge = bridge();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (tx, mut sidecar_rx) = mpsc::channel(8);
        let conn_id = bridge.attach(addr(), tx);

        bridge.connect(events_tx).await.unwrap();
        assert_eq!(sidecar_rx.recv().await, Some(BridgeFrame::Initialize));

        bridge.detach(conn_id).await;
        assert!(!bridge.is_attached());
        assert!(matches!(
            events_rx.recv().await,
            Some(ClientEvent::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_detach_keeps_new_sidecar() {
        let bridge = bridge();
        let (old_tx, _old_rx) = mpsc::channel(8);
        let (new_tx, _new_rx) = mpsc::channel(8);

        let old_id = bridge.attach(addr(), old_tx);
        bridge.attach(addr(), new_tx);
        bridge.detach(old_id).await;

        assert!(bridge.is_attached());
    }

    #[tokio::test]
    async fn test_replaced_sidecar_frames_are_dropped() {
        let bridge = bridge();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (old_tx, _old_rx) = mpsc::channel(8);
        let (new_tx, mut new_rx) = mpsc::channel(8);

        let old_id = bridge.attach(addr(), old_tx);
        bridge.connect(events_tx).await.unwrap();
        let new_id = bridge.attach(addr(), new_tx);
        assert!(!bridge.is_current(old_id));
        assert!(bridge.is_current(new_id));

        bridge
            .dispatch(
                old_id,
                BridgeFrame::Disconnected {
                    reason: "stale".to_string(),
                },
            )
            .await;
        assert!(events_rx.try_recv().is_err());

        // A stale result cannot complete a command issued to the new sidecar
        let responder = bridge.clone();
        tokio::spawn(async move {
            if let Some(BridgeFrame::Logout { request_id }) = new_rx.recv().await {
                responder
                    .dispatch(
                        old_id,
                        BridgeFrame::Result {
                            request_id,
                            ok: false,
                            data: None,
                            error: Some("stale".to_string()),
                        },
                    )
                    .await;
                responder
                    .dispatch(
                        new_id,
                        BridgeFrame::Result {
                            request_id,
                            ok: true,
                            data: None,
                            error: None,
                        },
                    )
                    .await;
            }
        });
        assert!(bridge.logout().await.is_ok());

        bridge
            .dispatch(new_id, BridgeFrame::Ready { self_id: None })
            .await;
        assert_eq!(
            events_rx.recv().await,
            Some(ClientEvent::Ready { self_id: None })
        );
    }
}

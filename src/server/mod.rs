//! WebSocket transport server.
//!
//! Accepts long-lived connections, parses inbound control messages,
//! dispatches them to the registry, and pushes serialized events back.
//! Each connection gets its own task and outbound queue; each subscription
//! gets a forwarder task draining the workflow's broadcast channel, so one
//! slow workflow never blocks another connection's traffic.

pub mod protocol;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::coordinator::WorkflowEvent;
use crate::registry::{WorkflowId, WorkflowRegistry};

// Re-export main types for convenience
pub use protocol::{ClientRequest, ServerEvent};

const OUTBOUND_QUEUE: usize = 64;

/// The WebSocket front door of the workflow registry.
pub struct TransportServer {
    registry: Arc<WorkflowRegistry>,
}

impl TransportServer {
    /// Build a server over the given registry.
    pub fn new(registry: Arc<WorkflowRegistry>) -> Self {
        Self { registry }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .with_context(|| "Failed to accept connection")?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                handle_connection(registry, stream, peer).await;
            });
        }
    }
}

/// Per-connection bookkeeping: the outbound queue plus one forwarder task
/// per subscribed workflow.
struct Connection {
    outbound: mpsc::Sender<ServerEvent>,
    subscriptions: HashSet<WorkflowId>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Connection {
    fn new(outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            outbound,
            subscriptions: HashSet::new(),
            forwarders: Vec::new(),
        }
    }

    async fn send(&self, event: ServerEvent) {
        // A failed send only means the connection is already gone.
        let _ = self.outbound.send(event).await;
    }

    fn track(&mut self, id: WorkflowId, receiver: broadcast::Receiver<WorkflowEvent>) {
        if self.subscriptions.insert(id) {
            let outbound = self.outbound.clone();
            self.forwarders
                .push(tokio::spawn(forward_events(receiver, outbound)));
        }
    }

    fn shutdown(self) {
        for forwarder in self.forwarders {
            forwarder.abort();
        }
    }
}

async fn handle_connection(registry: Arc<WorkflowRegistry>, stream: TcpStream, peer: SocketAddr) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    tracing::info!(%peer, "client connected");

    let (mut sink, mut inbound) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "event serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(outbound_tx);
    connection
        .send(ServerEvent::Hello {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            active_workflows: registry.len().await,
        })
        .await;

    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "websocket receive error");
                break;
            }
        };

        match ClientRequest::parse(&text) {
            Ok(request) => dispatch(&registry, &mut connection, request).await,
            Err(e) => {
                connection
                    .send(ServerEvent::error(None, format!("malformed request: {}", e)))
                    .await;
            }
        }
    }

    connection.shutdown();
    writer.abort();
    tracing::info!(%peer, "client disconnected");
}

async fn dispatch(
    registry: &Arc<WorkflowRegistry>,
    connection: &mut Connection,
    request: ClientRequest,
) {
    match request {
        ClientRequest::StartWorkflow { task, workflow_id } => {
            match registry.start(&task, workflow_id).await {
                // The receiver was opened before the coordinator spawned, so
                // the forwarder replays the first RUNNING status to the
                // client as the start acknowledgement.
                Ok((id, receiver)) => connection.track(id, receiver),
                Err(e) => {
                    connection.send(ServerEvent::error(None, e.to_string())).await;
                }
            }
        }
        ClientRequest::CancelWorkflow { workflow_id } => {
            let id = WorkflowId::from(workflow_id);
            match registry.cancel(&id).await {
                Ok(status) if status.is_terminal() => {
                    // Already settled; report the prior terminal status.
                    connection
                        .send(ServerEvent::Status {
                            workflow_id: id.to_string(),
                            status,
                            active_agent: None,
                        })
                        .await;
                }
                Ok(_) => {
                    // The CANCELLED status arrives through the event stream
                    // once the cancellation is honored.
                    subscribe(registry, connection, id).await;
                }
                Err(e) => {
                    connection
                        .send(ServerEvent::error(Some(id.to_string()), e.to_string()))
                        .await;
                }
            }
        }
        ClientRequest::GetWorkflowResults { workflow_id } => {
            let id = WorkflowId::from(workflow_id);
            match registry.snapshot(&id).await {
                Ok(state) => {
                    connection
                        .send(ServerEvent::WorkflowResults {
                            workflow_id: id.to_string(),
                            state: Box::new(state),
                        })
                        .await;
                }
                Err(e) => {
                    connection
                        .send(ServerEvent::error(Some(id.to_string()), e.to_string()))
                        .await;
                }
            }
        }
        ClientRequest::Subscribe { workflow_id } => {
            let id = WorkflowId::from(workflow_id);
            subscribe(registry, connection, id).await;
        }
    }
}

/// Attach the connection to a workflow's event stream.
///
/// Replay policy is latest-snapshot-only: the subscriber gets one status
/// event reflecting the current snapshot, then live events.
async fn subscribe(registry: &Arc<WorkflowRegistry>, connection: &mut Connection, id: WorkflowId) {
    match registry.subscribe(&id).await {
        Ok((state, receiver)) => {
            connection
                .send(ServerEvent::Status {
                    workflow_id: id.to_string(),
                    status: state.status,
                    active_agent: state.active_agent,
                })
                .await;
            connection.track(id, receiver);
        }
        Err(e) => {
            connection
                .send(ServerEvent::error(Some(id.to_string()), e.to_string()))
                .await;
        }
    }
}

async fn forward_events(
    mut receiver: broadcast::Receiver<WorkflowEvent>,
    outbound: mpsc::Sender<ServerEvent>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if outbound.send(ServerEvent::from_workflow(event)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "subscriber lagged behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

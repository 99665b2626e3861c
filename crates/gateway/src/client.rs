//! Caller-facing handle onto a dispatch server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use proto::{
    CallToolRequest, CallToolResult, ClientError, Frame, PeerInfo, Reply, Request, ResponseBody,
    RpcError, ToolDefinition,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::DispatchServer;
use crate::transport::{ChannelEnd, DEFAULT_BUFFER, linked_pair};

enum ClientState {
    Idle,
    Handshaking,
    Connected(Connection),
    Closed,
}

struct Connection {
    tx: mpsc::Sender<Frame>,
    reader: JoinHandle<()>,
    server: PeerInfo,
}

/// Replies awaited by in-flight requests, keyed by frame id.
#[derive(Default)]
struct Pending {
    waiters: DashMap<u64, oneshot::Sender<Reply>>,
    open: AtomicBool,
}

impl Pending {
    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.waiters.clear();
    }
}

/// Dispatch client.
///
/// Calls may be issued concurrently from several tasks; each reply is routed
/// back to its caller by frame id.
pub struct DispatchClient {
    info: PeerInfo,
    state: Mutex<ClientState>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
}

impl DispatchClient {
    pub fn new(info: PeerInfo) -> Self {
        Self {
            info,
            state: Mutex::new(ClientState::Idle),
            pending: Arc::new(Pending::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connects to an in-process server over a linked channel pair.
    pub async fn connect(&self, server: &DispatchServer) -> Result<PeerInfo, ClientError> {
        let (client_end, server_end) = linked_pair(DEFAULT_BUFFER);
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(server_end).await {
                warn!("In-process dispatch flow ended with error: {e}");
            }
        });
        self.connect_channel(client_end).await
    }

    /// Attaches to a server over `channel` and performs the handshake.
    ///
    /// Returns once both ends are attached; the server's name/version is
    /// returned and kept for [`DispatchClient::server_info`].
    pub async fn connect_channel(&self, channel: ChannelEnd) -> Result<PeerInfo, ClientError> {
        {
            let mut state = self.state.lock();
            match *state {
                ClientState::Idle => *state = ClientState::Handshaking,
                ClientState::Closed => return Err(ClientError::Closed),
                ClientState::Handshaking | ClientState::Connected(_) => {
                    return Err(ClientError::AlreadyConnected);
                }
            }
        }

        let (tx, rx) = channel.split();
        self.pending.open.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(route_replies(rx, self.pending.clone()));

        let handshake = self
            .request_on(
                &tx,
                Request::Initialize {
                    client: self.info.clone(),
                },
            )
            .await
            .and_then(|body| match body {
                ResponseBody::Initialized { server } => Ok(server),
                other => Err(unexpected(&other)),
            });

        let mut state = self.state.lock();
        match handshake {
            Ok(server) if matches!(*state, ClientState::Handshaking) => {
                info!(server = %server.name, version = %server.version, "Connected to dispatch server");
                *state = ClientState::Connected(Connection {
                    tx,
                    reader,
                    server: server.clone(),
                });
                Ok(server)
            }
            Ok(_) => {
                // closed while the handshake was in flight
                reader.abort();
                Err(ClientError::Closed)
            }
            Err(e) => {
                reader.abort();
                self.pending.shut();
                if matches!(*state, ClientState::Handshaking) {
                    *state = ClientState::Idle;
                }
                Err(e)
            }
        }
    }

    /// Whether the handshake has completed and the client is not closed.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ClientState::Connected(_))
    }

    /// Server name/version from the handshake.
    pub fn server_info(&self) -> Option<PeerInfo> {
        match &*self.state.lock() {
            ClientState::Connected(conn) => Some(conn.server.clone()),
            _ => None,
        }
    }

    /// Lists the server's tools in registry order.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        match self.request(Request::ListTools).await? {
            ResponseBody::Tools { tools } => Ok(tools),
            other => Err(unexpected(&other)),
        }
    }

    /// Invokes `name` with raw JSON arguments.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, ClientError> {
        self.call(CallToolRequest::new(name, arguments)).await
    }

    /// Invokes a tool with a fully formed request (e.g. carrying a call id).
    pub async fn call(&self, request: CallToolRequest) -> Result<CallToolResult, ClientError> {
        match self.request(Request::CallTool(request)).await? {
            ResponseBody::ToolResult(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    /// Releases the channel. Every later call fails with
    /// [`ClientError::Closed`], and calls still awaiting a reply are woken
    /// with the same error.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ClientState::Closed);
        if let ClientState::Connected(conn) = previous {
            conn.reader.abort();
            info!(server = %conn.server.name, "Dispatch client closed");
        }
        self.pending.shut();
    }

    fn sender(&self) -> Result<mpsc::Sender<Frame>, ClientError> {
        match &*self.state.lock() {
            ClientState::Connected(conn) => Ok(conn.tx.clone()),
            ClientState::Idle | ClientState::Handshaking => Err(ClientError::NotConnected),
            ClientState::Closed => Err(ClientError::Closed),
        }
    }

    async fn request(&self, request: Request) -> Result<ResponseBody, ClientError> {
        let tx = self.sender()?;
        self.request_on(&tx, request).await
    }

    async fn request_on(
        &self,
        tx: &mpsc::Sender<Frame>,
        request: Request,
    ) -> Result<ResponseBody, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.waiters.insert(id, reply_tx);
        if !self.pending.open.load(Ordering::SeqCst) {
            self.pending.waiters.remove(&id);
            return Err(ClientError::Closed);
        }

        if tx.send(Frame::Request { id, request }).await.is_err() {
            self.pending.waiters.remove(&id);
            return Err(ClientError::Closed);
        }
        debug!(id, "Request sent");

        let reply = reply_rx.await.map_err(|_| ClientError::Closed)?;
        Result::<ResponseBody, RpcError>::from(reply).map_err(ClientError::from)
    }
}

async fn route_replies(mut rx: mpsc::Receiver<Frame>, pending: Arc<Pending>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Response { id, reply } => match pending.waiters.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(reply);
                }
                None => warn!(id, "Dropping reply for unknown request"),
            },
            Frame::Request { id, .. } => {
                warn!(id, "Ignoring request frame sent to client");
            }
        }
    }
    debug!("Dispatch channel closed by server");
    pending.shut();
}

fn unexpected(body: &ResponseBody) -> ClientError {
    ClientError::UnexpectedResponse(format!("{body:?}"))
}

//! Tool dispatch server: validates calls and drives the bound sandbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use proto::{
    CallToolRequest, CallToolResult, DispatchError, Frame, GatewayError, InvocationUpdate,
    PeerInfo, Request, ResponseBody, RpcError, ToolDefinition, TransportError,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tools::{Sandbox, ToolKind};
use tracing::{debug, error, info, warn};

use crate::transport::{ChannelEnd, DEFAULT_BUFFER, framed};

/// Tool dispatch server.
///
/// Cheap to clone; clones share the bound sandbox and event subscriber.
#[derive(Clone)]
pub struct DispatchServer {
    inner: Arc<Inner>,
}

struct Inner {
    info: PeerInfo,
    sandbox: RwLock<Option<Arc<dyn Sandbox>>>,
    in_flight: AtomicUsize,
    events: RwLock<Option<mpsc::Sender<InvocationUpdate>>>,
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DispatchServer {
    /// Creates a server with no sandbox bound. Every call fails until
    /// [`DispatchServer::bind_sandbox`] succeeds.
    pub fn new(info: PeerInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                info,
                sandbox: RwLock::new(None),
                in_flight: AtomicUsize::new(0),
                events: RwLock::new(None),
            }),
        }
    }

    /// Server name/version announced during the handshake.
    pub fn info(&self) -> &PeerInfo {
        &self.inner.info
    }

    /// Binds the sandbox that all calls dispatch to.
    ///
    /// Replacing a sandbox while calls are outstanding is refused.
    pub fn bind_sandbox(&self, sandbox: Arc<dyn Sandbox>) -> Result<(), GatewayError> {
        let mut slot = self.inner.sandbox.write();
        let in_flight = self.inner.in_flight.load(Ordering::SeqCst);
        if slot.is_some() && in_flight > 0 {
            warn!(in_flight, "Refusing to rebind sandbox with calls outstanding");
            return Err(GatewayError::SandboxBusy { in_flight });
        }
        *slot = Some(sandbox);
        info!("Desktop sandbox bound to {}", self.inner.info.name);
        Ok(())
    }

    /// Whether a sandbox is bound.
    pub fn is_bound(&self) -> bool {
        self.inner.sandbox.read().is_some()
    }

    /// Number of calls currently dispatching.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Streams lifecycle updates for every dispatched call.
    ///
    /// Replaces any previous subscriber. Updates arrive in emission order:
    /// `call` before dispatch, then one `result` carrying the payload or the
    /// failure. Dispatch never waits on the subscriber; updates that do not
    /// fit in `buffer` are dropped.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<InvocationUpdate> {
        let (tx, rx) = mpsc::channel(buffer);
        *self.inner.events.write() = Some(tx);
        rx
    }

    /// Tool listing, in registry order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        tools::describe()
            .into_iter()
            .map(|schema| schema.definition())
            .collect()
    }

    /// Validates and dispatches one tool call.
    ///
    /// Nothing reaches the sandbox unless the sandbox is bound, the tool is
    /// known and the arguments validate.
    pub async fn call_tool(
        &self,
        request: CallToolRequest,
    ) -> Result<CallToolResult, DispatchError> {
        let (sandbox, _guard) = self.acquire_sandbox()?;

        let kind = ToolKind::from_name(&request.name)
            .ok_or_else(|| DispatchError::UnknownTool(request.name.clone()))?;
        let args = kind.validate(&request.arguments)?;

        let call_id = request.call_id.unwrap_or_default();
        debug!(%call_id, tool = kind.name(), "Dispatching tool call");
        self.emit(InvocationUpdate::call(
            call_id.clone(),
            kind.name(),
            request.arguments.clone(),
        ));

        let payload = match args.dispatch(sandbox.as_ref()).await {
            Ok(payload) => payload,
            Err(e) => {
                let err = DispatchError::Capability(e);
                self.emit(InvocationUpdate::failed(
                    call_id,
                    kind.name(),
                    request.arguments,
                    err.to_rpc(),
                ));
                return Err(err);
            }
        };
        let result = CallToolResult::from(&payload);

        self.emit(InvocationUpdate::completed(
            call_id,
            kind.name(),
            request.arguments,
            payload,
        ));
        Ok(result)
    }

    /// Answers one request.
    pub async fn handle(&self, request: Request) -> Result<ResponseBody, RpcError> {
        match request {
            Request::Initialize { client } => {
                info!(client = %client.name, version = %client.version, "Client initialized");
                Ok(ResponseBody::Initialized {
                    server: self.inner.info.clone(),
                })
            }
            Request::ListTools => Ok(ResponseBody::Tools {
                tools: self.list_tools(),
            }),
            Request::CallTool(call) => {
                let name = call.name.clone();
                self.call_tool(call)
                    .await
                    .map(ResponseBody::ToolResult)
                    .map_err(|e| {
                        warn!(tool = %name, "Tool call failed: {e}");
                        e.to_rpc()
                    })
            }
        }
    }

    /// Serves one channel until the peer goes away.
    ///
    /// Requests are answered one at a time in arrival order.
    pub async fn serve(&self, channel: ChannelEnd) -> Result<(), GatewayError> {
        let (tx, mut rx) = channel.split();
        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Request { id, request } => {
                    let reply = self.handle(request).await.into();
                    tx.send(Frame::Response { id, reply })
                        .await
                        .map_err(|_| TransportError::Closed)?;
                }
                Frame::Response { id, .. } => {
                    warn!(id, "Ignoring response frame sent to server");
                }
            }
        }
        debug!("Dispatch channel closed by client");
        Ok(())
    }

    /// Accept loop: one serving task per TCP connection.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        info!("Dispatch server listening on {local}");
        loop {
            let (stream, remote) = listener
                .accept()
                .await
                .map_err(|e| GatewayError::Connection(e.to_string()))?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {remote}: {e}");
            }
            info!("New connection from {remote}");
            let server = self.clone();
            tokio::spawn(async move {
                match server.serve(framed(stream, DEFAULT_BUFFER)).await {
                    Ok(()) => info!("Connection from {remote} closed"),
                    Err(e) => error!("Connection error from {remote}: {e}"),
                }
            });
        }
    }

    fn acquire_sandbox(&self) -> Result<(Arc<dyn Sandbox>, InFlight<'_>), DispatchError> {
        let slot = self.inner.sandbox.read();
        let sandbox = slot.clone().ok_or(DispatchError::NotInitialized)?;
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok((sandbox, InFlight(&self.inner.in_flight)))
    }

    /// Never waits on the subscriber; a full buffer drops the update.
    fn emit(&self, update: InvocationUpdate) {
        let events = self.inner.events.read();
        let Some(tx) = events.as_ref() else {
            return;
        };
        match tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                warn!(call_id = %update.call_id, "Invocation update dropped; subscriber is behind");
            }
            Err(TrySendError::Closed(_)) => debug!("Invocation update subscriber dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proto::{CallId, ErrorCode, InvocationPhase};
    use serde_json::json;
    use tools::{CommandOutput, RecordingSandbox, SandboxCall};

    use super::*;

    fn server() -> DispatchServer {
        DispatchServer::new(PeerInfo::new("desktop-server", "1.0.0"))
    }

    fn bound(sandbox: Arc<RecordingSandbox>) -> DispatchServer {
        let server = server();
        server.bind_sandbox(sandbox).expect("bind");
        server
    }

    #[tokio::test]
    async fn calls_before_binding_fail_with_internal_error() {
        let server = server();
        assert!(!server.is_bound());
        let err = server
            .call_tool(CallToolRequest::new("bash_command", json!({"command": "ls"})))
            .await
            .expect_err("no sandbox");
        assert!(matches!(err, DispatchError::NotInitialized));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn listing_is_available_without_a_sandbox() {
        let names: Vec<String> = server().list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["computer_use", "bash_command"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let sandbox = Arc::new(RecordingSandbox::new());
        let err = bound(sandbox.clone())
            .call_tool(CallToolRequest::new("browser", json!({})))
            .await
            .expect_err("unknown");
        assert_eq!(err.code(), ErrorCode::MethodNotFound);
        assert!(sandbox.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_params_issue_no_sandbox_calls() {
        let sandbox = Arc::new(RecordingSandbox::new());
        let server = bound(sandbox.clone());
        for args in [
            json!({"action": "left_click"}),
            json!({"action": "left_click_drag", "coordinate": [1, 2]}),
            json!({"action": "type"}),
            json!({"action": "scroll"}),
            json!({"action": "teleport"}),
            json!("left_click"),
        ] {
            let err = server
                .call_tool(CallToolRequest::new("computer_use", args.clone()))
                .await
                .expect_err("invalid");
            assert_eq!(err.code(), ErrorCode::InvalidParams, "args: {args}");
        }
        assert!(sandbox.calls().is_empty());
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn left_click_dispatches_in_order() {
        let sandbox = Arc::new(RecordingSandbox::new());
        let result = bound(sandbox.clone())
            .call_tool(CallToolRequest::new(
                "computer_use",
                json!({"action": "left_click", "coordinate": [100, 200]}),
            ))
            .await
            .expect("click");
        assert_eq!(result.first_text(), Some("Left clicked at 100, 200"));
        assert_eq!(
            sandbox.calls(),
            vec![
                SandboxCall::MoveMouse(tools::Point::new(100.0, 200.0)),
                SandboxCall::LeftClick
            ]
        );
    }

    #[tokio::test]
    async fn capability_failure_becomes_internal_error() {
        let sandbox = Arc::new(RecordingSandbox::new().failing_on("capture"));
        let err = bound(sandbox)
            .call_tool(CallToolRequest::new(
                "computer_use",
                json!({"action": "screenshot"}),
            ))
            .await
            .expect_err("capture fails");
        assert!(matches!(err, DispatchError::Capability(_)));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn bash_command_returns_stdout() {
        let sandbox = Arc::new(
            RecordingSandbox::new().with_command_output(CommandOutput::new("hi\n", "")),
        );
        let result = bound(sandbox)
            .call_tool(CallToolRequest::new(
                "bash_command",
                json!({"command": "echo hi"}),
            ))
            .await
            .expect("bash");
        assert_eq!(result.first_text(), Some("hi\n"));
    }

    #[tokio::test]
    async fn subscriber_sees_call_then_result() {
        let sandbox = Arc::new(RecordingSandbox::new());
        let server = bound(sandbox);
        let mut updates = server.subscribe(8);

        server
            .call_tool(
                CallToolRequest::new("computer_use", json!({"action": "mouse_move", "coordinate": [1, 2]}))
                    .with_call_id(CallId::from("c-1")),
            )
            .await
            .expect("move");

        let first = updates.recv().await.expect("call update");
        assert_eq!(first.call_id, CallId::from("c-1"));
        assert!(matches!(first.phase, InvocationPhase::Call { .. }));
        let second = updates.recv().await.expect("result update");
        assert!(matches!(second.phase, InvocationPhase::Result { .. }));
    }

    #[tokio::test]
    async fn capability_failure_emits_a_failed_result() {
        let sandbox = Arc::new(RecordingSandbox::new().failing_on("left_click"));
        let server = bound(sandbox);
        let mut updates = server.subscribe(8);

        let err = server
            .call_tool(
                CallToolRequest::new("computer_use", json!({"action": "left_click", "coordinate": [3, 4]}))
                    .with_call_id(CallId::from("c-fail")),
            )
            .await
            .expect_err("click fails");
        assert!(matches!(err, DispatchError::Capability(_)));

        let first = updates.recv().await.expect("call update");
        assert!(matches!(first.phase, InvocationPhase::Call { .. }));
        let second = updates.recv().await.expect("result update");
        assert_eq!(second.call_id, CallId::from("c-fail"));
        match second.phase {
            InvocationPhase::Result { outcome, .. } => {
                assert_eq!(outcome.error(), Some(&err.to_rpc()));
                assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::InternalError));
            }
            other => panic!("unexpected phase: {other:?}"),
        }
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn full_subscriber_buffer_does_not_stall_dispatch() {
        let server = bound(Arc::new(RecordingSandbox::new()));
        let mut updates = server.subscribe(1);

        for id in ["c-1", "c-2"] {
            let call = server.call_tool(
                CallToolRequest::new("computer_use", json!({"action": "mouse_move", "coordinate": [1, 2]}))
                    .with_call_id(CallId::from(id)),
            );
            tokio::time::timeout(std::time::Duration::from_secs(3), call)
                .await
                .expect("dispatch must not wait on the subscriber")
                .expect("move");
        }

        let first = updates.recv().await.expect("buffered update");
        assert_eq!(first.call_id, CallId::from("c-1"));
        assert!(matches!(first.phase, InvocationPhase::Call { .. }));
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_validation_emits_nothing() {
        let server = bound(Arc::new(RecordingSandbox::new()));
        let mut updates = server.subscribe(8);
        let _ = server
            .call_tool(CallToolRequest::new("computer_use", json!({"action": "key"})))
            .await;
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn rebinding_is_refused_while_a_call_is_outstanding() {
        let server = bound(Arc::new(RecordingSandbox::new()));
        let (_sandbox, guard) = server.acquire_sandbox().expect("bound");
        let err = server
            .bind_sandbox(Arc::new(RecordingSandbox::new()))
            .expect_err("busy");
        assert!(matches!(err, GatewayError::SandboxBusy { in_flight: 1 }));

        drop(guard);
        server
            .bind_sandbox(Arc::new(RecordingSandbox::new()))
            .expect("idle rebind is allowed");
    }

    #[tokio::test]
    async fn handle_maps_errors_to_rpc_codes() {
        let server = bound(Arc::new(RecordingSandbox::new()));
        let err = server
            .handle(Request::CallTool(CallToolRequest::new("nope", json!({}))))
            .await
            .expect_err("unknown");
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert_eq!(err.message, "Unknown tool: nope");

        let init = server
            .handle(Request::Initialize {
                client: PeerInfo::new("c", "0"),
            })
            .await
            .expect("init");
        assert_eq!(
            init,
            ResponseBody::Initialized {
                server: PeerInfo::new("desktop-server", "1.0.0")
            }
        );
    }
}

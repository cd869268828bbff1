//! Bridge service core logic.
//!
//! Accepts browser-side connections, runs the JSON control channel on
//! each one, and streams a remote session through the core pipeline
//! once a `connect` request passes the security policy and the
//! session registry.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use gfxwire_core::{
    ChannelSink, ClientMessage, ConnectRequest, Frame, ServerMessage, SessionError, SessionHandle,
    StreamConfig, StreamingSupervisor, TcpTransport, TransportSink,
};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::{SessionPermit, SessionRegistry};
use crate::security::SecurityPolicy;

/// Close reason sent when the browser asks to disconnect.
const CLIENT_DISCONNECT_REASON: &str = "Client disconnected";

/// Close reason sent to live connections on shutdown.
const SHUTDOWN_REASON: &str = "Server shutting down";

// ── SessionConnector ─────────────────────────────────────────────

/// Opens remote sessions on behalf of the bridge.
///
/// The session engine lives outside this crate; embedders supply it
/// through this trait.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    async fn connect(&self, request: &ConnectRequest)
    -> Result<Arc<dyn SessionHandle>, SessionError>;
}

/// Connector used when no session engine is linked in. Every attempt
/// is refused, so clients get an `error` reply instead of a hang.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

#[async_trait]
impl SessionConnector for UnavailableConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<Arc<dyn SessionHandle>, SessionError> {
        warn!(host = %request.host, "connect refused: no session engine available");
        Err(SessionError::Fatal(
            "no session engine is available on this bridge".into(),
        ))
    }
}

// ── BridgeServer ─────────────────────────────────────────────────

/// The top-level bridge service.
///
/// Owns the listener, the shared security policy and session registry,
/// and one task per browser connection.
pub struct BridgeServer {
    config: BridgeConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

/// State every connection task reads.
struct Shared {
    policy: Arc<SecurityPolicy>,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn SessionConnector>,
    stream: StreamConfig,
}

impl BridgeServer {
    /// Build the service; the security policy file, if configured, is
    /// read once here.
    pub fn new(config: BridgeConfig, connector: Arc<dyn SessionConnector>) -> Self {
        let policy = config
            .policy_path()
            .map(|path| SecurityPolicy::load_from_file(&path))
            .unwrap_or_default();
        if !policy.has_rules() {
            warn!("no security policy rules; every destination is allowed");
        }
        Self::with_policy(config, connector, policy)
    }

    pub fn with_policy(
        config: BridgeConfig,
        connector: Arc<dyn SessionConnector>,
        policy: SecurityPolicy,
    ) -> Self {
        let shared = Arc::new(Shared {
            policy: Arc::new(policy),
            registry: SessionRegistry::new(config.sessions.max_sessions),
            connector,
            stream: config.to_stream_config(),
        });
        Self {
            config,
            shared,
            cancel: CancellationToken::new(),
        }
    }

    /// Obtain a handle that stops the service from another task.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.shared.policy
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(&self.config.network.listen_address).await?;
        info!("bridge listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on `listener` until the shutdown handle fires,
    /// then wait for every connection task to wind down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BridgeError> {
        let mut connections = JoinSet::new();

        loop {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = self.cancel.cancelled() => break,
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = done {
                        error!("connection task panicked: {e}");
                    }
                    continue;
                }
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let transport = match TcpTransport::new(stream, self.config.network.max_frame_size) {
                Ok(t) => t,
                Err(e) => {
                    warn!(%peer, "cannot set up transport: {e}");
                    continue;
                }
            };

            info!(%peer, "client connected");
            let shared = Arc::clone(&self.shared);
            let cancel = self.cancel.child_token();
            connections.spawn(async move {
                let (sink, inbound) = transport.into_parts();
                let mut conn = Connection {
                    shared,
                    peer,
                    sink,
                    active: None,
                };
                if let Err(e) = conn.run(inbound, cancel).await {
                    warn!(%peer, "connection error: {e}");
                }
                conn.cleanup().await;
                info!(%peer, "client disconnected");
            });
        }

        info!(open = connections.len(), "bridge stopping");
        while let Some(done) = connections.join_next().await {
            if let Err(e) = done {
                error!("connection task panicked: {e}");
            }
        }
        info!("bridge stopped");
        Ok(())
    }
}

// ── Connection ───────────────────────────────────────────────────

/// A session streaming on one connection, plus its registry slot.
struct ActiveSession {
    supervisor: StreamingSupervisor,
    _permit: SessionPermit,
}

/// What woke the connection loop.
enum Step {
    Shutdown,
    Failed(String),
    Inbound(Option<Frame>),
}

/// Whether the connection loop keeps going after a control message.
enum Next {
    Continue,
    Close,
}

struct Connection {
    shared: Arc<Shared>,
    peer: SocketAddr,
    sink: Arc<ChannelSink>,
    active: Option<ActiveSession>,
}

impl Connection {
    async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) -> Result<(), BridgeError> {
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Shutdown,
                Some(reason) = next_failure(&mut self.active) => Step::Failed(reason),
                frame = inbound.recv() => Step::Inbound(frame),
            };

            match step {
                Step::Shutdown => {
                    match self.active.take() {
                        Some(active) => active.supervisor.fail(SHUTDOWN_REASON).await?,
                        None => self.sink.close(SHUTDOWN_REASON).await?,
                    }
                    return Ok(());
                }
                Step::Failed(reason) => {
                    // The supervisor sends the notice and closes the transport.
                    if let Some(active) = self.active.take() {
                        active.supervisor.fail(&reason).await?;
                    }
                    return Ok(());
                }
                Step::Inbound(None) | Step::Inbound(Some(Frame::Close(_))) => return Ok(()),
                Step::Inbound(Some(Frame::Binary(data))) => match self.active.as_mut() {
                    Some(active) => {
                        active.supervisor.handle_inbound(&data);
                    }
                    None => debug!(peer = %self.peer, len = data.len(), "binary message before connect"),
                },
                Step::Inbound(Some(Frame::Text(text))) => {
                    if let Next::Close = self.on_control(&text).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn on_control(&mut self, text: &str) -> Result<Next, BridgeError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %self.peer, "invalid control message: {e}");
                return Ok(Next::Continue);
            }
        };
        let kind = message.kind();
        trace!(peer = %self.peer, kind, "control message");

        match message {
            ClientMessage::Connect(request) => match self.open(request).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(peer = %self.peer, "connect failed: {e}");
                    self.reply(ServerMessage::error(e.to_string())).await?;
                }
                Err(e) => return Err(e),
            },
            ClientMessage::Disconnect => {
                if let Some(active) = self.active.take() {
                    active.supervisor.stop().await;
                }
                self.reply(ServerMessage::Disconnected { reason: None }).await?;
                self.sink.close(CLIENT_DISCONNECT_REASON).await?;
                return Ok(Next::Close);
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong).await?,
            ClientMessage::Resize { width, height } => {
                info!(peer = %self.peer, width, height, "resize requested");
            }
            ClientMessage::Mouse(_) | ClientMessage::Key(_) | ClientMessage::Keycombo { .. } => {
                if self.active.is_none() {
                    debug!(peer = %self.peer, kind, "input before connect");
                }
            }
        }
        Ok(Next::Continue)
    }

    /// Policy, then capacity, then the engine. Only a fully opened
    /// session claims the connection.
    async fn open(&mut self, request: ConnectRequest) -> Result<(), BridgeError> {
        if self.active.is_some() {
            return Err(BridgeError::AlreadyConnected);
        }

        let verdict = self.shared.policy.validate(&request.host, request.port);
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or_else(|| {
                format!("Connection to {}:{} blocked by security policy", request.host, request.port)
            });
            return Err(BridgeError::DestinationDenied(reason));
        }

        let destination = format!("{}:{}", request.host, request.port);
        let permit = self.shared.registry.try_register(self.peer, destination)?;
        let session = self.shared.connector.connect(&request).await?;

        let connected = ServerMessage::Connected {
            width: request.width,
            height: request.height,
        };
        if let Err(e) = self.reply(connected).await {
            // No supervisor owns the session yet.
            session.disconnect();
            return Err(e);
        }

        let sink: Arc<dyn TransportSink> = self.sink.clone();
        let supervisor = StreamingSupervisor::start(session, sink, self.shared.stream.clone());
        info!(
            peer = %self.peer,
            host = %request.host,
            port = request.port,
            session = permit.id(),
            "session started"
        );
        self.active = Some(ActiveSession {
            supervisor,
            _permit: permit,
        });
        Ok(())
    }

    async fn reply(&self, message: ServerMessage) -> Result<(), BridgeError> {
        self.sink.send_text(message.to_json()?).await?;
        Ok(())
    }

    /// Release whatever session is still held when the loop ends.
    async fn cleanup(&mut self) {
        if let Some(active) = self.active.take() {
            active.supervisor.stop().await;
        }
    }
}

/// Next failure from the active session; pending while there is none.
async fn next_failure(active: &mut Option<ActiveSession>) -> Option<String> {
    match active {
        Some(active) => active.supervisor.wait_failure().await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use gfxwire_core::codec::DEFAULT_MAX_FRAME_SIZE;
    use gfxwire_core::{Event, MemorySession, WireMessage};
    use parking_lot::Mutex;

    use crate::registry::MaxSessions;
    use crate::security::PolicyRules;

    /// Hands out prepared sessions in order; refuses once they run out.
    #[derive(Default)]
    struct ScriptedConnector {
        sessions: Mutex<Vec<Arc<MemorySession>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn with(sessions: Vec<Arc<MemorySession>>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into_iter().rev().collect()),
                requests: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl SessionConnector for ScriptedConnector {
        async fn connect(
            &self,
            request: &ConnectRequest,
        ) -> Result<Arc<dyn SessionHandle>, SessionError> {
            self.requests.lock().push(request.host.clone());
            match self.sessions.lock().pop() {
                Some(session) => Ok(session as Arc<dyn SessionHandle>),
                None => Err(SessionError::Fatal("no route to host".into())),
            }
        }
    }

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.network.listen_address = "127.0.0.1:0".into();
        config.sessions.max_sessions = MaxSessions::new(2);
        config.audio.enabled = false;
        config
    }

    /// Start a server on an ephemeral port; returns its address, the
    /// shutdown handle and the serve task.
    async fn spawn_server(
        server: BridgeServer,
    ) -> (
        SocketAddr,
        Arc<BridgeServer>,
        tokio::task::JoinHandle<Result<(), BridgeError>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server);
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener).await }
        });
        (addr, server, task)
    }

    async fn client(addr: SocketAddr) -> TcpTransport {
        TcpTransport::connect(addr, DEFAULT_MAX_FRAME_SIZE).await.unwrap()
    }

    async fn send(conn: &TcpTransport, text: &str) {
        conn.sink().send_text(text.to_string()).await.unwrap();
    }

    async fn recv(conn: &mut TcpTransport) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), conn.recv())
            .await
            .expect("timeout")
            .expect("connection closed")
    }

    async fn recv_control(conn: &mut TcpTransport) -> ServerMessage {
        match recv(conn).await {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a control message, got {other:?}"),
        }
    }

    fn connect_json(host: &str) -> String {
        format!(r#"{{"type":"connect","host":"{host}","username":"u","password":"p","width":800,"height":600}}"#)
    }

    #[tokio::test]
    async fn unavailable_connector_refuses() {
        let request: ConnectRequest =
            serde_json::from_str(r#"{"host":"h","username":"u","password":"p"}"#).unwrap();
        let result = UnavailableConnector.connect(&request).await;
        assert!(matches!(result, Err(SessionError::Fatal(_))));
    }

    #[tokio::test]
    async fn connect_streams_then_disconnects() {
        let session = Arc::new(MemorySession::new());
        session.push_events([
            Event::StartFrame { frame_id: 1 },
            Event::EndFrame { frame_id: 1 },
        ]);
        let connector = ScriptedConnector::with(vec![session.clone()]);
        let (addr, server, task) =
            spawn_server(BridgeServer::new(test_config(), connector.clone())).await;

        let mut browser = client(addr).await;
        send(&browser, r#"{"type":"ping"}"#).await;
        assert_eq!(recv_control(&mut browser).await, ServerMessage::Pong);

        send(&browser, &connect_json("vm1.lab")).await;
        assert_eq!(
            recv_control(&mut browser).await,
            ServerMessage::Connected {
                width: 800,
                height: 600
            }
        );
        let mut names = Vec::new();
        for _ in 0..2 {
            let Frame::Binary(bytes) = recv(&mut browser).await else {
                panic!("expected a wire message");
            };
            names.push(WireMessage::decode(&bytes).unwrap().message_type().name());
        }
        assert_eq!(names, ["StartFrame", "EndFrame"]);
        assert_eq!(server.registry().active(), 1);

        send(&browser, r#"{"type":"disconnect"}"#).await;
        assert_eq!(
            recv_control(&mut browser).await,
            ServerMessage::Disconnected { reason: None }
        );
        assert!(matches!(recv(&mut browser).await, Frame::Close(r) if r == CLIENT_DISCONNECT_REASON));
        assert_eq!(session.disconnect_count(), 1);
        assert_eq!(*connector.requests.lock(), ["vm1.lab"]);

        server.shutdown_handle().cancel();
        task.await.unwrap().unwrap();
        assert_eq!(server.registry().active(), 0);
    }

    #[tokio::test]
    async fn denied_destination_keeps_connection_open() {
        let policy = SecurityPolicy::new(PolicyRules {
            allowed_hostnames: vec!["*.lab".into()],
            ..PolicyRules::default()
        });
        let connector = ScriptedConnector::with(vec![Arc::new(MemorySession::new())]);
        let server = BridgeServer::with_policy(test_config(), connector.clone(), policy);
        let (addr, server, task) = spawn_server(server).await;

        let mut browser = client(addr).await;
        send(&browser, &connect_json("evil.example.com")).await;
        assert_eq!(
            recv_control(&mut browser).await,
            ServerMessage::error("Connection to evil.example.com:3389 blocked by security policy")
        );
        assert!(connector.requests.lock().is_empty());
        assert_eq!(server.registry().active(), 0);

        send(&browser, &connect_json("vm1.lab")).await;
        assert!(matches!(
            recv_control(&mut browser).await,
            ServerMessage::Connected { .. }
        ));

        server.shutdown_handle().cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn capacity_and_connector_failures_are_reported() {
        let connector = ScriptedConnector::with(vec![
            Arc::new(MemorySession::new()),
            Arc::new(MemorySession::new()),
        ]);
        let (addr, server, task) = spawn_server(BridgeServer::new(test_config(), connector)).await;

        let mut first = client(addr).await;
        let mut second = client(addr).await;
        let mut third = client(addr).await;
        for conn in [&mut first, &mut second] {
            send(conn, &connect_json("vm.lab")).await;
            assert!(matches!(recv_control(conn).await, ServerMessage::Connected { .. }));
        }

        send(&third, &connect_json("vm.lab")).await;
        let ServerMessage::Error { message } = recv_control(&mut third).await else {
            panic!("expected an error reply");
        };
        assert!(message.contains("session limit"), "{message}");

        send(&second, &connect_json("vm.lab")).await;
        assert_eq!(
            recv_control(&mut second).await,
            ServerMessage::error(BridgeError::AlreadyConnected.to_string())
        );

        // Free a slot; the connector has nothing left to hand out.
        drop(first);
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.registry().active() > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        send(&third, &connect_json("vm.lab")).await;
        let ServerMessage::Error { message } = recv_control(&mut third).await else {
            panic!("expected an error reply");
        };
        assert!(message.contains("no route to host"), "{message}");
        assert_eq!(server.registry().active(), 1);

        server.shutdown_handle().cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn engine_failure_closes_connection() {
        let session = Arc::new(MemorySession::new());
        let connector = ScriptedConnector::with(vec![session.clone()]);
        let (addr, server, task) = spawn_server(BridgeServer::new(test_config(), connector)).await;

        let mut browser = client(addr).await;
        send(&browser, &connect_json("vm1.lab")).await;
        assert!(matches!(recv_control(&mut browser).await, ServerMessage::Connected { .. }));

        session.fail("remote host ended the session");
        assert_eq!(
            recv_control(&mut browser).await,
            ServerMessage::disconnected("remote host ended the session")
        );
        assert!(matches!(
            recv(&mut browser).await,
            Frame::Close(r) if r == "remote host ended the session"
        ));

        server.shutdown_handle().cancel();
        task.await.unwrap().unwrap();
        assert_eq!(session.disconnect_count(), 1);
        assert_eq!(server.registry().active(), 0);
    }

    #[tokio::test]
    async fn session_released_when_connected_reply_fails() {
        let session = Arc::new(MemorySession::new());
        let connector = ScriptedConnector::with(vec![session.clone()]);
        let server = BridgeServer::new(test_config(), connector);

        let (sink, rx) = ChannelSink::pair(4);
        drop(rx);
        let mut conn = Connection {
            shared: Arc::clone(&server.shared),
            peer: "127.0.0.1:40000".parse().unwrap(),
            sink: Arc::new(sink),
            active: None,
        };
        let request: ConnectRequest =
            serde_json::from_str(r#"{"host":"vm1.lab","username":"u","password":"p"}"#).unwrap();

        let err = conn.open(request).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)), "{err}");
        assert!(!err.is_recoverable());
        assert!(conn.active.is_none());
        assert_eq!(session.disconnect_count(), 1);
        assert_eq!(server.registry().active(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let connector = ScriptedConnector::with(Vec::new());
        let (addr, server, task) = spawn_server(BridgeServer::new(test_config(), connector)).await;

        let mut browser = client(addr).await;
        send(&browser, "not json").await;
        send(&browser, r#"{"type":"ping"}"#).await;
        assert_eq!(recv_control(&mut browser).await, ServerMessage::Pong);

        server.shutdown_handle().cancel();
        assert!(matches!(recv(&mut browser).await, Frame::Close(r) if r == SHUTDOWN_REASON));
        task.await.unwrap().unwrap();
    }
}

//! Mutual TLS channel establishment
//!
//! - [`MtlsConnector`] dials a server, verifies its chain and name, and hands
//!   the secured connection to the RPC layer as a [`GreeterChannel`]
//! - [`MtlsAcceptor`] binds a [`Listener`] that only ever yields sessions whose
//!   client certificate chained to the trust root
//!
//! Connections that fail verification are dropped inside the listener and
//! never surface as a [`SecuredSession`].

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tokio_stream::Stream;
use tonic::codegen::Service;
use tonic::transport::server::Connected;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::{debug, info, warn};

use crate::error::{handshake_io_error, ConnectionError, GreeterError, HandshakeError, Result};
use crate::security::credentials::{IdentityMaterial, TrustRoot};
use crate::security::peer::{SessionInfo, VerifiedChain};
use crate::security::policy::{HandshakeConfig, HandshakePolicy, Role};

/// Default bound on a single TLS negotiation.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sessions completed by the listener but not yet accepted.
const ACCEPT_BACKLOG: usize = 64;

/// Pause after a failed TCP accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const CONFIRM_BUFFER_SIZE: usize = 4096;

/// Connect to `address` and complete the mutual TLS handshake.
pub async fn connect(
    address: &str,
    identity: &IdentityMaterial,
    trust_root: &TrustRoot,
    expected_peer_name: &str,
) -> Result<GreeterChannel> {
    MtlsConnector::new(identity, trust_root, expected_peer_name)?
        .connect(address)
        .await
}

/// Bind `bind_address` and start accepting verified sessions.
pub async fn listen(
    bind_address: &str,
    identity: &IdentityMaterial,
    trust_root: &TrustRoot,
) -> Result<Listener> {
    MtlsAcceptor::new(identity, trust_root)?
        .listen(bind_address)
        .await
}

// ============================================================================
// Client
// ============================================================================

/// mTLS connector for outgoing connections
pub struct MtlsConnector {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    trust_root: TrustRoot,
    handshake_timeout: Duration,
}

impl MtlsConnector {
    /// Create a connector presenting `identity` and expecting a server named `expected_peer_name`.
    pub fn new(
        identity: &IdentityMaterial,
        trust_root: &TrustRoot,
        expected_peer_name: &str,
    ) -> Result<Self> {
        match HandshakePolicy::client(expected_peer_name).build(identity, trust_root)? {
            HandshakeConfig::Client {
                config,
                server_name,
            } => Ok(Self {
                config,
                server_name,
                trust_root: trust_root.clone(),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            }),
            HandshakeConfig::Server { .. } => Err(GreeterError::Config(
                "client policy produced a server configuration".to_string(),
            )),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Dial, handshake, and wait until the server has accepted our certificate.
    ///
    /// TLS 1.3 lets the client finish before the server has judged the client
    /// certificate, so the first bytes the server sends (its HTTP/2 preface)
    /// are awaited here and replayed to the RPC layer afterwards.
    pub async fn connect(&self, address: &str) -> Result<GreeterChannel> {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectionError::Unreachable {
                address: address.to_string(),
                source,
            })?;
        let remote_addr = tcp.peer_addr().map_err(|e| ConnectionError::Transport {
            reason: e.to_string(),
        })?;

        let session = tokio::time::timeout(self.handshake_timeout, self.handshake(tcp, remote_addr))
            .await
            .map_err(|_| HandshakeError::TimedOut {
                after: self.handshake_timeout,
            })??;

        if let Some(chain) = session.info.verified_chain() {
            info!(
                address = %address,
                server = %chain.leaf().subject,
                "mTLS session established"
            );
        }
        let info = session.info.clone();
        let close_signal = Arc::clone(&session.close_signal);

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| GreeterError::Config(format!("invalid address '{address}': {e}")))?;
        let channel = endpoint
            .connect_with_connector(SessionConnector::new(session))
            .await
            .map_err(|e| ConnectionError::Transport {
                reason: e.to_string(),
            })?;

        Ok(GreeterChannel {
            address: address.to_string(),
            channel,
            session: info,
            close_signal,
        })
    }

    async fn handshake(&self, tcp: TcpStream, remote_addr: SocketAddr) -> Result<ClientSession> {
        let expected = self.server_name.to_str().into_owned();
        let connector = TlsConnector::from(Arc::clone(&self.config));

        let mut stream = connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| handshake_io_error(e, Some(&expected)))?;

        let presented = stream
            .get_ref()
            .1
            .peer_certificates()
            .map(<[_]>::to_vec)
            .ok_or(HandshakeError::PeerCertificateMissing)?;
        let chain = VerifiedChain::reconstruct(&presented, &self.trust_root)?;

        let mut confirm = BytesMut::with_capacity(CONFIRM_BUFFER_SIZE);
        let read = stream
            .read_buf(&mut confirm)
            .await
            .map_err(|e| handshake_io_error(e, Some(&expected)))?;
        if read == 0 {
            return Err(HandshakeError::PeerClosed.into());
        }

        debug!(%remote_addr, confirmed_bytes = read, "Server confirmed session");

        Ok(ClientSession {
            stream,
            pending: confirm.freeze(),
            info: SessionInfo::new(remote_addr, Role::Client, Some(chain)),
            close_signal: Arc::new(CloseSignal::default()),
        })
    }
}

/// Shared between a [`GreeterChannel`] and the connection it owns.
///
/// Once closed, the connection reads end-of-stream and refuses writes, so the
/// RPC layer tears it down no matter how many channel clones are alive.
#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    reader: Mutex<Option<Waker>>,
}

impl CloseSignal {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(waker) = self.reader.lock().take() {
                waker.wake();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Must be called before checking `is_closed` so a concurrent close is never missed.
    fn register_reader(&self, waker: &Waker) {
        let mut slot = self.reader.lock();
        match slot.as_ref() {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }
}

/// Client side of a secured connection, replaying the bytes read during confirmation.
struct ClientSession {
    stream: client::TlsStream<TcpStream>,
    pending: Bytes,
    info: SessionInfo,
    close_signal: Arc<CloseSignal>,
}

impl AsyncRead for ClientSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.close_signal.register_reader(cx.waker());
        if self.close_signal.is_closed() {
            // End of stream.
            return Poll::Ready(Ok(()));
        }
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            buf.put_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ClientSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.close_signal.is_closed() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel closed",
            )));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Hands the one secured connection to the RPC channel.
///
/// A second request means the connection was lost; it fails instead of
/// silently dialing again.
#[derive(Clone)]
struct SessionConnector {
    slot: Arc<Mutex<Option<ClientSession>>>,
}

impl SessionConnector {
    fn new(session: ClientSession) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(session))),
        }
    }
}

impl Service<Uri> for SessionConnector {
    type Response = ClientSession;
    type Error = io::Error;
    type Future = std::future::Ready<io::Result<ClientSession>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        std::future::ready(self.slot.lock().take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                "secured session already consumed; connect again explicitly",
            )
        }))
    }
}

/// RPC channel bound to exactly one verified connection.
///
/// Dropping the channel tears the connection down; [`GreeterChannel::close`]
/// does the same explicitly. Clients built from [`GreeterChannel::rpc`] fail
/// afterwards instead of keeping the connection alive.
#[derive(Debug)]
pub struct GreeterChannel {
    address: String,
    channel: Channel,
    session: SessionInfo,
    close_signal: Arc<CloseSignal>,
}

impl GreeterChannel {
    /// Transport handle for generated RPC clients.
    pub fn rpc(&self) -> Channel {
        self.channel.clone()
    }

    /// The server's side of the handshake, as verified by us.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.close_signal.is_closed()
    }

    /// End the connection. Pending and later calls on any clone of [`GreeterChannel::rpc`] fail.
    pub fn close(self) {
        debug!(address = %self.address, "Closing channel");
    }
}

impl Drop for GreeterChannel {
    fn drop(&mut self) {
        self.close_signal.close();
    }
}

// ============================================================================
// Server
// ============================================================================

/// mTLS acceptor for incoming connections
pub struct MtlsAcceptor {
    config: Arc<ServerConfig>,
    trust_root: TrustRoot,
    handshake_timeout: Duration,
}

impl MtlsAcceptor {
    /// Create an acceptor presenting `identity` and requiring client certificates from `trust_root`.
    pub fn new(identity: &IdentityMaterial, trust_root: &TrustRoot) -> Result<Self> {
        match HandshakePolicy::server().build(identity, trust_root)? {
            HandshakeConfig::Server { config } => Ok(Self {
                config,
                trust_root: trust_root.clone(),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            }),
            HandshakeConfig::Client { .. } => Err(GreeterError::Config(
                "server policy produced a client configuration".to_string(),
            )),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bind and start the accept loop.
    pub async fn listen(self, bind_address: &str) -> Result<Listener> {
        let tcp = TcpListener::bind(bind_address)
            .await
            .map_err(|source| ConnectionError::Bind {
                address: bind_address.to_string(),
                source,
            })?;
        let local_addr = tcp.local_addr().map_err(|source| ConnectionError::Bind {
            address: bind_address.to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(tcp, self, tx));

        info!(%local_addr, "mTLS listener bound");

        Ok(Listener {
            local_addr,
            sessions: rx,
            accept_task,
        })
    }
}

async fn accept_loop(tcp: TcpListener, acceptor: MtlsAcceptor, sessions: mpsc::Sender<SecuredSession>) {
    let tls = TlsAcceptor::from(Arc::clone(&acceptor.config));
    let trust_root = acceptor.trust_root;
    let handshake_timeout = acceptor.handshake_timeout;

    loop {
        let (stream, remote_addr) = match tcp.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let tls = tls.clone();
        let trust_root = trust_root.clone();
        let sessions = sessions.clone();
        tokio::spawn(async move {
            match server_handshake(tls, stream, remote_addr, &trust_root, handshake_timeout).await {
                Ok(session) => {
                    if sessions.send(session).await.is_err() {
                        debug!(%remote_addr, "Listener closed; dropping verified session");
                    }
                }
                Err(e) => warn!(%remote_addr, error = %e, "Rejected connection during mTLS handshake"),
            }
        });
    }
}

async fn server_handshake(
    tls: TlsAcceptor,
    tcp: TcpStream,
    remote_addr: SocketAddr,
    trust_root: &TrustRoot,
    handshake_timeout: Duration,
) -> Result<SecuredSession> {
    let stream = tokio::time::timeout(handshake_timeout, tls.accept(tcp))
        .await
        .map_err(|_| HandshakeError::TimedOut {
            after: handshake_timeout,
        })?
        .map_err(|e| handshake_io_error(e, None))?;

    let presented = stream
        .get_ref()
        .1
        .peer_certificates()
        .map(<[_]>::to_vec)
        .ok_or(HandshakeError::PeerCertificateMissing)?;
    let chain = VerifiedChain::reconstruct(&presented, trust_root)?;

    debug!(%remote_addr, client = %chain.leaf().subject, "Client verified");

    Ok(SecuredSession {
        stream,
        info: SessionInfo::new(remote_addr, Role::Server, Some(chain)),
    })
}

/// Verified sessions, in completion order.
///
/// Also a [`Stream`] so it can be passed straight to `serve_with_incoming`.
pub struct Listener {
    local_addr: SocketAddr,
    sessions: mpsc::Receiver<SecuredSession>,
    accept_task: JoinHandle<()>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next connection whose client certificate verified.
    ///
    /// Returns `None` once the accept loop has stopped.
    pub async fn accept(&mut self) -> Option<SecuredSession> {
        self.sessions.recv().await
    }
}

impl Stream for Listener {
    type Item = io::Result<SecuredSession>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.sessions.poll_recv(cx).map(|session| session.map(Ok))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Server side of a connection whose client certificate verified.
pub struct SecuredSession {
    stream: server::TlsStream<TcpStream>,
    info: SessionInfo,
}

impl SecuredSession {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }
}

impl Connected for SecuredSession {
    type ConnectInfo = SessionInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info.clone()
    }
}

impl AsyncRead for SecuredSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecuredSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

//! QUIC peer links
//!
//! - Reliable channel: one bidirectional stream, frames prefixed with a
//!   little-endian `u32` length.
//! - Unreliable channel: QUIC datagrams.
//!
//! The connecting side opens the stream and both sides exchange an 8-byte
//! hello (`magic`, `PeerId`) before the link is handed out. Certificates are
//! self-signed and the connector skips verification: this is a development
//! transport for trusted LAN sessions.

use crate::error::TransportError;
use crate::link::{Channel, ChannelState, LinkShared, LinkStats, MessageHandler, PeerLink};
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, RecvStream, SendStream, TransportConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ALPN: &[u8] = b"tandem-lockstep";
const HELLO_MAGIC: u32 = 0x4d44_4e54; // "TNDM"
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const DATAGRAM_BUFFER_SIZE: usize = 1024 * 1024;

/// QUIC transport settings.
#[derive(Debug, Clone)]
pub struct QuicConfig {
    pub idle_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Name placed in the self-signed certificate and used for SNI.
    pub server_name: String,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(5),
            server_name: "localhost".to_string(),
        }
    }
}

fn transport_config(config: &QuicConfig) -> Result<TransportConfig, TransportError> {
    let mut transport = TransportConfig::default();
    transport.datagram_receive_buffer_size(Some(DATAGRAM_BUFFER_SIZE));
    transport.datagram_send_buffer_size(DATAGRAM_BUFFER_SIZE);
    transport.max_idle_timeout(Some(
        VarInt::from_u64(config.idle_timeout.as_millis() as u64)
            .map_err(|_| TransportError::Tls("idle timeout out of range".to_string()))?
            .into(),
    ));
    transport.keep_alive_interval(Some(config.keep_alive_interval));
    Ok(transport)
}

fn install_crypto_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn server_config(config: &QuicConfig) -> Result<quinn::ServerConfig, TransportError> {
    install_crypto_provider();
    let certified = rcgen::generate_simple_self_signed(vec![config.server_name.clone()])
        .map_err(|e| TransportError::Tls(format!("certificate generation: {e}")))?;
    let cert_der = CertificateDer::from(certified.cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto =
        QuicServerConfig::try_from(crypto).map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut server = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    server.transport_config(Arc::new(transport_config(config)?));
    Ok(server)
}

fn client_config(config: &QuicConfig) -> Result<quinn::ClientConfig, TransportError> {
    install_crypto_provider();
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto =
        QuicClientConfig::try_from(crypto).map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut client = quinn::ClientConfig::new(Arc::new(quic_crypto));
    client.transport_config(Arc::new(transport_config(config)?));
    Ok(client)
}

/// Accepts QUIC peer links.
pub struct QuicListener {
    endpoint: Endpoint,
    local: PeerId,
}

impl QuicListener {
    /// Binds a listening endpoint. Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr, local: PeerId, config: &QuicConfig) -> Result<Self, TransportError> {
        let endpoint = Endpoint::server(server_config(config)?, addr)?;
        info!(%local, addr = ?endpoint.local_addr().ok(), "QUIC listener bound");
        Ok(Self { endpoint, local })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Waits for the next peer and completes the hello exchange.
    pub async fn accept(&self) -> Result<QuicLink, TransportError> {
        let incoming = self.endpoint.accept().await.ok_or(TransportError::EndpointClosed)?;
        let connection = incoming
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut send, mut recv) = connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let remote = read_hello(&mut recv).await?;
        write_hello(&mut send, self.local).await?;
        info!(local = %self.local, %remote, addr = %connection.remote_address(), "QUIC peer accepted");
        Ok(QuicLink::start(self.endpoint.clone(), connection, send, recv, remote))
    }

    pub fn close(&self) {
        self.endpoint.close(VarInt::from_u32(0), b"shutdown");
    }
}

/// A peer link over one QUIC connection.
pub struct QuicLink {
    remote: PeerId,
    connection: Connection,
    shared: Arc<LinkShared>,
    reliable_tx: mpsc::UnboundedSender<Vec<u8>>,
    // Keeps the endpoint driver alive for outbound links.
    _endpoint: Endpoint,
}

impl QuicLink {
    /// Connects to a listening peer and completes the hello exchange.
    pub async fn connect(
        addr: SocketAddr,
        local: PeerId,
        config: &QuicConfig,
    ) -> Result<Self, TransportError> {
        let bind: SocketAddr = if addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let mut endpoint = Endpoint::client(bind)?;
        endpoint.set_default_client_config(client_config(config)?);

        let connection = endpoint
            .connect(addr, &config.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        write_hello(&mut send, local).await?;
        let remote = read_hello(&mut recv).await?;
        info!(%local, %remote, %addr, "QUIC peer connected");
        Ok(Self::start(endpoint, connection, send, recv, remote))
    }

    fn start(
        endpoint: Endpoint,
        connection: Connection,
        send: SendStream,
        recv: RecvStream,
        remote: PeerId,
    ) -> Self {
        let shared = Arc::new(LinkShared::new(ChannelState::Open));
        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(send, reliable_rx, shared.clone(), remote));
        tokio::spawn(read_frames(recv, shared.clone(), remote));
        tokio::spawn(read_datagrams(connection.clone(), shared.clone(), remote));

        Self {
            remote,
            connection,
            shared,
            reliable_tx,
            _endpoint: endpoint,
        }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    pub fn close(&self) {
        self.shared.close_all();
        self.connection.close(VarInt::from_u32(0), b"closed");
    }
}

impl PeerLink for QuicLink {
    fn remote(&self) -> PeerId {
        self.remote
    }

    fn state(&self, channel: Channel) -> ChannelState {
        self.shared.state(channel)
    }

    fn send(&self, channel: Channel, bytes: &[u8]) {
        if !self.shared.is_open(channel) {
            tracing::trace!(to = %self.remote, ?channel, "channel not open, send dropped");
            self.shared.record_dropped(channel);
            return;
        }
        let queued = match channel {
            Channel::Reliable => self.reliable_tx.send(bytes.to_vec()).is_ok(),
            Channel::Unreliable => self.connection.send_datagram(bytes.to_vec().into()).is_ok(),
        };
        if queued {
            self.shared.record_sent(channel, bytes.len());
        } else {
            self.shared.record_dropped(channel);
        }
    }

    fn set_handler(&self, channel: Channel, handler: MessageHandler) {
        self.shared.set_handler(channel, handler);
    }

    fn stats(&self) -> LinkStats {
        self.shared.stats()
    }
}

impl Drop for QuicLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_hello(send: &mut SendStream, local: PeerId) -> Result<(), TransportError> {
    let mut hello = [0u8; 8];
    hello[0..4].copy_from_slice(&HELLO_MAGIC.to_le_bytes());
    hello[4..8].copy_from_slice(&local.0.to_le_bytes());
    send.write_all(&hello)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))
}

async fn read_hello(recv: &mut RecvStream) -> Result<PeerId, TransportError> {
    let mut hello = [0u8; 8];
    recv.read_exact(&mut hello)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    let magic = u32::from_le_bytes([hello[0], hello[1], hello[2], hello[3]]);
    if magic != HELLO_MAGIC {
        return Err(TransportError::Handshake(format!("bad hello magic {magic:#010x}")));
    }
    Ok(PeerId(u32::from_le_bytes([hello[4], hello[5], hello[6], hello[7]])))
}

async fn write_frames(
    mut send: SendStream,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<LinkShared>,
    remote: PeerId,
) {
    while let Some(frame) = rx.recv().await {
        let len = (frame.len() as u32).to_le_bytes();
        if let Err(e) = send.write_all(&len).await {
            warn!(%remote, error = %e, "reliable stream write failed");
            break;
        }
        if let Err(e) = send.write_all(&frame).await {
            warn!(%remote, error = %e, "reliable stream write failed");
            break;
        }
    }
    shared.set_state(Channel::Reliable, ChannelState::Closed);
    let _ = send.finish();
}

async fn read_frames(mut recv: RecvStream, shared: Arc<LinkShared>, remote: PeerId) {
    loop {
        let mut len = [0u8; 4];
        if let Err(e) = recv.read_exact(&mut len).await {
            debug!(%remote, error = %e, "reliable stream ended");
            break;
        }
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            warn!(%remote, len, "oversized reliable frame, closing stream");
            break;
        }
        let mut frame = vec![0u8; len];
        if let Err(e) = recv.read_exact(&mut frame).await {
            debug!(%remote, error = %e, "reliable stream ended mid-frame");
            break;
        }
        shared.deliver(Channel::Reliable, frame);
    }
    shared.set_state(Channel::Reliable, ChannelState::Closed);
}

async fn read_datagrams(connection: Connection, shared: Arc<LinkShared>, remote: PeerId) {
    loop {
        match connection.read_datagram().await {
            Ok(bytes) => shared.deliver(Channel::Unreliable, bytes.to_vec()),
            Err(e) => {
                debug!(%remote, error = %e, "datagram receiver stopped");
                break;
            }
        }
    }
    shared.close_all();
}

// Development-only verifier: peers present fresh self-signed certificates.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

use thiserror::Error;

/// Link setup failures. Sends on an established link never error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind endpoint: {0}")]
    Bind(#[from] std::io::Error),

    #[error("tls configuration failed: {0}")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("endpoint closed")]
    EndpointClosed,
}

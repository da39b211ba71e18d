//! Error types for the greeter
//!
//! Provides a unified error type and one variant family per failure domain:
//! credentials, handshake, transport, peer identity and RPC calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using GreeterError
pub type Result<T> = std::result::Result<T, GreeterError>;

/// Unified error type for greeter operations
#[derive(Debug, Error)]
pub enum GreeterError {
    // Certificate material errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    // Peer verification errors
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    // Transport errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    // Identity extraction errors
    #[error("Peer identity error: {0}")]
    NoPeerIdentity(#[from] NoPeerIdentityError),

    // RPC call errors
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GreeterError {
    /// True when the failure came from a verification check rather than the network.
    pub fn is_security_failure(&self) -> bool {
        matches!(self, GreeterError::Handshake(_) | GreeterError::Credential(_))
    }
}

/// Certificate and key material errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in {}", path.display())]
    NoCertificate { path: PathBuf },

    #[error("No private key found in {}", path.display())]
    NoPrivateKey { path: PathBuf },

    #[error("Malformed PEM data in {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Certificate {} does not match private key {}: {reason}", cert_path.display(), key_path.display())]
    KeyMismatch {
        cert_path: PathBuf,
        key_path: PathBuf,
        reason: String,
    },

    #[error("Trust root {} contains no CA certificates", path.display())]
    EmptyTrustRoot { path: PathBuf },

    #[error("CA certificate #{index} in {} is not a usable trust anchor: {reason}", path.display())]
    RejectedAnchor {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("Credentials rejected by the TLS engine: {reason}")]
    Unusable { reason: String },
}

/// Peer verification failures. The connection is rejected and never reaches the application.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Peer certificate chain is not trusted: {reason}")]
    UntrustedChain { reason: String },

    #[error("Peer certificate is not valid for name '{expected}'")]
    NameMismatch { expected: String },

    #[error("Peer presented no certificate")]
    PeerCertificateMissing,

    #[error("Peer rejected our certificate (alert: {alert})")]
    RejectedByPeer { alert: String },

    #[error("Peer closed the connection before the session was confirmed")]
    PeerClosed,

    #[error("Handshake did not complete within {after:?}")]
    TimedOut { after: Duration },

    #[error("TLS protocol failure: {reason}")]
    Protocol { reason: String },
}

/// Transport failures, distinct from verification failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Cannot reach {address}: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },
}

/// Identity extraction attempted on a session without a verified peer chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoPeerIdentityError {
    #[error("request did not arrive over a secured session")]
    MissingSession,

    #[error("session completed without peer verification")]
    Unverified,
}

/// Failures of a single RPC call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("call failed with status {code:?}: {message}")]
    Status { code: tonic::Code, message: String },
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        CallError::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

/// Classify a rustls failure into the check that failed.
///
/// `expected_name` is the server name the client asked for; servers pass `None`.
pub(crate) fn classify_tls_error(err: &rustls::Error, expected_name: Option<&str>) -> HandshakeError {
    use rustls::CertificateError;

    match err {
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => HandshakeError::NameMismatch {
            expected: expected_name.unwrap_or("<none>").to_string(),
        },
        rustls::Error::InvalidCertificate(cert_err) => HandshakeError::UntrustedChain {
            reason: format!("{cert_err:?}"),
        },
        rustls::Error::NoCertificatesPresented => HandshakeError::PeerCertificateMissing,
        rustls::Error::AlertReceived(alert) => HandshakeError::RejectedByPeer {
            alert: format!("{alert:?}"),
        },
        other => HandshakeError::Protocol {
            reason: other.to_string(),
        },
    }
}

/// Map an I/O error raised while negotiating TLS.
///
/// Errors carrying a rustls error are verification failures; anything else is transport.
pub(crate) fn handshake_io_error(err: std::io::Error, expected_name: Option<&str>) -> GreeterError {
    if let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return classify_tls_error(tls_err, expected_name).into();
    }

    match err.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
            HandshakeError::PeerClosed.into()
        }
        _ => ConnectionError::Transport {
            reason: err.to_string(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::{AlertDescription, CertificateError};

    #[test]
    fn test_error_display() {
        let err = GreeterError::Credential(CredentialError::NoCertificate {
            path: PathBuf::from("certs/client.crt"),
        });
        assert!(err.to_string().contains("certs/client.crt"));
        assert!(err.is_security_failure());
    }

    #[test]
    fn test_classify_name_mismatch() {
        let err = rustls::Error::InvalidCertificate(CertificateError::NotValidForName);
        match classify_tls_error(&err, Some("greeter.internal")) {
            HandshakeError::NameMismatch { expected } => assert_eq!(expected, "greeter.internal"),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_issuer() {
        let err = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);
        assert!(matches!(
            classify_tls_error(&err, None),
            HandshakeError::UntrustedChain { .. }
        ));
    }

    #[test]
    fn test_classify_alert() {
        let err = rustls::Error::AlertReceived(AlertDescription::UnknownCA);
        match classify_tls_error(&err, None) {
            HandshakeError::RejectedByPeer { alert } => assert!(alert.contains("UnknownCA")),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_without_tls_cause_is_transport() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(
            handshake_io_error(err, None),
            GreeterError::Connection(ConnectionError::Transport { .. })
        ));
    }

    #[test]
    fn test_io_error_with_tls_cause_is_handshake() {
        let err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
        );
        let mapped = handshake_io_error(err, None);
        assert!(mapped.is_security_failure());
    }

    #[test]
    fn test_call_error_from_status() {
        let err: CallError = tonic::Status::unavailable("gone").into();
        match err {
            CallError::Status { code, message } => {
                assert_eq!(code, tonic::Code::Unavailable);
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

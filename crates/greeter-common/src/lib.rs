//! # Greeter Common
//!
//! Mutual-TLS trust establishment and peer identity for the greeter RPC service.
//!
//! ## Components
//!
//! - [`security::credentials`]: identity (certificate + key) and trust root loading
//! - [`security::policy`]: client/server handshake policy
//! - [`security::mtls`]: connectors, listeners and secured sessions
//! - [`security::peer`]: verified chain reconstruction and identity extraction
//!
//! ## Flow
//!
//! ```text
//! load_identity / load_trust_root
//!         │
//!         ▼
//! HandshakePolicy::{client, server} ──► MtlsConnector::connect / MtlsAcceptor::listen
//!                                              │
//!                                              ▼
//!                                   SecuredSession ──► extract() ──► VerifiedPeerIdentity
//! ```

pub mod error;
pub mod security;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types at crate root
pub use error::{
    CallError, ConnectionError, CredentialError, GreeterError, HandshakeError,
    NoPeerIdentityError, Result,
};
pub use security::{
    connect, extract, listen, load_identity, load_trust_root, GreeterChannel, HandshakePolicy,
    IdentityMaterial, Listener, SecuredSession, SessionInfo, TrustRoot, VerifiedPeerIdentity,
};

/// Greeter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

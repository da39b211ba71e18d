//! Security module - credentials, handshake policy, mTLS channels and peer identity
//!
//! This module provides:
//! - Loading of identity and trust material from PEM files
//! - One tagged handshake policy covering both client and server roles
//! - Mutual TLS connectors and listeners
//! - Verified peer identity extraction for audit logging

pub mod credentials;
pub mod mtls;
pub mod peer;
pub mod policy;

pub use credentials::{load_identity, load_trust_root, IdentityMaterial, TrustAnchor, TrustRoot};
pub use mtls::{
    connect, listen, GreeterChannel, Listener, MtlsAcceptor, MtlsConnector, SecuredSession,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use peer::{extract, ChainLink, SessionInfo, VerifiedChain, VerifiedPeerIdentity};
pub use policy::{HandshakeConfig, HandshakePolicy, Role};

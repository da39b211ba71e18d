//! Handshake policy
//!
//! Who presents a certificate, who verifies whom, and which name the client
//! expects, decided in one place for both roles:
//!
//! | Role   | Presents identity | Requires peer cert | Checks peer name |
//! |--------|-------------------|--------------------|------------------|
//! | Client | yes               | server-auth only   | yes              |
//! | Server | yes               | yes                | no               |

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use tracing::debug;

use crate::error::{CredentialError, GreeterError, Result};
use crate::security::credentials::{crypto_provider, IdentityMaterial, TrustRoot};

/// ALPN protocol for gRPC over HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";

/// Side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Handshake policy, tagged by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePolicy {
    /// Present our identity, verify the server chain and its name.
    Client { expected_peer_name: String },
    /// Present our identity, require and verify a client certificate.
    Server,
}

impl HandshakePolicy {
    pub fn client(expected_peer_name: impl Into<String>) -> Self {
        HandshakePolicy::Client {
            expected_peer_name: expected_peer_name.into(),
        }
    }

    pub fn server() -> Self {
        HandshakePolicy::Server
    }

    pub fn role(&self) -> Role {
        match self {
            HandshakePolicy::Client { .. } => Role::Client,
            HandshakePolicy::Server => Role::Server,
        }
    }

    /// Both roles authenticate themselves.
    pub fn presents_identity(&self) -> bool {
        true
    }

    /// Only the server demands a certificate from its peer.
    pub fn requires_peer_certificate(&self) -> bool {
        matches!(self, HandshakePolicy::Server)
    }

    pub fn expected_peer_name(&self) -> Option<&str> {
        match self {
            HandshakePolicy::Client { expected_peer_name } => Some(expected_peer_name),
            HandshakePolicy::Server => None,
        }
    }

    /// Turn the policy into a rustls configuration.
    pub fn build(&self, identity: &IdentityMaterial, trust_root: &TrustRoot) -> Result<HandshakeConfig> {
        let provider = crypto_provider();

        let config = match self {
            HandshakePolicy::Client { expected_peer_name } => {
                let server_name = ServerName::try_from(expected_peer_name.clone()).map_err(|e| {
                    GreeterError::Config(format!("invalid server name '{expected_peer_name}': {e}"))
                })?;

                let mut config = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(unusable)?
                    .with_root_certificates(trust_root.store())
                    .with_client_auth_cert(identity.cert_chain().to_vec(), identity.private_key())
                    .map_err(unusable)?;
                config.alpn_protocols = vec![ALPN_H2.to_vec()];

                HandshakeConfig::Client {
                    config: Arc::new(config),
                    server_name,
                }
            }
            HandshakePolicy::Server => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(trust_root.store(), provider.clone())
                        .build()
                        .map_err(|e| CredentialError::Unusable {
                            reason: format!("client verifier: {e}"),
                        })?;

                let mut config = ServerConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(unusable)?
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(identity.cert_chain().to_vec(), identity.private_key())
                    .map_err(unusable)?;
                config.alpn_protocols = vec![ALPN_H2.to_vec()];

                HandshakeConfig::Server {
                    config: Arc::new(config),
                }
            }
        };

        debug!(
            role = %self.role(),
            subject = %identity.subject(),
            anchors = trust_root.len(),
            requires_peer_certificate = self.requires_peer_certificate(),
            expected_peer_name = ?self.expected_peer_name(),
            "Handshake configuration built"
        );

        Ok(config)
    }
}

/// rustls configuration produced by a [`HandshakePolicy`].
#[derive(Debug, Clone)]
pub enum HandshakeConfig {
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

impl HandshakeConfig {
    pub fn role(&self) -> Role {
        match self {
            HandshakeConfig::Client { .. } => Role::Client,
            HandshakeConfig::Server { .. } => Role::Server,
        }
    }
}

fn unusable(err: rustls::Error) -> GreeterError {
    CredentialError::Unusable {
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::credentials::{load_identity, load_trust_root};
    use crate::testing::Pki;

    #[test]
    fn test_client_policy_flags() {
        let policy = HandshakePolicy::client("localhost");
        assert_eq!(policy.role(), Role::Client);
        assert!(policy.presents_identity());
        assert!(!policy.requires_peer_certificate());
        assert_eq!(policy.expected_peer_name(), Some("localhost"));
    }

    #[test]
    fn test_server_policy_flags() {
        let policy = HandshakePolicy::server();
        assert_eq!(policy.role(), Role::Server);
        assert!(policy.presents_identity());
        assert!(policy.requires_peer_certificate());
        assert_eq!(policy.expected_peer_name(), None);
    }

    #[test]
    fn test_build_both_roles() {
        let pki = Pki::generate();
        let root = load_trust_root(pki.path("ca.crt")).unwrap();
        let client_id = load_identity(pki.path("client.crt"), pki.path("client.key")).unwrap();
        let server_id = load_identity(pki.path("server.crt"), pki.path("server.key")).unwrap();

        match HandshakePolicy::client("localhost").build(&client_id, &root).unwrap() {
            HandshakeConfig::Client { config, server_name } => {
                assert_eq!(config.alpn_protocols, vec![ALPN_H2.to_vec()]);
                assert_eq!(server_name.to_str(), "localhost");
            }
            other => panic!("expected client config, got {:?}", other.role()),
        }

        let server = HandshakePolicy::server().build(&server_id, &root).unwrap();
        assert_eq!(server.role(), Role::Server);
    }

    #[test]
    fn test_invalid_server_name_is_config_error() {
        let pki = Pki::generate();
        let root = load_trust_root(pki.path("ca.crt")).unwrap();
        let client_id = load_identity(pki.path("client.crt"), pki.path("client.key")).unwrap();

        let err = HandshakePolicy::client("not a valid name!")
            .build(&client_id, &root)
            .unwrap_err();
        assert!(matches!(err, GreeterError::Config(_)));
    }
}

//! Peer identity
//!
//! After a handshake, rustls has verified that the peer's certificates chain
//! to the trust root but keeps the path to itself. [`VerifiedChain::reconstruct`]
//! rebuilds it from the presented certificates and the trust anchors;
//! [`extract`] projects the first two links into a [`VerifiedPeerIdentity`].

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{HandshakeError, NoPeerIdentityError};
use crate::security::credentials::TrustRoot;
use crate::security::policy::Role;

/// Upper bound on reconstructed chain length.
const MAX_CHAIN_DEPTH: usize = 8;

/// One certificate of a verified chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub der: CertificateDer<'static>,
    pub subject: String,
    pub issuer: String,
}

/// Verified certificate chain: leaf first, then each issuer up to a trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedChain {
    links: Vec<ChainLink>,
}

impl VerifiedChain {
    /// Rebuild the chain rustls validated.
    ///
    /// Must only be called with certificates that already passed verification
    /// against `trust_root`.
    pub fn reconstruct(
        presented: &[CertificateDer<'static>],
        trust_root: &TrustRoot,
    ) -> Result<Self, HandshakeError> {
        let leaf = presented.first().ok_or(HandshakeError::PeerCertificateMissing)?;

        let mut links = vec![parse_link(leaf)?];
        let mut intermediates: Vec<&CertificateDer<'static>> = presented[1..].iter().collect();

        while links.len() < MAX_CHAIN_DEPTH {
            let current = &links[links.len() - 1];
            if trust_root.anchors().iter().any(|a| a.der == current.der) {
                break;
            }
            let issuer_raw = issuer_raw(&current.der)?;

            if let Some(pos) = intermediates
                .iter()
                .position(|der| subject_raw(der).map(|s| s == issuer_raw).unwrap_or(false))
            {
                let der = intermediates.remove(pos);
                links.push(parse_link(der)?);
                continue;
            }

            match trust_root
                .anchors()
                .iter()
                .find(|a| a.subject_raw == issuer_raw)
            {
                Some(anchor) => links.push(parse_link(&anchor.der)?),
                None => break,
            }
        }

        Ok(Self { links })
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn leaf(&self) -> &ChainLink {
        &self.links[0]
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Connection metadata attached to every request carried by a secured session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    remote_addr: SocketAddr,
    role: Role,
    verified_chain: Option<Arc<VerifiedChain>>,
}

impl SessionInfo {
    pub fn new(remote_addr: SocketAddr, role: Role, verified_chain: Option<VerifiedChain>) -> Self {
        Self {
            remote_addr,
            role,
            verified_chain: verified_chain.map(Arc::new),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Our role on this connection.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn verified_chain(&self) -> Option<&VerifiedChain> {
        self.verified_chain.as_deref()
    }
}

/// Subjects of the peer's leaf certificate and its immediate issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPeerIdentity {
    pub leaf_subject: String,
    pub issuer_subject: String,
}

impl VerifiedPeerIdentity {
    /// Extract the identity of the peer that sent `request`.
    pub fn from_request<T>(request: &tonic::Request<T>) -> Result<Self, NoPeerIdentityError> {
        let session = request
            .extensions()
            .get::<SessionInfo>()
            .ok_or(NoPeerIdentityError::MissingSession)?;
        extract(session)
    }
}

/// Project a verified session onto the peer's leaf and issuer subjects.
///
/// Only the first two links are used; a single-link chain (the leaf is itself
/// an anchor) reports the leaf's own issuer name.
pub fn extract(session: &SessionInfo) -> Result<VerifiedPeerIdentity, NoPeerIdentityError> {
    let chain = session
        .verified_chain()
        .filter(|chain| !chain.is_empty())
        .ok_or(NoPeerIdentityError::Unverified)?;

    let leaf = chain.leaf();
    let issuer_subject = chain
        .links()
        .get(1)
        .map(|link| link.subject.clone())
        .unwrap_or_else(|| leaf.issuer.clone());

    Ok(VerifiedPeerIdentity {
        leaf_subject: leaf.subject.clone(),
        issuer_subject,
    })
}

fn parse_link(der: &CertificateDer<'static>) -> Result<ChainLink, HandshakeError> {
    let cert = parse(der)?;
    Ok(ChainLink {
        der: der.clone(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
    })
}

fn subject_raw(der: &CertificateDer<'_>) -> Result<Vec<u8>, HandshakeError> {
    Ok(parse(der)?.subject().as_raw().to_vec())
}

fn issuer_raw(der: &CertificateDer<'_>) -> Result<Vec<u8>, HandshakeError> {
    Ok(parse(der)?.issuer().as_raw().to_vec())
}

fn parse<'a>(der: &'a CertificateDer<'_>) -> Result<X509Certificate<'a>, HandshakeError> {
    X509Certificate::from_der(der.as_ref())
        .map(|(_, cert)| cert)
        .map_err(|e| HandshakeError::Protocol {
            reason: format!("verified certificate failed to parse: {e}"),
        })
}

//! Credential loading
//!
//! Reads PEM identity material (leaf certificate + private key) and PEM trust
//! material (CA bundle). Every check happens here, at startup, so the
//! establisher never sees a half-valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CredentialError;

/// The crypto provider used for every TLS operation in the workspace.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Leaf certificate (plus any chain the file carries) and its private key.
///
/// Immutable once loaded; pass it by reference into the establisher.
#[derive(Debug)]
pub struct IdentityMaterial {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    subject: String,
}

impl IdentityMaterial {
    /// Certificate chain, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Subject of the leaf certificate.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn private_key(&self) -> PrivateKeyDer<'static> {
        self.private_key.clone_key()
    }
}

/// A CA certificate accepted as a trust anchor.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub(crate) der: CertificateDer<'static>,
    pub(crate) subject: String,
    pub(crate) subject_raw: Vec<u8>,
}

impl TrustAnchor {
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Set of trusted CA certificates. Never empty.
///
/// Cloning is cheap: the anchors and the verifier root store are shared.
#[derive(Debug, Clone)]
pub struct TrustRoot {
    store: Arc<RootCertStore>,
    anchors: Arc<[TrustAnchor]>,
}

impl TrustRoot {
    /// Root store handed to the rustls verifiers.
    pub fn store(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.store)
    }

    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Load a certificate/key pair and check that the key belongs to the certificate.
pub fn load_identity(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<IdentityMaterial, CredentialError> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_chain = load_certs(cert_path)?;
    let private_key = load_private_key(key_path)?;

    let provider = crypto_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(private_key.clone_key())
        .map_err(|e| CredentialError::Malformed {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    CertifiedKey::new(cert_chain.clone(), signing_key)
        .keys_match()
        .map_err(|e| CredentialError::KeyMismatch {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let subject = summarize(cert_path, &cert_chain[0])?.subject;

    info!(
        cert = %cert_path.display(),
        subject = %subject,
        chain_len = cert_chain.len(),
        "Loaded identity material"
    );

    Ok(IdentityMaterial {
        cert_chain,
        private_key,
        subject,
    })
}

/// Load a CA bundle.
///
/// Every entry must parse and carry `basicConstraints` with `cA` set; any entry
/// that does not fails the whole load, so a root never holds a leaf certificate
/// or silently skips one.
pub fn load_trust_root(ca_path: impl AsRef<Path>) -> Result<TrustRoot, CredentialError> {
    let ca_path = ca_path.as_ref();
    let pem = read_file(ca_path)?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CredentialError::Malformed {
            path: ca_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CredentialError::EmptyTrustRoot {
            path: ca_path.to_path_buf(),
        });
    }

    let mut store = RootCertStore::empty();
    let mut anchors = Vec::with_capacity(certs.len());
    for (index, der) in certs.into_iter().enumerate() {
        let summary = summarize(ca_path, &der).map_err(|e| CredentialError::RejectedAnchor {
            path: ca_path.to_path_buf(),
            index,
            reason: e.to_string(),
        })?;
        if !summary.is_ca {
            return Err(CredentialError::RejectedAnchor {
                path: ca_path.to_path_buf(),
                index,
                reason: format!("{} is not a CA certificate", summary.subject),
            });
        }

        store
            .add(der.clone())
            .map_err(|e| CredentialError::RejectedAnchor {
                path: ca_path.to_path_buf(),
                index,
                reason: e.to_string(),
            })?;

        debug!(subject = %summary.subject, index, "Added trust anchor");
        anchors.push(TrustAnchor {
            der,
            subject: summary.subject,
            subject_raw: summary.subject_raw,
        });
    }

    info!(
        ca = %ca_path.display(),
        anchors = anchors.len(),
        "Loaded trust root"
    );

    Ok(TrustRoot {
        store: Arc::new(store),
        anchors: anchors.into(),
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CredentialError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CredentialError::NoCertificate {
            path: path.to_path_buf(),
        });
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CredentialError> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| CredentialError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| CredentialError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}

fn read_file(path: &Path) -> Result<Vec<u8>, CredentialError> {
    fs::read(path).map_err(|source| CredentialError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// The parts of a certificate the loaders look at.
struct CertSummary {
    subject: String,
    subject_raw: Vec<u8>,
    is_ca: bool,
}

fn summarize(path: &Path, der: &CertificateDer<'_>) -> Result<CertSummary, CredentialError> {
    let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| {
        CredentialError::Malformed {
            path: PathBuf::from(path),
            reason: format!("X.509 parse error: {e}"),
        }
    })?;
    Ok(CertSummary {
        subject: cert.subject().to_string(),
        subject_raw: cert.subject().as_raw().to_vec(),
        is_ca: cert.is_ca(),
    })
}

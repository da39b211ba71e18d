//! Throwaway PKI for tests.
//!
//! Layout written to a temporary directory:
//! - `ca.crt`: test CA ("Greeter Test CA")
//! - `server.crt` / `server.key`: "greeter-server", SAN localhost, issued by the CA
//! - `client.crt` / `client.key`: "greeter-client", SAN localhost, issued by the CA
//! - `rogue.crt` / `rogue.key`: self-signed leaf "rogue-client", SAN localhost
//! - `rogue-ca.crt`: an unrelated CA ("Rogue Test CA") that issued nothing here
//!
//! Available to other crates' tests through the `testing` feature.

use std::fs;
use std::path::PathBuf;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls::pki_types::CertificateDer;
use tempfile::TempDir;

use crate::security::credentials::{load_identity, load_trust_root, IdentityMaterial, TrustRoot};

/// Generated certificates and keys, deleted on drop.
pub struct Pki {
    dir: TempDir,
    client_der: CertificateDer<'static>,
}

impl Pki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");

        let (ca_cert, ca_key) = authority("Greeter Test CA");
        fs::write(dir.path().join("ca.crt"), ca_cert.pem()).expect("write ca.crt");

        let (server_cert, server_key) = leaf("greeter-server", Some((&ca_cert, &ca_key)));
        write_pair(&dir, "server", &server_cert, &server_key);

        let (client_cert, client_key) = leaf("greeter-client", Some((&ca_cert, &ca_key)));
        write_pair(&dir, "client", &client_cert, &client_key);

        let (rogue_cert, rogue_key) = leaf("rogue-client", None);
        write_pair(&dir, "rogue", &rogue_cert, &rogue_key);

        let (rogue_ca, _) = authority("Rogue Test CA");
        fs::write(dir.path().join("rogue-ca.crt"), rogue_ca.pem()).expect("write rogue-ca.crt");

        Self {
            dir,
            client_der: client_cert.der().clone(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    /// DER of the client leaf certificate.
    pub fn client_der(&self) -> CertificateDer<'static> {
        self.client_der.clone()
    }

    /// Load `<stem>.crt` / `<stem>.key`.
    pub fn identity(&self, stem: &str) -> IdentityMaterial {
        load_identity(
            self.path(&format!("{stem}.crt")),
            self.path(&format!("{stem}.key")),
        )
        .expect("load fixture identity")
    }

    /// Trust root holding only the test CA.
    pub fn trust_root(&self) -> TrustRoot {
        load_trust_root(self.path("ca.crt")).expect("load fixture trust root")
    }

    /// Trust root holding only the unrelated rogue CA.
    pub fn foreign_trust_root(&self) -> TrustRoot {
        load_trust_root(self.path("rogue-ca.crt")).expect("load rogue CA")
    }
}

fn common_name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

fn authority(cn: &str) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().expect("CA key");
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
    params.distinguished_name = common_name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).expect("self-signed CA");
    (cert, key)
}

/// Leaf valid for `localhost`, issued by `issuer` or self-signed.
fn leaf(cn: &str, issuer: Option<(&Certificate, &KeyPair)>) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().expect("leaf key");
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("leaf params");
    params.distinguished_name = common_name(cn);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let cert = match issuer {
        Some((ca_cert, ca_key)) => params.signed_by(&key, ca_cert, ca_key),
        None => params.self_signed(&key),
    }
    .expect("sign leaf");
    (cert, key)
}

fn write_pair(dir: &TempDir, stem: &str, cert: &Certificate, key: &KeyPair) {
    fs::write(dir.path().join(format!("{stem}.crt")), cert.pem()).expect("write cert");
    fs::write(dir.path().join(format!("{stem}.key")), key.serialize_pem()).expect("write key");
}

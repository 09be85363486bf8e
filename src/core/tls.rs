//! Purpose: Supply client certificates and trusted roots for https endpoints.
//! Exports: `CredentialSource`, `ClientIdentity`, `PemDirCredentials`, `client_config`.
//! Role: Boundary to credential storage; request handling never reads disk.
//! Invariants: rustls types come through the `ureq::rustls` re-export so the
//! versions cannot drift apart.
//! Invariants: Certificate-expiry metric export belongs to the source
//! implementation, not to this crate's request path.

use crate::core::error::{Error, ErrorKind};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ureq::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use ureq::rustls::{ClientConfig, RootCertStore};

/// Client certificate chain plus its private key.
#[derive(Debug)]
pub struct ClientIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Pluggable source of TLS material. Implementations that track certificate
/// expiry can export it to whatever metrics sink they like; this crate only
/// asks for the material.
pub trait CredentialSource: Send + Sync {
    fn identity(&self) -> Result<ClientIdentity, Error>;
    fn trusted_roots(&self) -> Result<RootCertStore, Error>;
}

/// Credentials laid out as a directory of PEM files: `service.pem` (client
/// certificate chain), `service-key.pem` (private key), `ca.pem` (trusted
/// roots).
pub struct PemDirCredentials {
    dir: PathBuf,
}

impl PemDirCredentials {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CredentialSource for PemDirCredentials {
    fn identity(&self) -> Result<ClientIdentity, Error> {
        let cert_chain = read_certs(&self.dir.join("service.pem"))?;
        let key_path = self.dir.join("service-key.pem");
        let key_bytes = read_pem(&key_path)?;
        let key = rustls_pemfile::private_key(&mut Cursor::new(key_bytes))
            .map_err(|err| {
                Error::new(ErrorKind::Credentials)
                    .with_message(format!("failed to parse {}", key_path.display()))
                    .with_source(err)
            })?
            .ok_or_else(|| {
                Error::new(ErrorKind::Credentials)
                    .with_message(format!("{} contains no private key", key_path.display()))
            })?;
        Ok(ClientIdentity { cert_chain, key })
    }

    fn trusted_roots(&self) -> Result<RootCertStore, Error> {
        let ca_path = self.dir.join("ca.pem");
        let certs = read_certs(&ca_path)?;
        let mut roots = RootCertStore::empty();
        let (added, _) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Credentials).with_message(format!(
                "{} contains no parsable certificates",
                ca_path.display()
            )));
        }
        Ok(roots)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Credentials)
            .with_message(format!("failed to read {}", path.display()))
            .with_source(err)
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let bytes = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(bytes))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Credentials)
                .with_message(format!("failed to parse {}", path.display()))
                .with_source(err)
        })?;
    if certs.is_empty() {
        return Err(Error::new(ErrorKind::Credentials)
            .with_message(format!("{} contains no certificates", path.display())));
    }
    Ok(certs)
}

/// Assemble a rustls client configuration with client authentication from a
/// credential source.
pub fn client_config(source: &dyn CredentialSource) -> Result<Arc<ClientConfig>, Error> {
    let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let identity = source.identity()?;
    let roots = source.trusted_roots()?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(identity.cert_chain, identity.key)
        .map_err(|err| {
            Error::new(ErrorKind::Credentials)
                .with_message("failed to assemble client TLS configuration")
                .with_source(err)
        })?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::{CredentialSource, PemDirCredentials, client_config};
    use crate::core::error::ErrorKind;
    use std::fs;

    fn write_credential_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = rcgen::generate_simple_self_signed(vec!["client.test".to_string()])
            .expect("generate client cert");
        fs::write(dir.path().join("service.pem"), cert.serialize_pem().expect("pem"))
            .expect("write cert");
        fs::write(
            dir.path().join("service-key.pem"),
            cert.serialize_private_key_pem(),
        )
        .expect("write key");
        let ca = rcgen::generate_simple_self_signed(vec!["ca.test".to_string()])
            .expect("generate ca cert");
        fs::write(dir.path().join("ca.pem"), ca.serialize_pem().expect("pem")).expect("write ca");
        dir
    }

    #[test]
    fn pem_dir_credentials_load_and_assemble() {
        let dir = write_credential_dir();
        let source = PemDirCredentials::new(dir.path());
        let identity = source.identity().expect("identity");
        assert_eq!(identity.cert_chain.len(), 1);
        let roots = source.trusted_roots().expect("roots");
        assert_eq!(roots.len(), 1);
        client_config(&source).expect("client config");
    }

    #[test]
    fn missing_files_are_credential_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = PemDirCredentials::new(dir.path());
        let err = source.identity().expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Credentials);
        let err = source.trusted_roots().expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }

    #[test]
    fn empty_ca_file_is_a_credential_error() {
        let dir = write_credential_dir();
        fs::write(dir.path().join("ca.pem"), "").expect("truncate ca");
        let source = PemDirCredentials::new(dir.path());
        let err = source.trusted_roots().expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }
}

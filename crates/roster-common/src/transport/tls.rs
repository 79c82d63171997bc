//! Optional TLS/mTLS passthrough for the RPC transport.
//!
//! Roster does not define a cryptographic identity of its own; callers hand
//! in PEM material and it is attached to the listener or the subchannel
//! connector unchanged. When trust roots are supplied on the server side,
//! client certificates are required and verified against them (mTLS).

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::protocol::error::{Result, RosterError};

/// Caller-supplied PEM material.
#[derive(Clone)]
pub struct TlsMaterial {
    cert_chain_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
    trust_roots_pem: Option<Vec<u8>>,
}

impl TlsMaterial {
    pub fn new(cert_chain_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: private_key_pem.into(),
            trust_roots_pem: None,
        }
    }

    /// Trust anchors for verifying the peer: the remote server on the
    /// client side, client certificates (mTLS) on the server side.
    pub fn with_trust_roots(mut self, trust_roots_pem: impl Into<Vec<u8>>) -> Self {
        self.trust_roots_pem = Some(trust_roots_pem.into());
        self
    }

    /// Builds the server-side acceptor.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        install_provider();
        let certs = self.certs()?;
        let key = self.private_key()?;

        let config = match &self.trust_roots_pem {
            Some(pem) => {
                let roots = root_store(pem)?;
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| {
                        RosterError::Connection(format!("failed to build client verifier: {}", e))
                    })?;
                rustls::ServerConfig::builder()
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
            }
            None => rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key),
        }
        .map_err(|e| RosterError::Connection(format!("failed to build server config: {}", e)))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Builds the client-side connector. The configured certificate is
    /// presented to servers that request client auth; `trust_roots` are
    /// required to verify the server.
    pub fn connector(&self) -> Result<TlsConnector> {
        install_provider();
        let certs = self.certs()?;
        let key = self.private_key()?;
        let pem = self.trust_roots_pem.as_ref().ok_or_else(|| {
            RosterError::InvalidSettings(
                "client TLS material needs trust roots to verify servers".to_string(),
            )
        })?;
        let roots = root_store(pem)?;

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| RosterError::Connection(format!("failed to build client config: {}", e)))?;

        Ok(TlsConnector::from(Arc::new(config)))
    }

    fn certs(&self) -> Result<Vec<CertificateDer<'static>>> {
        let certs: Vec<_> = rustls_pemfile::certs(&mut &*self.cert_chain_pem)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| RosterError::InvalidSettings(format!("bad certificate PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(RosterError::InvalidSettings(
                "certificate PEM contains no certificates".to_string(),
            ));
        }
        Ok(certs)
    }

    fn private_key(&self) -> Result<PrivateKeyDer<'static>> {
        rustls_pemfile::private_key(&mut &*self.private_key_pem)
            .map_err(|e| RosterError::InvalidSettings(format!("bad private key PEM: {}", e)))?
            .ok_or_else(|| {
                RosterError::InvalidSettings("private key PEM contains no key".to_string())
            })
    }
}

/// Parses the server name used for certificate verification out of an
/// address, accepting both DNS names and IP literals.
pub fn server_name(address: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(address.to_string())
        .map_err(|e| RosterError::Connection(format!("invalid TLS server name '{}': {}", address, e)))
}

fn install_provider() {
    // Install default crypto provider for rustls (ring backend)
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn root_store(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &*pem) {
        let cert =
            cert.map_err(|e| RosterError::InvalidSettings(format!("bad trust root PEM: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| RosterError::InvalidSettings(format!("unusable trust root: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(RosterError::InvalidSettings(
            "trust root PEM contains no certificates".to_string(),
        ));
    }
    Ok(roots)
}

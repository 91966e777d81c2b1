use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::cert::Certificate;
use crate::error::{CertError, Result};
use crate::key;

/// TLS material derived from a [`Certificate`].
///
/// Trusts exactly the certificate's public chain and presents the certificate itself, so the same
/// value configures both ends of a mutually authenticated connection.
pub struct TlsConfiguration {
    roots: Arc<RootCertStore>,
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl TlsConfiguration {
    pub fn from_certificate(cert: &Certificate) -> Result<Self> {
        let private_key = cert
            .private_key
            .as_ref()
            .ok_or(CertError::MissingPrivateKey)?;

        let public_chain = cert
            .public_chain()
            .iter()
            .map(|c| {
                c.x509
                    .raw()
                    .map(|der| CertificateDer::from(der.to_vec()))
                    .ok_or(CertError::Unsigned)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut roots = RootCertStore::empty();
        for der in &public_chain {
            roots.add(der.clone())?;
        }

        // Leaf first, root last.
        let mut cert_chain = public_chain;
        cert_chain.reverse();

        Ok(Self {
            roots: Arc::new(roots),
            cert_chain,
            private_key: PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(key::private_key_der(
                private_key,
            )?)),
        })
    }

    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    /// Certificates presented to the peer, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Client configuration that trusts the chain and authenticates with the certificate.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.cert_chain.clone(), self.private_key.clone_key())?;
        Ok(config)
    }

    /// Server configuration that presents the certificate and requires client certificates issued
    /// under the same chain.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let verifier = WebPkiClientVerifier::builder_with_provider(self.roots.clone(), provider())
            .build()
            .map_err(|e| CertError::Tls(e.to_string()))?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())?;
        Ok(config)
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

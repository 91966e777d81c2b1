pub mod builder;
pub mod extensions;
pub mod params;

use std::collections::BTreeMap;
use std::fmt;

use der::Encode;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::error::{CertError, Result};
use crate::key;
use crate::tls::TlsConfiguration;
use crate::x509::X509Certificate;

/// Key of the certificate entry in [`Certificate::as_key_pair_bytes`].
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Key of the private key entry in [`Certificate::as_key_pair_bytes`].
pub const TLS_KEY_KEY: &str = "tls.key";

/// An X.509 certificate, the private key it was issued for and the chain of its issuers.
///
/// A certificate without a private key is a reference: it can be trusted and encoded but not used
/// to sign or to authenticate. The chain is ordered root first, immediate issuer last, and never
/// includes the certificate itself.
#[derive(Clone)]
pub struct Certificate {
    pub x509: X509Certificate,
    pub private_key: Option<RsaPrivateKey>,
    pub chain: Vec<Certificate>,
}

impl Certificate {
    /// A reference-only certificate with no key and no chain.
    pub fn reference(x509: X509Certificate) -> Self {
        Self {
            x509,
            private_key: None,
            chain: Vec::new(),
        }
    }

    /// Assemble a certificate from its parts without checking that key and certificate match.
    pub fn from_parts(
        x509: X509Certificate,
        private_key: Option<RsaPrivateKey>,
        chain: Vec<Certificate>,
    ) -> Self {
        Self {
            x509,
            private_key,
            chain,
        }
    }

    /// Pair a certificate with its private key.
    ///
    /// Fails with [`CertError::KeyMismatch`] if the key's public half is not the public key the
    /// certificate was issued for.
    pub fn with_private_key(x509: X509Certificate, private_key: RsaPrivateKey) -> Result<Self> {
        match x509.public_key()? {
            Some(public) if public == private_key.to_public_key() => {
                Ok(Self::from_parts(x509, Some(private_key), Vec::new()))
            }
            _ => Err(CertError::KeyMismatch),
        }
    }

    /// Decode a certificate and, optionally, its PEM private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: Option<&[u8]>) -> Result<Self> {
        let x509 = X509Certificate::from_pem(cert_pem)?;
        let private_key = key_pem.map(key::decode_private_key).transpose()?;
        Ok(Self::from_parts(x509, private_key, Vec::new()))
    }

    /// PEM `CERTIFICATE` block of the signed certificate.
    ///
    /// The block is built from the stored DER, so decoding and re-encoding is byte-identical.
    pub fn encoded_certificate(&self) -> Result<String> {
        self.x509.to_pem()
    }

    /// PKCS#1 `RSA PRIVATE KEY` block.
    pub fn encoded_private_key(&self) -> Result<String> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(CertError::MissingPrivateKey)?;
        key::encode_private_key(private_key)
    }

    /// PKIX `PUBLIC KEY` block for the public half of the private key.
    pub fn try_encoded_public_key(&self) -> Result<String> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(CertError::MissingPrivateKey)?;
        key::encode_public_key(&private_key.to_public_key())
    }

    /// PKIX `PUBLIC KEY` block for the public half of the private key.
    ///
    /// # Panics
    ///
    /// The caller must make sure a private key is present. Panics if it is absent or if the public
    /// key encodes to nothing; use [`Certificate::try_encoded_public_key`] to get an error instead.
    pub fn encoded_public_key(&self) -> String {
        match self.try_encoded_public_key() {
            Ok(pem) => pem,
            Err(e) => panic!("encoded_public_key precondition violated: {e}"),
        }
    }

    /// The subject public key, falling back to the public half of the private key for templates
    /// that have not been given one.
    pub fn subject_public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        if let Some(info) = &self.x509.public_key_info {
            return Ok(info.clone());
        }
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(CertError::MissingPrivateKey)?;
        key::public_key_info(&private_key.to_public_key())
    }

    /// `sha256:<hex>` over the DER of the SubjectPublicKeyInfo.
    ///
    /// Certificates re-issued for the same key share a fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self.subject_public_key_info()?.to_der()?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&der))))
    }

    /// The `tls.crt` / `tls.key` pair a Kubernetes TLS secret expects.
    pub fn as_key_pair_bytes(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut pair = BTreeMap::new();
        pair.insert(
            TLS_CERT_KEY.to_string(),
            self.encoded_certificate()?.into_bytes(),
        );
        pair.insert(
            TLS_KEY_KEY.to_string(),
            self.encoded_private_key()?.into_bytes(),
        );
        Ok(pair)
    }

    /// A copy without the private key, at any level of the chain.
    pub fn to_reference(&self) -> Certificate {
        Certificate {
            x509: self.x509.clone(),
            private_key: None,
            chain: self.chain.iter().map(Certificate::to_reference).collect(),
        }
    }

    /// The chain followed by this certificate, all reference-only.
    pub fn public_chain(&self) -> Vec<Certificate> {
        let mut chain: Vec<Certificate> = self
            .chain
            .iter()
            .map(|cert| Certificate::reference(cert.x509.clone()))
            .collect();
        chain.push(Certificate::reference(self.x509.clone()));
        chain
    }

    /// TLS material trusting this certificate's chain and presenting this certificate.
    pub fn as_tls_configuration(&self) -> Result<TlsConfiguration> {
        TlsConfiguration::from_certificate(self)
    }

    pub fn is_ca(&self) -> bool {
        self.x509.basic_constraints_valid && self.x509.is_ca
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.x509.subject.to_string())
            .field("issuer", &self.x509.issuer.to_string())
            .field("serial_number", &self.x509.serial_number)
            .field("signed", &self.x509.is_signed())
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::builder::CertificateBuilder;
    use crate::key::tests::shared_key;

    fn unsigned() -> Certificate {
        CertificateBuilder::new("unsigned.local")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_unsigned_certificate_cannot_be_encoded() {
        let cert = unsigned();
        assert!(matches!(
            cert.encoded_certificate(),
            Err(CertError::Unsigned)
        ));
        assert!(cert.encoded_private_key().is_ok());
    }

    #[test]
    fn test_fingerprint_format() {
        let fingerprint = unsigned().fingerprint().unwrap();
        let hex = fingerprint.strip_prefix("sha256:").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_reference_has_no_key_material() {
        let cert = Certificate::reference(unsigned().x509);
        assert!(matches!(
            cert.encoded_private_key(),
            Err(CertError::MissingPrivateKey)
        ));
        assert!(matches!(
            cert.try_encoded_public_key(),
            Err(CertError::MissingPrivateKey)
        ));
    }

    #[test]
    #[should_panic(expected = "encoded_public_key precondition violated")]
    fn test_encoded_public_key_asserts_key_presence() {
        let cert = Certificate::reference(unsigned().x509);
        let _ = cert.encoded_public_key();
    }

    #[test]
    fn test_encoded_public_key_matches_private_key() {
        let cert = unsigned();
        assert_eq!(
            cert.encoded_public_key(),
            key::encode_public_key(&shared_key().to_public_key()).unwrap()
        );
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let rendered = format!("{:?}", unsigned());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("RsaPrivateKey"));
    }
}

//! Loading certificates and keys from configuration.
//!
//! Every material field accepts three forms: literal PEM text, an `http://` / `https://` URL, or a
//! path on the local filesystem. Loaded material is decoded into a [`Certificate`]; failures name
//! the field and the source they came from.

use std::fmt;
use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::cert::Certificate;
use crate::error::{CertError, MaterialField, Result};
use crate::key;
use crate::x509;

const PEM_PREFIX: &str = "-----BEGIN ";

/// Where a piece of material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialSource {
    Inline(String),
    Url(String),
    File(PathBuf),
}

impl MaterialSource {
    /// Inline PEM if the value starts with a PEM header, a URL if it has an HTTP(S) scheme, and a
    /// file path otherwise. Relative paths are resolved against the current directory.
    pub fn classify(value: &str) -> Self {
        let trimmed = value.trim_start();
        if trimmed.starts_with(PEM_PREFIX) {
            MaterialSource::Inline(value.to_string())
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            MaterialSource::Url(trimmed.trim_end().to_string())
        } else {
            let path = PathBuf::from(value);
            MaterialSource::File(std::path::absolute(&path).unwrap_or(path))
        }
    }

    /// Fetches the raw bytes.
    ///
    /// URLs are fetched with a blocking GET without timeout; non-2xx responses are errors.
    pub fn load(&self) -> Result<Vec<u8>> {
        match self {
            MaterialSource::Inline(pem) => Ok(pem.as_bytes().to_vec()),
            MaterialSource::Url(url) => {
                tracing::debug!(%url, "downloading certificate material");
                let download_error = |source: reqwest::Error| CertError::Download {
                    url: url.clone(),
                    source,
                };
                let response = reqwest::blocking::get(url.as_str())
                    .and_then(|response| response.error_for_status())
                    .map_err(download_error)?;
                let body = response.bytes().map_err(download_error)?;
                Ok(body.to_vec())
            }
            MaterialSource::File(path) => {
                tracing::debug!(path = %path.display(), "reading certificate material");
                std::fs::read(path).map_err(|source| CertError::FileRead {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

impl fmt::Display for MaterialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialSource::Inline(_) => f.write_str("inline PEM"),
            MaterialSource::Url(url) => write!(f, "URL {url}"),
            MaterialSource::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Resolves a configured password.
///
/// `$NAME` is replaced by the value of environment variable `NAME` when it is set and non-empty;
/// any other value, including an unresolvable `$NAME`, is used literally.
pub fn resolve_password(configured: &str) -> Zeroizing<String> {
    if let Some(name) = configured.strip_prefix('$')
        && let Ok(value) = std::env::var(name)
        && !value.is_empty()
    {
        return Zeroizing::new(value);
    }
    Zeroizing::new(configured.to_string())
}

/// Structured configuration for a certificate and its key.
///
/// ```
/// use certs::loader::CertificateConfig;
///
/// let config: CertificateConfig = serde_json::from_str(
///     r#"{"cert": "/etc/ca/tls.crt", "privateKey": "https://vault.local/ca.key", "password": "$CA_PASSWORD"}"#,
/// )
/// .unwrap();
/// assert_eq!(config.private_key.as_deref(), Some("https://vault.local/ca.key"));
/// ```
#[derive(Clone, Default, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    #[builder(into)]
    pub cert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing)]
    #[builder(into)]
    pub password: Option<String>,
}

impl fmt::Debug for CertificateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateConfig")
            .field("cert", &self.cert)
            .field("private_key", &self.private_key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CertificateConfig {
    /// Loads and decodes the configured material.
    ///
    /// The certificate field may hold a bundle: the first block is the certificate, the remaining
    /// blocks its issuers from the immediate one up to the root. A configured key must belong to
    /// the certificate.
    pub fn load(&self) -> Result<Certificate> {
        let cert_source = MaterialSource::classify(&self.cert);
        let mut blocks = load_field(MaterialField::Certificate, &cert_source, |bytes| {
            x509::decode_certificate_chain(bytes)
        })?
        .into_iter();
        let Some(leaf) = blocks.next() else {
            return Err(CertError::EmptyInput);
        };
        let mut chain: Vec<Certificate> = blocks.map(Certificate::reference).collect();
        chain.reverse();

        let Some(key_value) = &self.private_key else {
            return Ok(Certificate::from_parts(leaf, None, chain));
        };
        let key_source = MaterialSource::classify(key_value);
        let password = self
            .password
            .as_deref()
            .map(resolve_password)
            .unwrap_or_default();
        let private_key = load_field(MaterialField::PrivateKey, &key_source, |bytes| {
            if password.is_empty() {
                key::decode_private_key(bytes)
            } else {
                key::decrypt_private_key(bytes, &password)
            }
        })?;

        let mut cert = Certificate::with_private_key(leaf, private_key).map_err(|e| {
            CertError::Load {
                field: MaterialField::PrivateKey,
                origin: key_source.to_string(),
                source: Box::new(e),
            }
        })?;
        cert.chain = chain;
        Ok(cert)
    }

    /// The inverse of [`CertificateConfig::load`]: PEM text for both fields, no password.
    pub fn from_certificate(cert: &Certificate) -> Result<Self> {
        let mut bundle = cert.encoded_certificate()?;
        for issuer in cert.chain.iter().rev() {
            bundle.push_str(&issuer.encoded_certificate()?);
        }
        let private_key = cert
            .private_key
            .as_ref()
            .map(key::encode_private_key)
            .transpose()?;
        Ok(Self {
            cert: bundle,
            private_key,
            password: None,
        })
    }
}

fn load_field<T>(
    field: MaterialField,
    source: &MaterialSource,
    decode: impl FnOnce(&[u8]) -> Result<T>,
) -> Result<T> {
    tracing::debug!(%field, %source, "loading material");
    source
        .load()
        .and_then(|bytes| decode(&bytes))
        .map_err(|e| CertError::Load {
            field,
            origin: source.to_string(),
            source: Box::new(e),
        })
}

impl TryFrom<CertificateConfig> for Certificate {
    type Error = CertError;

    fn try_from(config: CertificateConfig) -> Result<Self> {
        config.load()
    }
}

impl Serialize for Certificate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        CertificateConfig::from_certificate(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Certificate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        CertificateConfig::deserialize(deserializer)?
            .load()
            .map_err(serde::de::Error::custom)
    }
}

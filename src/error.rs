//! Error type shared by every module of the crate.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, CertError>;

/// Which piece of key material a loader failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialField {
    Certificate,
    PrivateKey,
}

impl fmt::Display for MaterialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialField::Certificate => f.write_str("certificate"),
            MaterialField::PrivateKey => f.write_str("private key"),
        }
    }
}

/// Represents errors that can occur while decoding, issuing or loading certificates.
#[derive(Debug, Error)]
pub enum CertError {
    /// Nothing to decode.
    #[error("Empty input")]
    EmptyInput,

    /// No PEM block found, or the block is not of the expected type.
    #[error("Malformed PEM: {0}")]
    MalformedPem(String),

    /// The key decoded, but it is not an RSA key.
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// The key parsed in neither PKCS#1 nor PKCS#8 form.
    #[error("Private key is unparseable in either format (PKCS#1: {pkcs1}; PKCS#8: {pkcs8})")]
    KeyParseFailure { pkcs1: String, pkcs8: String },

    /// The secure random source failed.
    #[error("Failed to generate random value: {0}")]
    RandomGeneration(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// A requested validity period ends beyond the representable range of dates.
    #[error("Invalid validity period: {0}")]
    InvalidValidity(String),

    /// Building or signing the DER certificate failed.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// DER bytes did not parse as an X.509 certificate.
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    Encoding(String),

    /// Fetching material over HTTP(S) failed.
    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Reading material from the local filesystem failed.
    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A password protected key could not be decrypted.
    #[error("Failed to decrypt private key: {0}")]
    Decryption(String),

    /// The X.509 structure is an unsigned template and has no DER encoding yet.
    #[error("Certificate has not been signed")]
    Unsigned,

    /// The operation needs a private key and the certificate carries none.
    #[error("Certificate has no private key")]
    MissingPrivateKey,

    /// The private key does not belong to the certificate's public key.
    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    /// Loader failure, annotated with the field and where it was loaded from.
    #[error("Failed to load {field} from {origin}: {source}")]
    Load {
        field: MaterialField,
        origin: String,
        #[source]
        source: Box<CertError>,
    },

    /// Error building a rustls configuration.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl From<der::Error> for CertError {
    /// Converts a `der::Error` into a `CertError`.
    fn from(err: der::Error) -> Self {
        CertError::Encoding(err.to_string())
    }
}

impl From<rustls::Error> for CertError {
    fn from(err: rustls::Error) -> Self {
        CertError::Tls(err.to_string())
    }
}

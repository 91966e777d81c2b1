//! # certs - RSA certificate authority core
//!
//! Issues and manages X.509 certificates for internal infrastructure: build a certificate, sign it
//! with a CA, hand the result to a TLS stack or a secret store, and load existing material back
//! from configuration.
//!
//! ## Key Features
//!
//! - **Builder**: subject fields, DNS and IP subject alternative names, server/client/CA presets
//! - **Signing**: random positive serial numbers, clock-skew tolerant validity windows,
//!   key identifier extensions
//! - **PEM/DER**: lossless certificate re-encoding, PKCS#1 and PKCS#8 keys, password protected keys
//! - **Loading**: inline PEM, HTTP(S) URLs or files, with `$ENV` password indirection
//! - **TLS**: rustls client and server configurations trusting the certificate's own chain
//!
//! Only RSA keys are supported. Any other key type is rejected with
//! [`CertError::UnsupportedKeyType`](error::CertError::UnsupportedKeyType).
//!
//! ## Quick Start
//!
//! ### A CA and a server certificate
//!
//! ```rust,no_run
//! use certs::cert::builder::CertificateBuilder;
//!
//! # fn main() -> certs::error::Result<()> {
//! let ca = CertificateBuilder::new("Example CA")?
//!     .organization(["Example Corp"])
//!     .ca()
//!     .build()?
//!     .self_sign(10)?;
//!
//! let server = CertificateBuilder::new("server.example.com")?
//!     .alt_names(["server.example.com", "192.0.2.10"])
//!     .server_cert()
//!     .build()?;
//! let server = ca.sign_certificate(&server, 1)?;
//!
//! let secret = server.as_key_pair_bytes()?;
//! assert!(secret.contains_key("tls.crt") && secret.contains_key("tls.key"));
//! println!("{}", server.fingerprint()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Loading a CA from configuration
//!
//! ```rust,no_run
//! use certs::cert::Certificate;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ca: Certificate = serde_json::from_str(
//!     r#"{"cert": "/etc/ca/ca.crt", "privateKey": "/etc/ca/ca.key", "password": "$CA_KEY_PASSWORD"}"#,
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use certs::error::CertError;
//! use certs::key::decode_private_key;
//!
//! match decode_private_key(b"") {
//!     Ok(_) => println!("Key imported successfully"),
//!     Err(CertError::EmptyInput) => println!("No key configured"),
//!     Err(CertError::KeyParseFailure { pkcs1, pkcs8 }) => println!("{pkcs1} / {pkcs8}"),
//!     Err(e) => println!("Other error: {e}"),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`cert`]: the [`Certificate`](cert::Certificate) value, builder, extensions and names
//! - [`issuer`]: signing
//! - [`x509`]: the X.509 structure and certificate decoding
//! - [`key`]: RSA key generation, decoding, encoding and decryption
//! - [`loader`]: configuration and material sources
//! - [`tls`]: rustls configurations
//! - [`pem_utils`], [`pki`]: low-level helpers
//! - [`error`]: the crate error type

pub mod cert;
pub mod error;
pub mod issuer;
pub mod key;
pub mod loader;
pub mod pem_utils;
pub mod pki;
pub mod tls;
pub mod x509;

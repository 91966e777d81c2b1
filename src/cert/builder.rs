use std::net::IpAddr;

use der::flagset::FlagSet;
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};

use super::Certificate;
use super::extensions::{ExtendedKeyUsageOption, KeyUsages};
use super::params::{DistinguishedName, Validity};
use crate::error::{CertError, Result};
use crate::key::{self, DEFAULT_RSA_BITS};
use crate::x509::X509Certificate;

const BUILDER_BACKDATE: Duration = Duration::hours(2);
const DAYS_PER_YEAR: i64 = 365;

/// Builds a new, unsigned certificate.
///
/// The result carries a private key and an X.509 template without serial number or signature.
/// Pass it to [`Issuer::sign`](crate::issuer::Issuer::sign) or
/// [`Certificate::sign_certificate`] before using it.
///
/// ```rust,no_run
/// use certs::cert::builder::CertificateBuilder;
///
/// # fn main() -> certs::error::Result<()> {
/// let root = CertificateBuilder::new("root")?.ca().valid_years(10).build()?;
/// let root = root.self_sign(10)?;
///
/// let leaf = CertificateBuilder::new("leaf.example.com")?
///     .alt_names(["leaf.example.com", "10.0.0.1"])
///     .server_cert()
///     .build()?;
/// let leaf = root.sign_certificate(&leaf, 1)?;
/// assert_eq!(leaf.public_chain().len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CertificateBuilder {
    subject: DistinguishedName,
    private_key: RsaPrivateKey,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    key_usage: FlagSet<KeyUsages>,
    extended_key_usage: Vec<ExtendedKeyUsageOption>,
    is_ca: bool,
    valid_years: Option<u32>,
}

impl CertificateBuilder {
    /// Starts a certificate for `common_name` with a fresh 2048-bit RSA key.
    pub fn new(common_name: impl Into<String>) -> Result<Self> {
        let private_key = key::generate_rsa_key(DEFAULT_RSA_BITS)?;
        Ok(Self {
            subject: DistinguishedName {
                common_name: common_name.into(),
                ..Default::default()
            },
            private_key,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            key_usage: FlagSet::default(),
            extended_key_usage: Vec::new(),
            is_ca: false,
            valid_years: None,
        })
    }

    /// Replaces the generated key, e.g. to re-issue a certificate for an existing key.
    pub fn with_key(mut self, private_key: RsaPrivateKey) -> Self {
        self.private_key = private_key;
        self
    }

    pub fn organization<I, S>(mut self, organization: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject.organization = organization.into_iter().map(Into::into).collect();
        self
    }

    pub fn organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.subject.organizational_unit = vec![unit.into()];
        self
    }

    /// Adds subject alternative names. IP literals become IP entries, everything else a DNS name.
    pub fn alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            match name.parse::<IpAddr>() {
                Ok(ip) => self.ip_addresses.push(ip),
                Err(_) => self.dns_names.push(name.to_string()),
            }
        }
        self
    }

    /// Usable for both ends of a TLS connection.
    pub fn server_cert(mut self) -> Self {
        self.extended_key_usage = vec![
            ExtendedKeyUsageOption::ServerAuth,
            ExtendedKeyUsageOption::ClientAuth,
        ];
        self
    }

    /// Usable for client authentication only.
    pub fn client_cert(mut self) -> Self {
        self.extended_key_usage = vec![ExtendedKeyUsageOption::ClientAuth];
        self
    }

    /// Marks the certificate as a CA that may sign end-entity certificates only.
    pub fn ca(mut self) -> Self {
        self.key_usage =
            KeyUsages::KeyEncipherment | KeyUsages::DigitalSignature | KeyUsages::KeyCertSign;
        self.is_ca = true;
        self
    }

    /// Valid from two hours before [`build`](Self::build) for `years` years of 365 days.
    ///
    /// Signing replaces this window with its own.
    pub fn valid_years(mut self, years: u32) -> Self {
        self.valid_years = Some(years);
        self
    }

    /// Fails when the requested validity ends past the last representable date.
    pub fn build(self) -> Result<Certificate> {
        let mut x509 = X509Certificate::new(self.subject.as_x509_name()?);
        if let Some(years) = self.valid_years {
            x509.validity = validity_for_years(years)?;
        }
        x509.key_usage = self.key_usage;
        x509.extended_key_usage = self.extended_key_usage;
        x509.dns_names = self.dns_names;
        x509.ip_addresses = self.ip_addresses;
        if self.is_ca {
            x509.basic_constraints_valid = true;
            x509.is_ca = true;
            x509.max_path_length = Some(0);
        }
        x509.public_key_info = Some(key::public_key_info(&self.private_key.to_public_key())?);
        Ok(Certificate::from_parts(
            x509,
            Some(self.private_key),
            Vec::new(),
        ))
    }
}

fn validity_for_years(years: u32) -> Result<Validity> {
    let now = OffsetDateTime::now_utc();
    let not_after = now
        .checked_add(Duration::days(i64::from(years) * DAYS_PER_YEAR))
        .ok_or_else(|| CertError::InvalidValidity(format!("{years} years from now is out of range")))?;
    Ok(Validity {
        not_before: now - BUILDER_BACKDATE,
        not_after,
    })
}

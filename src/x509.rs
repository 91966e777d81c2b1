use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::SystemTime;

use der::asn1::{GeneralizedTime, OctetString, UtcTime};
use der::flagset::FlagSet;
use der::Decode;
use der::oid::ObjectIdentifier;
use rsa::RsaPublicKey;
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::ext::pkix::name::{GeneralName, GeneralNames};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, KeyUsage,
    KeyUsages, SubjectAltName, SubjectKeyIdentifier, ToAndFromX509Extension,
};
use crate::cert::params::{DistinguishedName, ExtensionParam, Validity};
use crate::error::{CertError, Result};
use crate::pem_utils::{self, CERTIFICATE_LABEL};

/// The X.509 structure of a certificate.
///
/// The same type serves as the template handed to an issuer and as the parsed form of a signed
/// certificate. Only parsed certificates carry their raw DER; a template has `raw() == None`
/// until it has been through [`Issuer::sign`](crate::issuer::Issuer::sign).
///
/// # Fields
/// * `serial_number` - Assigned at signing time when absent.
/// * `subject` / `issuer` - Names, kept in their encoded form so chains compare byte for byte.
/// * `validity` - `notBefore` / `notAfter`.
/// * `key_usage`, `extended_key_usage` - Usage flags.
/// * `basic_constraints_valid`, `is_ca`, `max_path_length` - BasicConstraints extension.
/// * `dns_names`, `ip_addresses`, `other_alt_names` - SubjectAltName entries.
/// * `subject_key_id`, `authority_key_id` - Key identifier extensions.
/// * `authority_cert_issuer`, `authority_cert_serial_number` - The rest of the AKI extension.
/// * `public_key_info` - Subject public key; templates may leave it to be derived from the key.
/// * `extra_extensions` - Extensions without a dedicated field, preserved verbatim.
#[derive(Clone, Debug)]
pub struct X509Certificate {
    pub serial_number: Option<SerialNumber>,
    pub subject: Name,
    pub issuer: Name,
    pub validity: Validity,
    pub key_usage: FlagSet<KeyUsages>,
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    pub basic_constraints_valid: bool,
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub other_alt_names: Vec<GeneralName>,
    pub subject_key_id: Vec<u8>,
    pub authority_key_id: Vec<u8>,
    pub authority_cert_issuer: Option<GeneralNames>,
    pub authority_cert_serial_number: Option<SerialNumber>,
    pub public_key_info: Option<SubjectPublicKeyInfoOwned>,
    pub extra_extensions: Vec<ExtensionParam>,
    criticality: BTreeMap<ObjectIdentifier, bool>,
    raw: Option<Vec<u8>>,
}

impl X509Certificate {
    /// Creates an unsigned template whose issuer is its own subject.
    pub fn new(subject: Name) -> Self {
        Self {
            serial_number: None,
            issuer: subject.clone(),
            subject,
            validity: Validity::for_days(0),
            key_usage: FlagSet::default(),
            extended_key_usage: Vec::new(),
            basic_constraints_valid: false,
            is_ca: false,
            max_path_length: None,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            other_alt_names: Vec::new(),
            subject_key_id: Vec::new(),
            authority_key_id: Vec::new(),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
            public_key_info: None,
            extra_extensions: Vec::new(),
            criticality: BTreeMap::new(),
            raw: None,
        }
    }

    /// Parses a DER encoded certificate. The bytes are kept as the certificate's raw form.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        if der.is_empty() {
            return Err(CertError::EmptyInput);
        }
        let cert = x509_cert::Certificate::from_der(der)
            .map_err(|e| CertError::CertificateParse(e.to_string()))?;
        let tbs = cert.tbs_certificate;

        let mut parsed = Self {
            serial_number: Some(tbs.serial_number),
            subject: tbs.subject,
            issuer: tbs.issuer,
            validity: Validity {
                not_before: from_x509_time(&tbs.validity.not_before),
                not_after: from_x509_time(&tbs.validity.not_after),
            },
            key_usage: FlagSet::default(),
            extended_key_usage: Vec::new(),
            basic_constraints_valid: false,
            is_ca: false,
            max_path_length: None,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            other_alt_names: Vec::new(),
            subject_key_id: Vec::new(),
            authority_key_id: Vec::new(),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
            public_key_info: Some(tbs.subject_public_key_info),
            extra_extensions: Vec::new(),
            criticality: BTreeMap::new(),
            raw: Some(der.to_vec()),
        };

        for ext in tbs.extensions.unwrap_or_default() {
            let param = ExtensionParam {
                oid: ext.extn_id,
                critical: ext.critical,
                value: ext.extn_value.as_bytes().to_vec(),
            };
            parsed.apply_extension(param)?;
        }

        Ok(parsed)
    }

    /// Decodes the first `CERTIFICATE` block of a PEM input.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self> {
        let block = pem_utils::parse_block(pem_bytes)?;
        if block.tag() != CERTIFICATE_LABEL {
            return Err(CertError::MalformedPem(format!(
                "expected a {CERTIFICATE_LABEL} block, found {}",
                block.tag()
            )));
        }
        Self::from_der(block.contents())
    }

    fn apply_extension(&mut self, ext: ExtensionParam) -> Result<()> {
        let (oid, critical) = (ext.oid, ext.critical);
        if ext.oid == BasicConstraints::OID {
            let bc: BasicConstraints = ext.to_extension()?;
            self.basic_constraints_valid = true;
            self.is_ca = bc.is_ca;
            self.max_path_length = bc.max_path_length;
        } else if ext.oid == KeyUsage::OID {
            let ku: KeyUsage = ext.to_extension()?;
            self.key_usage = ku.0;
        } else if ext.oid == ExtendedKeyUsage::OID {
            let eku: ExtendedKeyUsage = ext.to_extension()?;
            self.extended_key_usage = eku.usage;
        } else if ext.oid == SubjectAltName::OID {
            let san: SubjectAltName = ext.to_extension()?;
            self.dns_names = san.dns_names;
            self.ip_addresses = san.ip_addresses;
            self.other_alt_names = san.other_names;
        } else if ext.oid == SubjectKeyIdentifier::OID {
            let ski: SubjectKeyIdentifier = ext.to_extension()?;
            self.subject_key_id = ski.0;
        } else if ext.oid == AuthorityKeyIdentifier::OID {
            let aki: AuthorityKeyIdentifier = ext.to_extension()?;
            self.authority_key_id = aki.key_identifier;
            self.authority_cert_issuer = aki.authority_cert_issuer;
            self.authority_cert_serial_number = aki.authority_cert_serial_number;
        } else {
            self.extra_extensions.push(ext);
            return Ok(());
        }
        self.criticality.insert(oid, critical);
        Ok(())
    }

    /// Overrides the criticality written for one of the modelled extensions.
    ///
    /// Parsing records the flag each extension was found with, so re-signing keeps it.
    pub fn set_critical(&mut self, oid: ObjectIdentifier, critical: bool) {
        self.criticality.insert(oid, critical);
    }

    fn is_critical(&self, oid: ObjectIdentifier, default: bool) -> bool {
        self.criticality.get(&oid).copied().unwrap_or(default)
    }

    /// DER of a signed certificate; `None` for templates.
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn is_signed(&self) -> bool {
        self.raw.is_some()
    }

    /// PEM `CERTIFICATE` block built from the raw DER.
    pub fn to_pem(&self) -> Result<String> {
        let raw = self.raw().ok_or(CertError::Unsigned)?;
        Ok(pem_utils::der_to_pem(raw, CERTIFICATE_LABEL))
    }

    pub fn subject_name(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.subject)
    }

    pub fn issuer_name(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.issuer)
    }

    /// RSA public key embedded in the certificate, if any.
    pub fn public_key(&self) -> Result<Option<RsaPublicKey>> {
        self.public_key_info
            .as_ref()
            .map(crate::key::rsa_public_key)
            .transpose()
    }

    pub fn subject_alt_name(&self) -> SubjectAltName {
        SubjectAltName {
            dns_names: self.dns_names.clone(),
            ip_addresses: self.ip_addresses.clone(),
            other_names: self.other_alt_names.clone(),
        }
    }

    /// Extensions in the order they are written into a signed certificate.
    ///
    /// Basic constraints and key usage default to critical, the others to non-critical.
    pub fn extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut extensions = Vec::new();
        if self.basic_constraints_valid {
            let bc = BasicConstraints {
                is_ca: self.is_ca,
                max_path_length: self.max_path_length,
            };
            extensions.push(ExtensionParam::from_extension(
                &bc,
                self.is_critical(BasicConstraints::OID, true),
            )?);
        }
        if !self.key_usage.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                &KeyUsage(self.key_usage),
                self.is_critical(KeyUsage::OID, true),
            )?);
        }
        if !self.extended_key_usage.is_empty() {
            let eku = ExtendedKeyUsage {
                usage: self.extended_key_usage.clone(),
            };
            extensions.push(ExtensionParam::from_extension(
                &eku,
                self.is_critical(ExtendedKeyUsage::OID, false),
            )?);
        }
        let san = self.subject_alt_name();
        if !san.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                &san,
                self.is_critical(SubjectAltName::OID, false),
            )?);
        }
        if !self.subject_key_id.is_empty() {
            let ski = SubjectKeyIdentifier(self.subject_key_id.clone());
            extensions.push(ExtensionParam::from_extension(
                &ski,
                self.is_critical(SubjectKeyIdentifier::OID, false),
            )?);
        }
        if !self.authority_key_id.is_empty()
            || self.authority_cert_issuer.is_some()
            || self.authority_cert_serial_number.is_some()
        {
            let aki = AuthorityKeyIdentifier {
                key_identifier: self.authority_key_id.clone(),
                authority_cert_issuer: self.authority_cert_issuer.clone(),
                authority_cert_serial_number: self.authority_cert_serial_number.clone(),
            };
            extensions.push(ExtensionParam::from_extension(
                &aki,
                self.is_critical(AuthorityKeyIdentifier::OID, false),
            )?);
        }
        extensions.extend(self.extra_extensions.iter().cloned());
        Ok(extensions)
    }

    /// Converts the template into a `TbsCertificateInner` for DER encoding.
    ///
    /// Serial number and public key must already be present.
    pub(crate) fn to_tbs_certificate_inner(
        &self,
        signature: AlgorithmIdentifierOwned,
    ) -> Result<TbsCertificateInner> {
        let serial_number = self
            .serial_number
            .clone()
            .ok_or_else(|| CertError::Signing("certificate has no serial number".to_string()))?;
        let subject_public_key_info = self
            .public_key_info
            .clone()
            .ok_or_else(|| CertError::Signing("certificate has no public key".to_string()))?;

        let extensions = self
            .extensions()?
            .into_iter()
            .map(|ext| {
                Ok(x509_cert::ext::Extension {
                    extn_id: ext.oid,
                    critical: ext.critical,
                    extn_value: OctetString::new(ext.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let validity = x509_cert::time::Validity {
            not_before: to_x509_time(self.validity.not_before)?,
            not_after: to_x509_time(self.validity.not_after)?,
        };

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number,
            signature,
            issuer: self.issuer.clone(),
            validity,
            subject: self.subject.clone(),
            subject_public_key_info,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!extensions.is_empty()).then_some(extensions),
        })
    }
}

/// Decode the first certificate of a PEM input.
///
/// Fails with [`CertError::EmptyInput`] on empty input, [`CertError::MalformedPem`] when no PEM block
/// is present and [`CertError::CertificateParse`] when the payload is not an X.509 certificate.
pub fn decode_certificate(pem_bytes: &[u8]) -> Result<X509Certificate> {
    X509Certificate::from_pem(pem_bytes)
}

/// Decode every `CERTIFICATE` block of a PEM bundle, in input order.
pub fn decode_certificate_chain(pem_bytes: &[u8]) -> Result<Vec<X509Certificate>> {
    pem_utils::parse_blocks(pem_bytes, CERTIFICATE_LABEL)?
        .iter()
        .map(|block| X509Certificate::from_der(block.contents()))
        .collect()
}

/// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050 on.
fn to_x509_time(at: OffsetDateTime) -> Result<x509_cert::time::Time> {
    let system: SystemTime = at.into();
    if at.year() < 2050 {
        Ok(x509_cert::time::Time::UtcTime(
            UtcTime::from_system_time(system).map_err(|e| CertError::Signing(e.to_string()))?,
        ))
    } else {
        Ok(x509_cert::time::Time::GeneralTime(
            GeneralizedTime::from_system_time(system)
                .map_err(|e| CertError::Signing(e.to_string()))?,
        ))
    }
}

fn from_x509_time(at: &x509_cert::time::Time) -> OffsetDateTime {
    match at {
        x509_cert::time::Time::UtcTime(ut) => OffsetDateTime::from(ut.to_system_time()),
        x509_cert::time::Time::GeneralTime(gt) => OffsetDateTime::from(gt.to_system_time()),
    }
}

/// Minimal positive two's complement encoding of `value`, as an INTEGER body.
pub(crate) fn positive_integer_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

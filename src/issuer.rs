use der::flagset::FlagSet;
use rsa::RsaPrivateKey;
use sha1::Sha1;
use time::{Duration, OffsetDateTime};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::Certificate;
use crate::cert::extensions::KeyUsages;
use crate::error::{CertError, Result};
use crate::pki;
use crate::x509::X509Certificate;

/// Backdating applied to every signed certificate to absorb clock skew between signer and verifier.
pub const CLOCK_SKEW_MARGIN: Duration = Duration::minutes(15);

/// Days per year of requested lifetime in [`Certificate::sign_certificate`].
pub const SIGNING_DAYS_PER_YEAR: i64 = 364;

/// Represents an entity capable of issuing certificates.
pub trait Issuer {
    /// The certificate whose subject becomes the issuer of signed certificates.
    fn issuer_certificate(&self) -> &X509Certificate;

    /// The key that signs issued certificates.
    fn signing_key(&self) -> Result<&RsaPrivateKey>;

    /// Signs `target`'s X.509 structure for `duration` from now.
    ///
    /// - a random positive serial number is assigned when the target has none;
    /// - the window is always rewritten to `[now - 15min, now + duration]`;
    /// - key usage defaults to key encipherment plus digital signature;
    /// - the public key comes from the target's private key when the structure has none.
    ///
    /// The signed DER is parsed back, so the result is exactly what any other parser sees.
    fn sign(&self, target: &Certificate, duration: Duration) -> Result<X509Certificate> {
        let signing_key = self.signing_key()?;
        let issuer = self.issuer_certificate();
        let mut x509 = target.x509.clone();

        if x509.serial_number.is_none() {
            x509.serial_number = Some(pki::random_serial_number()?);
        }

        let now = OffsetDateTime::now_utc();
        x509.validity.not_before = now - CLOCK_SKEW_MARGIN;
        x509.validity.not_after = now
            .checked_add(duration)
            .ok_or_else(|| CertError::Signing("validity window out of range".to_string()))?;

        if x509.key_usage.is_empty() {
            x509.key_usage = default_key_usage();
        }

        let public_key_info = target.subject_public_key_info()?;
        if x509.is_ca && x509.subject_key_id.is_empty() {
            x509.subject_key_id = key_identifier(&public_key_info);
        }
        x509.public_key_info = Some(public_key_info);

        x509.issuer = issuer.subject.clone();
        x509.authority_key_id = if issuer.subject_key_id.is_empty() {
            match &issuer.public_key_info {
                Some(info) => key_identifier(info),
                None => key_identifier(&crate::key::public_key_info(
                    &signing_key.to_public_key(),
                )?),
            }
        } else {
            issuer.subject_key_id.clone()
        };
        x509.authority_cert_issuer = None;
        x509.authority_cert_serial_number = None;

        tracing::debug!(
            subject = %x509.subject,
            issuer = %x509.issuer,
            serial = ?x509.serial_number,
            not_before = %x509.validity.not_before,
            not_after = %x509.validity.not_after,
            "signing certificate"
        );

        let tbs = x509.to_tbs_certificate_inner(pki::sha256_with_rsa())?;
        let der = pki::assemble_certificate(tbs, signing_key)?;
        X509Certificate::from_der(&der).map_err(|e| match e {
            CertError::CertificateParse(message) => CertError::CertificateParse(format!(
                "freshly signed certificate failed to parse: {message}"
            )),
            other => other,
        })
    }
}

impl Issuer for Certificate {
    fn issuer_certificate(&self) -> &X509Certificate {
        &self.x509
    }

    fn signing_key(&self) -> Result<&RsaPrivateKey> {
        self.private_key.as_ref().ok_or(CertError::MissingPrivateKey)
    }
}

impl Certificate {
    /// Signs `target` for `expiry_years` years of 364 days.
    ///
    /// The result keeps the target's private key and carries this certificate's chain followed by
    /// this certificate, reference-only.
    pub fn sign_certificate(&self, target: &Certificate, expiry_years: u32) -> Result<Certificate> {
        let signed = self.sign(target, signing_duration(expiry_years))?;
        let mut chain: Vec<Certificate> = self.chain.iter().map(Certificate::to_reference).collect();
        chain.push(Certificate::reference(self.x509.clone()));
        Ok(Certificate::from_parts(
            signed,
            target.private_key.clone(),
            chain,
        ))
    }

    /// Signs this certificate with its own key, e.g. to turn a built CA into a root.
    pub fn self_sign(&self, years: u32) -> Result<Certificate> {
        let signed = self.sign(self, signing_duration(years))?;
        Ok(Certificate::from_parts(
            signed,
            self.private_key.clone(),
            Vec::new(),
        ))
    }
}

fn signing_duration(years: u32) -> Duration {
    Duration::days(i64::from(years) * SIGNING_DAYS_PER_YEAR)
}

fn default_key_usage() -> FlagSet<KeyUsages> {
    KeyUsages::KeyEncipherment | KeyUsages::DigitalSignature
}

/// RFC 5280 method 1 key identifier: SHA-1 of the subjectPublicKey bits.
pub(crate) fn key_identifier(info: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    <Sha1 as sha1::Digest>::digest(info.subject_public_key.raw_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::builder::CertificateBuilder;
    use crate::key::tests::shared_key;

    fn root() -> Certificate {
        CertificateBuilder::new("root")
            .unwrap()
            .with_key(shared_key().clone())
            .ca()
            .valid_years(10)
            .build()
            .unwrap()
            .self_sign(10)
            .unwrap()
    }

    #[test]
    fn test_sign_rewrites_builder_window() {
        let template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .valid_years(5)
            .build()
            .unwrap();
        let before = OffsetDateTime::now_utc();
        let signed = root().sign(&template, Duration::days(30)).unwrap();
        let validity = signed.validity;
        let expected_start = before - CLOCK_SKEW_MARGIN;
        assert!((validity.not_before - expected_start).abs() <= Duration::seconds(2));
        assert!((validity.duration() - (Duration::days(30) + CLOCK_SKEW_MARGIN)).abs() <= Duration::seconds(1));
    }

    #[test]
    fn test_sign_defaults_key_usage() {
        let template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap();
        let signed = root().sign(&template, Duration::days(1)).unwrap();
        assert_eq!(signed.key_usage, default_key_usage());
        assert!(signed.is_signed());
        assert!(signed.serial_number.is_some());
    }

    #[test]
    fn test_preset_serial_is_kept() {
        let mut template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap();
        let serial = x509_cert::serial_number::SerialNumber::new(&[0x42]).unwrap();
        template.x509.serial_number = Some(serial.clone());
        let signed = root().sign(&template, Duration::days(1)).unwrap();
        assert_eq!(signed.serial_number, Some(serial));
    }

    #[test]
    fn test_key_identifiers_link_leaf_to_root() {
        let root = root();
        assert!(!root.x509.subject_key_id.is_empty());
        assert_eq!(root.x509.authority_key_id, root.x509.subject_key_id);

        let template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap();
        let leaf = root.sign_certificate(&template, 1).unwrap();
        assert!(leaf.x509.subject_key_id.is_empty());
        assert_eq!(leaf.x509.authority_key_id, root.x509.subject_key_id);
    }

    #[test]
    fn test_lifetime_past_year_9999_is_an_error() {
        let root = root();
        let template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap();
        assert!(matches!(
            root.sign_certificate(&template, 10_000),
            Err(CertError::Signing(_))
        ));
        assert!(matches!(
            root.sign(&template, Duration::MAX),
            Err(CertError::Signing(_))
        ));
    }

    #[test]
    fn test_signer_without_key_fails() {
        let reference = root().to_reference();
        let template = CertificateBuilder::new("leaf")
            .unwrap()
            .with_key(shared_key().clone())
            .build()
            .unwrap();
        assert!(matches!(
            reference.sign_certificate(&template, 1),
            Err(CertError::MissingPrivateKey)
        ));
    }
}

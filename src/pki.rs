use der::asn1::{AnyRef, BitString};
use der::{Any, Encode};
use rand_core::RngCore;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{SignatureEncoding, Signer as RsaSigner};
use sha2::Sha256;
use x509_cert::certificate::{CertificateInner, TbsCertificateInner};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{CertError, Result};
use crate::x509::positive_integer_bytes;

/// Signs the provided data with RSA PKCS#1 v1.5 over SHA-256.
pub fn sign_data(data: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let signing_key: RsaSigningKey<Sha256> = RsaSigningKey::new(key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| CertError::Signing(e.to_string()))?;
    Ok(signature.to_vec())
}

/// `sha256WithRSAEncryption` with the explicit NULL parameters RFC 4055 asks for.
pub fn sha256_with_rsa() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
        parameters: Some(Any::from(AnyRef::NULL)),
    }
}

/// Random serial number in `[1, 2^63)` drawn from the operating system RNG.
pub fn random_serial_number() -> Result<SerialNumber> {
    random_serial_number_with(&mut rand_core::OsRng)
}

/// Same as [`random_serial_number`] with a caller supplied RNG.
pub fn random_serial_number_with<R: RngCore>(rng: &mut R) -> Result<SerialNumber> {
    loop {
        let mut bytes = [0u8; 8];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| CertError::RandomGeneration(e.to_string()))?;
        let value = u64::from_be_bytes(bytes) >> 1;
        if value == 0 {
            continue;
        }
        return SerialNumber::new(&positive_integer_bytes(value))
            .map_err(|e| CertError::RandomGeneration(e.to_string()));
    }
}

/// Signs `tbs` and assembles the DER encoded certificate.
pub fn assemble_certificate(tbs: TbsCertificateInner, key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let tbs_der = tbs.to_der().map_err(signing_error)?;
    let signature = sign_data(&tbs_der, key)?;
    let cert = CertificateInner {
        signature_algorithm: tbs.signature.clone(),
        tbs_certificate: tbs,
        signature: BitString::from_bytes(&signature).map_err(signing_error)?,
    };
    cert.to_der().map_err(signing_error)
}

fn signing_error(err: der::Error) -> CertError {
    CertError::Signing(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::num::NonZeroU32;

    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    use super::*;
    use crate::key::tests::shared_key;

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
            Err(rand_core::Error::from(
                NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap(),
            ))
        }
    }

    /// Yields zero first, then a fixed non-zero value.
    struct ZeroThenOnes {
        calls: usize,
    }

    impl RngCore for ZeroThenOnes {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            let byte = if self.calls == 0 { 0 } else { 0xff };
            self.calls += 1;
            dest.fill(byte);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_sign_data_verifies() {
        let signature = sign_data(b"hello", shared_key()).unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(shared_key().to_public_key());
        let signature = Signature::try_from(signature.as_slice()).unwrap();
        assert!(verifying_key.verify(b"hello", &signature).is_ok());
    }

    #[test]
    fn test_serial_numbers_are_positive_and_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let serial = random_serial_number().unwrap();
            let bytes = serial.as_bytes();
            assert!(bytes[0] & 0x80 == 0, "serial must be positive");
            assert!(bytes.len() <= 9);
            assert!(bytes.iter().any(|b| *b != 0));
            assert!(seen.insert(bytes.to_vec()));
        }
    }

    #[test]
    fn test_zero_serial_is_redrawn() {
        let serial = random_serial_number_with(&mut ZeroThenOnes { calls: 0 }).unwrap();
        assert_eq!(
            serial.as_bytes(),
            &[0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_rng_failure_is_reported() {
        assert!(matches!(
            random_serial_number_with(&mut FailingRng),
            Err(CertError::RandomGeneration(_))
        ));
    }

    #[test]
    fn test_signature_algorithm_has_null_parameters() {
        let alg = sha256_with_rsa();
        assert_eq!(alg.oid.to_string(), "1.2.840.113549.1.1.11");
        assert_eq!(alg.to_der().unwrap(), hex::decode("300d06092a864886f70d01010b0500").unwrap());
    }
}

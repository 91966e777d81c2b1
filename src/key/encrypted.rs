//! Password protected private keys.
//!
//! Two containers are understood:
//! - the legacy OpenSSL "traditional" format, a `RSA PRIVATE KEY` block carrying
//!   `Proc-Type: 4,ENCRYPTED` and `DEK-Info` headers, encrypted with AES-CBC under an
//!   MD5 `EVP_BytesToKey` derived key;
//! - PKCS#8 `ENCRYPTED PRIVATE KEY` blocks (PBES2).

use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use md5::{Digest, Md5};
use rand_core::RngCore;
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

use super::{decode_private_key, decode_private_key_der, private_key_der};
use crate::error::{CertError, Result};
use crate::pem_utils::{self, ENCRYPTED_PRIVATE_KEY_LABEL, RSA_PRIVATE_KEY_LABEL};

const PROC_TYPE: &str = "Proc-Type";
const DEK_INFO: &str = "DEK-Info";
const PROC_TYPE_ENCRYPTED: &str = "4,ENCRYPTED";
const IV_LEN: usize = 16;
const SALT_LEN: usize = 8;

/// Block ciphers supported in legacy encrypted PEM blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyPemCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl LegacyPemCipher {
    /// Name as written in the `DEK-Info` header.
    pub fn name(self) -> &'static str {
        match self {
            LegacyPemCipher::Aes128Cbc => "AES-128-CBC",
            LegacyPemCipher::Aes192Cbc => "AES-192-CBC",
            LegacyPemCipher::Aes256Cbc => "AES-256-CBC",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "AES-128-CBC" => Some(LegacyPemCipher::Aes128Cbc),
            "AES-192-CBC" => Some(LegacyPemCipher::Aes192Cbc),
            "AES-256-CBC" => Some(LegacyPemCipher::Aes256Cbc),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            LegacyPemCipher::Aes128Cbc => 16,
            LegacyPemCipher::Aes192Cbc => 24,
            LegacyPemCipher::Aes256Cbc => 32,
        }
    }

    fn decrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let plain = match self {
            LegacyPemCipher::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
            LegacyPemCipher::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
            LegacyPemCipher::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .decrypt_padded_vec_mut::<Pkcs7>(data),
        };
        // Bad padding is the only signal a wrong password gives in this format.
        plain.map_err(|_| CertError::Decryption("incorrect password".to_string()))
    }

    fn encrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let encrypted = match self {
            LegacyPemCipher::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            LegacyPemCipher::Aes192Cbc => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            LegacyPemCipher::Aes256Cbc => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
                .map_err(invalid_length)?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
        };
        Ok(encrypted)
    }
}

fn invalid_length(err: cbc::cipher::InvalidLength) -> CertError {
    CertError::Decryption(err.to_string())
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
fn derive_key(password: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(len + 16));
    let mut previous: Vec<u8> = Vec::new();
    while key.len() < len {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(password);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        key.extend_from_slice(&previous);
    }
    key.truncate(len);
    key
}

/// Decrypt a password protected PEM private key.
///
/// An empty password is not an error: a warning is logged and the block is decoded as if it were
/// unencrypted, which fails with [`CertError::KeyParseFailure`] if it actually was encrypted.
pub fn decrypt_private_key(pem_bytes: &[u8], password: &str) -> Result<RsaPrivateKey> {
    if password.is_empty() {
        tracing::warn!("no password supplied for private key, decoding without decryption");
        return decode_private_key(pem_bytes);
    }

    let block = pem_utils::parse_block(pem_bytes)?;

    if block.tag() == ENCRYPTED_PRIVATE_KEY_LABEL {
        let info = pkcs8::EncryptedPrivateKeyInfo::try_from(block.contents())
            .map_err(|e| CertError::Decryption(e.to_string()))?;
        let document = info
            .decrypt(password)
            .map_err(|e| CertError::Decryption(e.to_string()))?;
        return decode_private_key_der(document.as_bytes());
    }

    if block.headers().get(PROC_TYPE) != Some(PROC_TYPE_ENCRYPTED) {
        return Err(CertError::Decryption(format!(
            "{} block is not encrypted",
            block.tag()
        )));
    }

    let dek_info = block
        .headers()
        .get(DEK_INFO)
        .ok_or_else(|| CertError::Decryption("missing DEK-Info header".to_string()))?;
    let (cipher_name, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| CertError::Decryption(format!("malformed DEK-Info header: {dek_info}")))?;
    let cipher = LegacyPemCipher::from_name(cipher_name.trim())
        .ok_or_else(|| CertError::Decryption(format!("unsupported cipher {cipher_name}")))?;
    let iv = hex::decode(iv_hex.trim()).map_err(|e| CertError::Decryption(e.to_string()))?;
    if iv.len() != IV_LEN {
        return Err(CertError::Decryption(format!(
            "expected a {IV_LEN} byte IV, found {}",
            iv.len()
        )));
    }

    let key = derive_key(password.as_bytes(), &iv[..SALT_LEN], cipher.key_len());
    let der = Zeroizing::new(cipher.decrypt(&key, &iv, block.contents())?);
    decode_private_key_der(&der)
}

/// Encrypt `key` into a legacy OpenSSL encrypted `RSA PRIVATE KEY` PEM block.
pub fn encrypt_private_key(
    key: &RsaPrivateKey,
    password: &str,
    cipher: LegacyPemCipher,
) -> Result<String> {
    if password.is_empty() {
        return Err(CertError::Encoding(
            "refusing to encrypt a private key with an empty password".to_string(),
        ));
    }

    let mut iv = [0u8; IV_LEN];
    rand_core::OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CertError::RandomGeneration(e.to_string()))?;

    let derived = derive_key(password.as_bytes(), &iv[..SALT_LEN], cipher.key_len());
    let der = Zeroizing::new(private_key_der(key)?);
    let encrypted = cipher.encrypt(&derived, &iv, &der)?;

    // Headers go between the BEGIN line and the base64 body, followed by a blank line.
    let body = pem_utils::der_to_pem(&encrypted, RSA_PRIVATE_KEY_LABEL);
    let (begin, rest) = body
        .split_once('\n')
        .ok_or_else(|| CertError::Encoding("unexpected PEM layout".to_string()))?;
    Ok(format!(
        "{begin}\n{PROC_TYPE}: {PROC_TYPE_ENCRYPTED}\n{DEK_INFO}: {},{}\n\n{rest}",
        cipher.name(),
        hex::encode_upper(iv)
    ))
}

#[cfg(test)]
mod tests {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    use super::*;
    use crate::key::tests::shared_key;

    #[test]
    fn test_legacy_round_trip_for_every_cipher() {
        for cipher in [
            LegacyPemCipher::Aes128Cbc,
            LegacyPemCipher::Aes192Cbc,
            LegacyPemCipher::Aes256Cbc,
        ] {
            let pem = encrypt_private_key(shared_key(), "hunter2", cipher).unwrap();
            assert!(pem.contains("Proc-Type: 4,ENCRYPTED"));
            assert!(pem.contains(cipher.name()));
            let decrypted = decrypt_private_key(pem.as_bytes(), "hunter2").unwrap();
            assert_eq!(&decrypted, shared_key());
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let pem = encrypt_private_key(shared_key(), "right", LegacyPemCipher::Aes256Cbc).unwrap();
        assert!(decrypt_private_key(pem.as_bytes(), "wrong").is_err());
    }

    #[test]
    fn test_missing_password_falls_back_to_plain_decode() {
        let plain = crate::key::encode_private_key(shared_key()).unwrap();
        let decoded = decrypt_private_key(plain.as_bytes(), "").unwrap();
        assert_eq!(&decoded, shared_key());

        // The fallback cannot read an encrypted body; the failure surfaces as a parse error.
        let encrypted =
            encrypt_private_key(shared_key(), "secret", LegacyPemCipher::Aes128Cbc).unwrap();
        assert!(matches!(
            decrypt_private_key(encrypted.as_bytes(), ""),
            Err(CertError::KeyParseFailure { .. })
        ));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs.text())
    }

    #[test]
    fn test_missing_password_logs_a_warning() {
        let plain = crate::key::encode_private_key(shared_key()).unwrap();
        let (decoded, logs) = with_captured_logs(|| decrypt_private_key(plain.as_bytes(), ""));
        assert_eq!(&decoded.unwrap(), shared_key());
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("no password supplied for private key"), "{logs}");

        let encrypted =
            encrypt_private_key(shared_key(), "secret", LegacyPemCipher::Aes128Cbc).unwrap();
        let (decoded, logs) =
            with_captured_logs(|| decrypt_private_key(encrypted.as_bytes(), "secret"));
        assert_eq!(&decoded.unwrap(), shared_key());
        assert!(!logs.contains("no password supplied"), "{logs}");
    }

    #[test]
    fn test_password_on_plain_block_is_rejected() {
        let plain = crate::key::encode_private_key(shared_key()).unwrap();
        assert!(matches!(
            decrypt_private_key(plain.as_bytes(), "secret"),
            Err(CertError::Decryption(_))
        ));
    }

    #[test]
    fn test_encrypted_pkcs8() {
        let pem = shared_key()
            .to_pkcs8_encrypted_pem(&mut rand_core::OsRng, "pkcs8-secret", LineEnding::LF)
            .unwrap();
        let decrypted = decrypt_private_key(pem.as_bytes(), "pkcs8-secret").unwrap();
        assert_eq!(&decrypted, shared_key());
        assert!(matches!(
            decrypt_private_key(pem.as_bytes(), "nope"),
            Err(CertError::Decryption(_))
        ));
    }

    #[test]
    fn test_derive_key_chains_md5_blocks() {
        let salt = [1, 2, 3, 4, 5, 6, 7, 8];
        let key = derive_key(b"password", &salt, 16);
        let first = Md5::new()
            .chain_update(b"password")
            .chain_update(salt)
            .finalize();
        assert_eq!(&key[..], first.as_slice());

        let longer = derive_key(b"password", &salt, 32);
        let second = Md5::new()
            .chain_update(first)
            .chain_update(b"password")
            .chain_update(salt)
            .finalize();
        assert_eq!(&longer[..16], first.as_slice());
        assert_eq!(&longer[16..], second.as_slice());
    }
}

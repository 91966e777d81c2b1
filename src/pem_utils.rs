use crate::error::{CertError, Result};

/// PEM label for X.509 certificates.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
/// PEM label for PKCS#1 RSA private keys.
pub const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";
/// PEM label for PKCS#8 encrypted private keys.
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
/// PEM label for SubjectPublicKeyInfo public keys.
pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(
        &pem,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Convert a PEM‑encoded string to DER‑encoded bytes.
pub fn pem_to_der(pem_str: &str) -> std::result::Result<Vec<u8>, pem::PemError> {
    let pem = pem::parse(pem_str)?;
    Ok(pem.contents().to_vec())
}

/// Parse the first PEM block in `input`.
///
/// Empty input is reported as [`CertError::EmptyInput`] rather than a PEM error so callers can
/// tell "nothing configured" apart from "garbage configured".
pub fn parse_block(input: &[u8]) -> Result<pem::Pem> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Err(CertError::EmptyInput);
    }
    pem::parse(input).map_err(|e| CertError::MalformedPem(e.to_string()))
}

/// Parse every PEM block in `input` that carries `label`, in order.
pub fn parse_blocks(input: &[u8], label: &str) -> Result<Vec<pem::Pem>> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Err(CertError::EmptyInput);
    }
    let blocks: Vec<pem::Pem> = pem::parse_many(input)
        .map_err(|e| CertError::MalformedPem(e.to_string()))?
        .into_iter()
        .filter(|block| block.tag() == label)
        .collect();
    if blocks.is_empty() {
        return Err(CertError::MalformedPem(format!("no {label} block found")));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_der_pem_round_trip() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let pem = der_to_pem(&der, CERTIFICATE_LABEL);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(!pem.contains('\r'));
        assert_eq!(pem_to_der(&pem).unwrap(), der);
    }

    #[test]
    fn test_parse_block_rejects_empty_and_garbage() {
        assert!(matches!(parse_block(b""), Err(CertError::EmptyInput)));
        assert!(matches!(parse_block(b"  \n"), Err(CertError::EmptyInput)));
        assert!(matches!(
            parse_block(b"not a pem block"),
            Err(CertError::MalformedPem(_))
        ));
    }

    #[test]
    fn test_parse_blocks_filters_by_label() {
        let input = format!(
            "{}{}{}",
            der_to_pem(&[1, 2, 3], CERTIFICATE_LABEL),
            der_to_pem(&[4, 5], RSA_PRIVATE_KEY_LABEL),
            der_to_pem(&[6], CERTIFICATE_LABEL)
        );
        let blocks = parse_blocks(input.as_bytes(), CERTIFICATE_LABEL).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].contents(), &[6]);

        let err = parse_blocks(input.as_bytes(), PUBLIC_KEY_LABEL).unwrap_err();
        assert!(matches!(err, CertError::MalformedPem(_)));
    }
}

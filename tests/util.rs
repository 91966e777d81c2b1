#![allow(dead_code)]

use std::sync::OnceLock;

use certs::cert::Certificate;
use certs::cert::builder::CertificateBuilder;

/// Root CA shared by the tests of one binary.
pub fn shared_ca() -> &'static Certificate {
    static CA: OnceLock<Certificate> = OnceLock::new();
    CA.get_or_init(generate_ca_cert)
}

pub fn generate_ca_cert() -> Certificate {
    CertificateBuilder::new("myca.local")
        .unwrap()
        .organization(["My CA"])
        .ca()
        .valid_years(10)
        .build()
        .unwrap()
        .self_sign(10)
        .unwrap()
}

pub fn generate_server_cert(ca: &Certificate, name: &str) -> Certificate {
    let template = CertificateBuilder::new(name)
        .unwrap()
        .alt_names([name, "127.0.0.1"])
        .server_cert()
        .build()
        .unwrap();
    ca.sign_certificate(&template, 1).unwrap()
}

pub fn generate_client_cert(ca: &Certificate, name: &str) -> Certificate {
    let template = CertificateBuilder::new(name)
        .unwrap()
        .client_cert()
        .build()
        .unwrap();
    ca.sign_certificate(&template, 1).unwrap()
}

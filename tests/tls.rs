mod util;

use std::io::{Read, Write};
use std::sync::Arc;

use certs::cert::builder::CertificateBuilder;
use certs::error::CertError;
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ServerConnection};

/// Moves TLS records between the two ends until neither has anything left to send.
fn pump(client: &mut ClientConnection, server: &mut ServerConnection) -> Result<(), rustls::Error> {
    loop {
        let mut progressed = false;

        let mut buf = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut buf).unwrap();
        }
        let mut pending = &buf[..];
        while !pending.is_empty() {
            server.read_tls(&mut pending).unwrap();
            server.process_new_packets()?;
            progressed = true;
        }

        let mut buf = Vec::new();
        while server.wants_write() {
            server.write_tls(&mut buf).unwrap();
        }
        let mut pending = &buf[..];
        while !pending.is_empty() {
            client.read_tls(&mut pending).unwrap();
            client.process_new_packets()?;
            progressed = true;
        }

        if !progressed {
            return Ok(());
        }
    }
}

#[test]
fn mutual_tls_handshake_between_issued_certificates() {
    let ca = util::shared_ca();
    let server_cert = util::generate_server_cert(ca, "server.myca.local");
    let client_cert = util::generate_client_cert(ca, "client.myca.local");

    let server_config = server_cert
        .as_tls_configuration()
        .unwrap()
        .server_config()
        .unwrap();
    let client_config = client_cert
        .as_tls_configuration()
        .unwrap()
        .client_config()
        .unwrap();

    let mut server = ServerConnection::new(Arc::new(server_config)).unwrap();
    let mut client = ClientConnection::new(
        Arc::new(client_config),
        ServerName::try_from("server.myca.local").unwrap(),
    )
    .unwrap();

    pump(&mut client, &mut server).unwrap();
    assert!(!client.is_handshaking());
    assert!(!server.is_handshaking());

    let presented = server.peer_certificates().unwrap();
    assert_eq!(presented[0].as_ref(), client_cert.x509.raw().unwrap());

    client.writer().write_all(b"ping").unwrap();
    pump(&mut client, &mut server).unwrap();
    let mut received = [0u8; 4];
    server.reader().read_exact(&mut received).unwrap();
    assert_eq!(&received, b"ping");
}

#[test]
fn client_from_another_ca_is_rejected() {
    let ca = util::shared_ca();
    let server_cert = util::generate_server_cert(ca, "server.myca.local");

    let other_ca = util::generate_ca_cert();
    let mut intruder = util::generate_client_cert(&other_ca, "intruder.local");
    // Trust the real CA so only the server side can object.
    intruder.chain = vec![ca.to_reference()];

    let server_config = server_cert
        .as_tls_configuration()
        .unwrap()
        .server_config()
        .unwrap();
    let client_config = intruder
        .as_tls_configuration()
        .unwrap()
        .client_config()
        .unwrap();

    let mut server = ServerConnection::new(Arc::new(server_config)).unwrap();
    let mut client = ClientConnection::new(
        Arc::new(client_config),
        ServerName::try_from("server.myca.local").unwrap(),
    )
    .unwrap();

    assert!(pump(&mut client, &mut server).is_err());
}

#[test]
fn tls_configuration_layout() {
    let ca = util::shared_ca();
    let server_cert = util::generate_server_cert(ca, "layout.myca.local");
    let tls = server_cert.as_tls_configuration().unwrap();

    assert_eq!(tls.roots().len(), 2);
    let chain = tls.cert_chain();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].as_ref(), server_cert.x509.raw().unwrap());
    assert_eq!(chain[1].as_ref(), ca.x509.raw().unwrap());
}

#[test]
fn tls_configuration_needs_signed_keyed_certificate() {
    let reference = util::shared_ca().to_reference();
    assert!(matches!(
        reference.as_tls_configuration(),
        Err(CertError::MissingPrivateKey)
    ));

    let unsigned = CertificateBuilder::new("unsigned.local")
        .unwrap()
        .build()
        .unwrap();
    assert!(matches!(
        unsigned.as_tls_configuration(),
        Err(CertError::Unsigned)
    ));
}

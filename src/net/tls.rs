//! Opportunistic ssl upgrade.
use std::{fs::File, io::BufReader, sync::Arc};

use bytes::BytesMut;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use super::Socket;
use crate::{
    Error, Result,
    config::{Config, SslMode},
    postgres::frontend,
};

/// Run the ssl negotiation that precedes the startup packet.
///
/// Sends the SslRequest frame and reads the single-byte answer: `S` swaps
/// the transport for an ssl stream, `N` keeps the plain socket unless ssl
/// was required.
pub(crate) async fn maybe_upgrade(mut tcp: TcpStream, config: &Config) -> Result<Socket> {
    if let SslMode::Disable = config.ssl {
        return Ok(Socket::plain(tcp));
    }

    let mut request = BytesMut::with_capacity(8);
    frontend::SslRequest.write(&mut request);
    tcp.write_all(&request).await?;

    let mut answer = [0u8; 1];
    tcp.read_exact(&mut answer).await?;

    match answer[0] {
        b'S' => {}
        b'N' if matches!(config.ssl, SslMode::Prefer) => return Ok(Socket::plain(tcp)),
        b'N' => return Err(Error::SslNotAvailable),
        other => {
            return Err(Error::SslNegotiationFailed(format!(
                "unexpected answer byte {:?}",
                other as char
            )));
        }
    }

    let tls_config = client_config(config)?;
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| Error::SslNegotiationFailed(format!("invalid server name {:?}", config.host)))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::SslNegotiationFailed(e.to_string()))?;

    Ok(Socket::tls(stream))
}

fn client_config(config: &Config) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let verify = match &config.ssl_ca_file {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| Error::SslNegotiationFailed(format!("cannot open ca file: {e}")))?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(file))
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(|e| Error::SslNegotiationFailed(format!("cannot parse ca file: {e}")))?;
            let (added, _) = roots.add_parsable_certificates(certs);
            if added == 0 {
                return Err(Error::SslNegotiationFailed("no usable ca certificates".into()));
            }
            true
        }
        None => false,
    };

    let mut tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if !verify {
        // Historical behavior for prefer/require without a ca bundle:
        // encrypt the channel but accept whatever certificate the server
        // presents.
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
    }

    Ok(tls_config)
}

#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

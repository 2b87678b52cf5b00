//! Outbound transport: TCP, optionally wrapped in rustls.
//!
//! # Responsibilities
//! - Open a TCP connection to the destination host and port
//! - Negotiate TLS with the requested ALPN protocol
//! - Build trust anchors from the web roots plus an optional CA file
//!
//! # Design Decisions
//! - `http://` and `ws://` are plaintext, every other scheme is TLS
//! - One connection per forwarded exchange; nothing is pooled

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use super::destination::ProxyOptions;
use super::ProxyError;
use crate::net::rewind::BoxedIo;

/// Application protocol to offer over TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alpn {
    H2,
    Http1,
}

impl Alpn {
    fn id(self) -> &'static [u8] {
        match self {
            Alpn::H2 => b"h2",
            Alpn::Http1 => b"http/1.1",
        }
    }
}

pub fn uses_tls(url: &Url) -> bool {
    !matches!(url.scheme(), "http" | "ws")
}

/// Connect to `url`'s host and port.
pub async fn connect(url: &Url, options: &ProxyOptions, alpn: Alpn) -> Result<BoxedIo, ProxyError> {
    let host = url
        .host()
        .ok_or_else(|| ProxyError::MissingHost(url.to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ProxyError::MissingPort(url.to_string()))?;

    let tcp = match &host {
        Host::Domain(domain) => TcpStream::connect((*domain, port)).await,
        Host::Ipv4(addr) => TcpStream::connect((*addr, port)).await,
        Host::Ipv6(addr) => TcpStream::connect((*addr, port)).await,
    }
    .map_err(ProxyError::Connect)?;
    tcp.set_nodelay(true).map_err(ProxyError::Connect)?;

    if !uses_tls(url) {
        tracing::trace!(upstream = %url, "Plaintext upstream connected");
        return Ok(Box::new(tcp));
    }

    let server_name = match host {
        Host::Domain(domain) => ServerName::try_from(domain.to_string())
            .map_err(|_| ProxyError::MissingHost(url.to_string()))?,
        Host::Ipv4(addr) => ServerName::IpAddress(std::net::IpAddr::V4(addr).into()),
        Host::Ipv6(addr) => ServerName::IpAddress(std::net::IpAddr::V6(addr).into()),
    };

    let config = client_config(options, alpn)?;
    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(ProxyError::TlsHandshake)?;
    tracing::trace!(upstream = %url, alpn = ?alpn, "TLS upstream connected");
    Ok(Box::new(tls))
}

fn client_config(options: &ProxyOptions, alpn: Alpn) -> Result<ClientConfig, ProxyError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let mut config = if options.insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &options.ca_file {
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    config.alpn_protocols = vec![alpn.id().to_vec()];
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let ca_error = |source| ProxyError::CaFile {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(ca_error)?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ca_error)
}

/// Accepts any server certificate. Signatures are still checked.
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

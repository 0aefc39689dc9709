//! Tunnel engines driven by the agent
//!
//! The agent only needs two things from an engine: establish a connection to
//! the rendezvous port, then run it until it drops. [`TlsTunnelEngine`] is the
//! bundled implementation; it speaks mutual TLS using the user's leaf
//! certificate and trusts nothing but the user's own CA.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info};

use holehub_cert::{load_certs, load_private_key};
use holehub_proto::Scheme;

use crate::{ClientError, TunnelMaterial};

/// Everything an engine needs to bring one hole up
#[derive(Debug, Clone)]
pub struct TunnelTarget {
    /// Rendezvous address, `host:port`
    pub remote: String,
    /// Host part of `remote`
    pub server_name: String,
    pub scheme: Scheme,
    /// Local service the tunnel forwards to
    pub local_addr: String,
    pub material: TunnelMaterial,
}

impl TunnelTarget {
    pub fn new(
        host: &str,
        port: u16,
        scheme: Scheme,
        local_addr: String,
        material: TunnelMaterial,
    ) -> Self {
        Self {
            remote: join_host_port(host, port),
            server_name: host.to_string(),
            scheme,
            local_addr,
            material,
        }
    }
}

/// `host:port`, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[async_trait]
pub trait TunnelEngine: Send + Sync {
    fn supports(&self, _scheme: Scheme) -> bool {
        true
    }

    async fn connect(&self, target: &TunnelTarget) -> Result<Box<dyn TunnelLink>, ClientError>;
}

/// An established tunnel connection
#[async_trait]
pub trait TunnelLink: Send {
    /// Run until the underlying connection fails or closes
    async fn process(&mut self) -> Result<(), ClientError>;
}

pub struct TlsTunnelEngine {
    connect_timeout: Duration,
}

impl Default for TlsTunnelEngine {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TlsTunnelEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Client config presenting the leaf and trusting only the user's CA
    pub fn client_config(material: &TunnelMaterial) -> Result<Arc<rustls::ClientConfig>, ClientError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let ca_certs = load_certs(material.ca_pem.as_bytes())?;
        let mut roots = RootCertStore::empty();
        for cert in &ca_certs {
            roots.add(cert.clone())?;
        }
        let verifier = PinnedCaVerifier {
            pinned: ca_certs,
            inner: WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()
                .map_err(|e| ClientError::Process(format!("CA not usable as trust root: {}", e)))?,
            algorithms: provider.signature_verification_algorithms,
        };

        let leaf_chain = load_certs(material.cert_pem.as_bytes())?;
        let leaf_key = load_private_key(material.key_pem.as_bytes())?;

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(leaf_chain, leaf_key)?;

        Ok(Arc::new(config))
    }
}

#[async_trait]
impl TunnelEngine for TlsTunnelEngine {
    fn supports(&self, scheme: Scheme) -> bool {
        !scheme.is_udp()
    }

    async fn connect(&self, target: &TunnelTarget) -> Result<Box<dyn TunnelLink>, ClientError> {
        if !self.supports(target.scheme) {
            return Err(ClientError::Process(format!(
                "scheme {} is not supported by the TLS engine",
                target.scheme
            )));
        }

        let config = Self::client_config(&target.material)?;
        let server_name = ServerName::try_from(target.server_name.clone())
            .map_err(|e| ClientError::Process(format!("invalid server name: {}", e)))?;

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target.remote))
            .await
            .map_err(|_| {
                ClientError::Process(format!("connect to {} timed out", target.remote))
            })??;
        tcp.set_nodelay(true)?;

        let stream = TlsConnector::from(config).connect(server_name, tcp).await?;
        info!("Tunnel connected to {}", target.remote);

        Ok(Box::new(TlsLink {
            stream,
            local_addr: target.local_addr.clone(),
        }))
    }
}

struct TlsLink {
    stream: TlsStream<TcpStream>,
    local_addr: String,
}

#[async_trait]
impl TunnelLink for TlsLink {
    async fn process(&mut self) -> Result<(), ClientError> {
        let mut local = TcpStream::connect(&self.local_addr).await.map_err(|e| {
            ClientError::Process(format!("local service {} unreachable: {}", self.local_addr, e))
        })?;

        let (sent, received) = tokio::io::copy_bidirectional(&mut self.stream, &mut local).await?;
        debug!(sent, received, "Tunnel connection closed");
        Ok(())
    }
}

/// Accepts the pinned CA itself or anything it signed, whatever the host name
///
/// The tunnel server listens with the CA certificate, so the presented
/// end-entity is usually the pinned certificate.
#[derive(Debug)]
struct PinnedCaVerifier {
    pinned: Vec<CertificateDer<'static>>,
    inner: Arc<WebPkiServerVerifier>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.pinned.iter().any(|ca| ca.as_ref() == end_entity.as_ref()) {
            return Ok(ServerCertVerified::assertion());
        }

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

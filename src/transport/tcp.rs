// MIT License - Copyright (c) 2026 Peter Wright
// Telnet (plain TCP) and TLS connectors

use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::TlsConfig;
use crate::error::{Result, WattBoxError};
use crate::transport::{BoxedStream, ConnectFuture, Connector};

/// Plain TCP connector for the telnet transport.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            let stream = open_tcp(&self.addr, self.connect_timeout).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }

    fn describe(&self) -> String {
        format!("telnet://{}", self.addr)
    }
}

async fn open_tcp(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("Opening TCP connection to {}", addr);
    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("TCP connect to {} failed: {}", addr, e);
            return Err(WattBoxError::Connect {
                addr: addr.to_string(),
                source: e,
            });
        }
        Err(_) => {
            error!("TCP connect to {} timed out", addr);
            return Err(WattBoxError::Connect {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            });
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Could not set TCP_NODELAY: {}", e);
    }
    Ok(stream)
}

/// TLS connector for the encrypted transport.
#[derive(Clone)]
pub struct TlsConnector {
    addr: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("addr", &self.addr)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsConnector {
    pub fn new(host: &str, port: u16, tls: &TlsConfig, connect_timeout: Duration) -> Result<Self> {
        let name = tls.server_name.as_deref().unwrap_or(host).to_string();
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| WattBoxError::Tls(format!("invalid server name {:?}: {}", name, e)))?;

        Ok(Self {
            addr: format!("{}:{}", host, port),
            server_name,
            connector: tokio_rustls::TlsConnector::from(Arc::new(client_config(tls)?)),
            connect_timeout,
        })
    }
}

impl Connector for TlsConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            let tcp = open_tcp(&self.addr, self.connect_timeout).await?;
            let handshake = self.connector.connect(self.server_name.clone(), tcp);
            match timeout(self.connect_timeout, handshake).await {
                Ok(Ok(stream)) => {
                    debug!("TLS session established with {}", self.addr);
                    Ok(Box::new(stream) as BoxedStream)
                }
                // rustls reports certificate and protocol failures as InvalidData
                Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    error!("TLS handshake with {} failed: {}", self.addr, e);
                    Err(WattBoxError::Tls(e.to_string()))
                }
                Ok(Err(e)) => Err(WattBoxError::Connect {
                    addr: self.addr.clone(),
                    source: e,
                }),
                Err(_) => Err(WattBoxError::Connect {
                    addr: self.addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
                }),
            }
        })
    }

    fn describe(&self) -> String {
        format!("tls://{}", self.addr)
    }
}

fn client_config(tls: &TlsConfig) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| WattBoxError::Tls(e.to_string()))?;

    if tls.accept_invalid_certs {
        warn!("TLS certificate verification is disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = &tls.ca_cert {
        let file = File::open(path).map_err(|e| {
            WattBoxError::Tls(format!("cannot open CA file {}: {}", path.display(), e))
        })?;
        let mut reader = BufReader::new(file);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<CertificateDer<'static>>, io::Error>>()
            .map_err(|e| WattBoxError::Tls(format!("{}: {}", path.display(), e)))?;
        if certs.is_empty() {
            return Err(WattBoxError::Tls(format!(
                "no certificates found in {}",
                path.display()
            )));
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| WattBoxError::Tls(e.to_string()))?;
        }
    }

    Ok(builder
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Verifier that accepts any certificate but still checks handshake
/// signatures, for devices with self-signed certificates.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connector = TcpConnector::new(addr.clone(), Duration::from_secs(1));
        let (client, accepted) = tokio::join!(connector.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(accepted.is_ok());
        assert_eq!(connector.describe(), format!("telnet://{}", addr));
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(addr, Duration::from_secs(1));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, WattBoxError::Connect { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_tls_connector_config() {
        let tls = TlsConfig {
            accept_invalid_certs: true,
            ..Default::default()
        };
        let connector = TlsConnector::new("10.0.0.5", 992, &tls, Duration::from_secs(1)).unwrap();
        assert_eq!(connector.describe(), "tls://10.0.0.5:992");

        let connector =
            TlsConnector::new("wattbox.local", 992, &TlsConfig::default(), Duration::from_secs(1));
        assert!(connector.is_ok());
    }

    #[test]
    fn test_tls_missing_ca_file() {
        let tls = TlsConfig {
            ca_cert: Some("/nonexistent/wattbox-ca.pem".into()),
            ..Default::default()
        };
        let err = TlsConnector::new("10.0.0.5", 992, &tls, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, WattBoxError::Tls(_)));
        assert!(!err.is_retryable());
    }
}

//! Encrypted transports to the gateway
//!
//! The stream path is TLS over TCP via `tokio-rustls`; the datagram path is
//! DTLS over UDP via `webrtc-dtls`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::client::TlsStream;
use webrtc_dtls::conn::DTLSConn;
use webrtc_util::Conn;

use crate::error::{Error, Result};

/// Buffered TLS stream; the buffer holds bytes read past the negotiation
pub type TlsTransport = BufReader<TlsStream<TcpStream>>;

/// Accepts any certificate but still checks handshake signatures
#[derive(Debug)]
struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for InsecureVerifier {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the TLS client configuration
///
/// Uses webpki roots and the ring provider; `insecure` skips certificate
/// validation.
pub fn tls_config(insecure: bool) -> Result<Arc<rustls::ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("failed to create TLS config: {}", e)))?;

    let config = if insecure {
        log::warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier { provider }))
            .with_no_client_auth()
    } else {
        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Open a TLS connection to `host` on `port`
pub async fn dial_tls(
    host: &str,
    port: u16,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<TlsTransport> {
    let target = format!("{}:{}", host, port);

    let tcp_stream = TcpStream::connect(&target)
        .await
        .map_err(|e| Error::dial(&target, e))?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::dial(&target, format!("invalid server name: {}", e)))?;

    let connector = tokio_rustls::TlsConnector::from(tls_config);
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::dial(&target, format!("TLS handshake failed: {}", e)))?;

    log::info!("Connected to {} using TLS", target);
    Ok(BufReader::new(tls_stream))
}

/// Open a DTLS association with `host` on `port`
pub async fn dial_dtls(host: &str, port: u16, insecure: bool) -> Result<Arc<DTLSConn>> {
    let target = format!("{}:{}", host, port);
    log::info!("Connecting to {} using DTLS", target);

    let remote: SocketAddr = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| Error::dial(&target, format!("failed to resolve UDP address: {}", e)))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::dial(&target, "no IPv4 address for UDP"))?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::dial(&target, format!("failed to bind UDP socket: {}", e)))?;
    socket
        .connect(remote)
        .await
        .map_err(|e| Error::dial(&target, e))?;

    let config = webrtc_dtls::config::Config {
        insecure_skip_verify: insecure,
        server_name: host.to_string(),
        roots_cas: rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
        ..Default::default()
    };

    let conn: Arc<dyn Conn + Send + Sync> = Arc::new(socket);
    let dtls = DTLSConn::new(conn, config, true, None)
        .await
        .map_err(|e| Error::dial(&target, format!("DTLS handshake failed: {}", e)))?;

    Ok(Arc::new(dtls))
}

/// Established transport carrying the tunnel
pub enum Transport {
    Tls(TlsTransport),
    Dtls(Arc<DTLSConn>),
}

impl Transport {
    /// Get the transport kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Tls(_) => "TLS",
            Transport::Dtls(_) => "DTLS",
        }
    }

    /// Read tunnel bytes
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tls(stream) => stream.read(buf).await,
            Transport::Dtls(conn) => conn
                .read(buf, None)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    /// Write tunnel bytes
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tls(stream) => {
                stream.get_mut().write_all(buf).await?;
                Ok(buf.len())
            }
            Transport::Dtls(conn) => conn
                .write(buf, None)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    /// Close the transport
    ///
    /// TLS sends close-notify before shutting the socket down.
    pub async fn close(self) -> io::Result<()> {
        match self {
            Transport::Tls(mut stream) => stream.get_mut().shutdown().await,
            Transport::Dtls(conn) => conn
                .close()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_builds() {
        assert!(tls_config(false).is_ok());
        assert!(tls_config(true).is_ok());
    }

    #[test]
    fn test_insecure_verifier_accepts_any_cert() {
        let verifier = InsecureVerifier {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };
        let cert = CertificateDer::from(vec![0u8; 16]);
        let name = ServerName::try_from("vpn.example.com").unwrap();

        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[tokio::test]
    async fn test_dial_tls_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = dial_tls("127.0.0.1", port, tls_config(true).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "dial");
        assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));
    }
}

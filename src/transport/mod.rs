//! The connection engine (C3): owns one TCP/TLS socket, frames lines,
//! and performs the welcome handshake.
//!
//! Grounded on the teacher's own `transport.rs` for the socket plumbing
//! (keepalive tuning, buffered line reads) and on `sid3xyz-slircd-ng`'s
//! `sync::manager`/`sync::mod` for the TLS connector setup and the
//! dangerous certificate verifier this protocol family requires.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::warn;

pub use error::TransportReadError;

/// Defensive upper bound on one inbound line. The wire protocol does not
/// document a limit; this exists so a misbehaving server can't grow an
/// unbounded buffer.
pub const MAX_LINE_LEN: usize = 65536;
const MAX_LINE_PREVIEW_LEN: usize = 512;

/// A framed TCP or TLS connection to one server.
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    Tcp {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    },
    Tls {
        reader: BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>,
        writer: tokio::io::WriteHalf<TlsStream<TcpStream>>,
    },
}

impl Transport {
    /// Connect a plain TCP socket and enable keepalive tuning.
    pub async fn connect_tcp(host: &str, port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        if let Err(e) = enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", e);
        }
        let (read, write) = stream.into_split();
        Ok(Self::Tcp {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Connect and wrap in TLS, with certificate verification disabled
    /// (see the crate-level "TLS trust" design note).
    pub async fn connect_tls(host: &str, port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        if let Err(e) = enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", e);
        }
        let connector = tls_connector();
        let domain = tokio_rustls::rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let tls_stream = connector.connect(domain, stream).await?;
        let (read, write) = tokio::io::split(tls_stream);
        Ok(Self::Tls {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Read one CRLF-terminated line, with the trailing CRLF stripped.
    /// Returns `Ok(None)` on a clean EOF with no partial data pending.
    pub async fn read_line(&mut self) -> Result<Option<String>, TransportReadError> {
        match self {
            Transport::Tcp { reader, .. } => read_line_limited(reader).await,
            Transport::Tls { reader, .. } => read_line_limited(reader).await,
        }
    }

    /// Write `line` followed by CRLF.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Transport::Tcp { writer, .. } => {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
                writer.flush().await
            }
            Transport::Tls { writer, .. } => {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
                writer.flush().await
            }
        }
    }
}

fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    sock.set_tcp_keepalive(&keepalive)
}

/// A [`tokio_rustls::rustls::client::danger::ServerCertVerifier`] that
/// accepts any certificate chain. This protocol family has no public CA
/// infrastructure for self-hosted servers; operators are expected to
/// trust the host/port they configured instead of a certificate chain.
#[derive(Debug)]
struct DangerousNoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for DangerousNoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &tokio_rustls::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        use tokio_rustls::rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ED25519,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
        ]
    }
}

fn tls_connector() -> tokio_rustls::TlsConnector {
    let config = tokio_rustls::rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DangerousNoVerifier))
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

async fn read_line_limited<R>(reader: &mut BufReader<R>) -> Result<Option<String>, TransportReadError>
where
    R: AsyncRead + Unpin,
{
    let mut line: Vec<u8> = Vec::with_capacity(256);
    let mut exceeded_limit = false;

    loop {
        let buffer = reader.fill_buf().await?;

        if buffer.is_empty() {
            if line.is_empty() && !exceeded_limit {
                return Ok(None);
            }
            break;
        }

        let newline_pos = buffer.iter().position(|&b| b == b'\n');
        let to_consume = newline_pos.map_or(buffer.len(), |idx| idx + 1);

        if !exceeded_limit {
            let projected_len = line.len().saturating_add(to_consume);
            if projected_len > MAX_LINE_LEN {
                let available = MAX_LINE_LEN.saturating_sub(line.len());
                line.extend_from_slice(&buffer[..available.min(buffer.len())]);
                exceeded_limit = true;
            } else {
                line.extend_from_slice(&buffer[..to_consume]);
            }
        }

        reader.consume(to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    if exceeded_limit {
        warn!(length = line.len(), "line exceeds {} byte limit", MAX_LINE_LEN);
        let preview_len = line.len().min(MAX_LINE_PREVIEW_LEN);
        let preview = String::from_utf8_lossy(&line[..preview_len]).to_string();
        return Err(TransportReadError::LineTooLong { preview });
    }

    while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
        line.pop();
    }

    let line_str = String::from_utf8_lossy(&line).to_string();
    for ch in line_str.chars() {
        if ch == '\0' || (ch.is_control() && ch != '\r' && ch != '\n') {
            let preview = line_str.chars().take(MAX_LINE_PREVIEW_LEN).collect();
            return Err(TransportReadError::IllegalControlChar { ch, preview });
        }
    }

    Ok(Some(line_str))
}

/// Interval between keep-alive pings, derived from the server's
/// `usertimeout` (seconds). Faster than the timeout so the connection
/// never times out if the network round-trip is well-behaved.
pub fn pinger_interval(usertimeout: f64) -> Duration {
    let secs = if usertimeout < 1.0 {
        0.3
    } else if usertimeout < 1.5 {
        0.5
    } else {
        0.75 * usertimeout
    };
    Duration::from_secs_f64(secs)
}

//! TLS stream setup.
//!
//! The URI scheme fixes the policy: `+s` verifies the server certificate
//! against the webpki root store, `+ssc` accepts any certificate
//! (self-signed clusters), and plain schemes skip TLS entirely.

use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{
    Certificate, ClientConfig, Error as TlsError, OwnedTrustAnchor, RootCertStore, ServerName,
};
use tokio_rustls::TlsConnector;

use super::error::{DriverError, DriverResult};
use super::uri::TlsPolicy;

/// A Bolt transport stream, plain or encrypted.
pub(crate) enum BoltStream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl BoltStream {
    /// Wrap a connected TCP stream according to the TLS policy.
    pub(crate) async fn wrap(
        tcp: TcpStream,
        policy: TlsPolicy,
        host: &str,
    ) -> DriverResult<Self> {
        match policy {
            TlsPolicy::None => Ok(BoltStream::Plain(tcp)),
            TlsPolicy::Verified | TlsPolicy::SelfSigned => {
                let connector = connector_for(policy)?;
                let name = ServerName::try_from(host).map_err(|_| {
                    DriverError::config(format!("host '{}' is not a valid TLS server name", host))
                })?;
                let tls = connector.connect(name, tcp).await?;
                Ok(BoltStream::Tls(Box::new(tls)))
            }
        }
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            BoltStream::Plain(s) => s.write_all(buf).await,
            BoltStream::Tls(s) => s.write_all(buf).await,
        }
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        match self {
            BoltStream::Plain(s) => s.flush().await,
            BoltStream::Tls(s) => s.flush().await,
        }
    }

    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            BoltStream::Plain(s) => s.read_buf(buf).await,
            BoltStream::Tls(s) => s.read_buf(buf).await,
        }
    }

    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            BoltStream::Plain(s) => s.read_exact(buf).await.map(|_| ()),
            BoltStream::Tls(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            BoltStream::Plain(s) => s.shutdown().await,
            BoltStream::Tls(s) => s.shutdown().await,
        }
    }
}

fn connector_for(policy: TlsPolicy) -> DriverResult<TlsConnector> {
    let builder = ClientConfig::builder().with_safe_defaults();
    let config = match policy {
        TlsPolicy::Verified => {
            let mut roots = RootCertStore::empty();
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
                OwnedTrustAnchor::from_subject_spki_name_constraints(
                    anchor.subject,
                    anchor.spki,
                    anchor.name_constraints,
                )
            }));
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsPolicy::SelfSigned => builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth(),
        TlsPolicy::None => {
            return Err(DriverError::config("TLS connector requested for a plain scheme"))
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Verifier for the `+ssc` schemes: any presented certificate passes.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_refuses_plain_policy() {
        assert!(connector_for(TlsPolicy::None).is_err());
    }

    #[test]
    fn connectors_build_for_tls_policies() {
        assert!(connector_for(TlsPolicy::Verified).is_ok());
        assert!(connector_for(TlsPolicy::SelfSigned).is_ok());
    }
}

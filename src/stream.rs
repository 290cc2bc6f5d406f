//! Transport dialing: resolves a `ws://`/`wss://` URL into a connected,
//! generic `AsyncRead + AsyncWrite` stream.

use std::sync::Arc;

use pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use crate::error::{Error, Result};
use crate::handshake::RequestSpec;

/// The concrete transport this crate dials by default: a plain TCP stream
/// for `ws://`, or a TLS stream over TCP for `wss://`. Generic connection
/// code only ever needs `AsyncRead + AsyncWrite`; this enum exists so
/// `connect` can return one concrete type regardless of scheme.
pub enum WsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            WsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            WsStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            WsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            WsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            WsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dial `spec.url`'s host:port, upgrading to TLS when the scheme is `wss`.
/// `ca_file`, if set, is an additional PEM bundle trusted alongside the
/// bundled Mozilla roots (`webpki-roots`).
pub async fn connect(spec: &RequestSpec, ca_file: Option<&str>) -> Result<WsStream> {
    let url = &spec.url;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("missing host".into()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::InvalidUrl("missing port".into()))?;

    let tcp = TcpStream::connect((host, port)).await?;

    if !spec.is_tls() {
        return Ok(WsStream::Plain(tcp));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = ca_file {
        let pem = std::fs::read(path)?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| Error::Handshake(format!("invalid CA file: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| Error::Handshake(format!("invalid CA certificate: {e}")))?;
        }
    }

    let config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::InvalidUrl(format!("invalid DNS name: {host}")))?;

    let tls = connector.connect(name, tcp).await?;
    Ok(WsStream::Tls(Box::new(tls)))
}

//! Opening handshake: request construction and response validation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::{Error, Result};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn validate_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::InvalidScheme(other.to_string())),
    }
}

fn default_origin(url: &Url) -> Url {
    let scheme = if url.scheme() == "wss" { "https" } else { "http" };
    let host = url.host_str().unwrap_or("localhost");
    let origin = match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    };
    Url::parse(&origin).expect("scheme/host/port produce a valid URL")
}

/// Everything the caller supplies to dial a server.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub origin: Url,
    pub extra_headers: Vec<(String, String)>,
    pub subprotocols: Vec<String>,
}

impl RequestSpec {
    /// Builds a spec for `url`, which must be `ws://` or `wss://`. The
    /// `Origin` header defaults to `http(s)://<host>[:<port>]` derived from
    /// `url` itself; use [`RequestSpec::with_origin`] to override it.
    pub fn new(url: Url) -> Result<Self> {
        validate_scheme(&url)?;
        let origin = default_origin(&url);
        Ok(Self { url, origin, extra_headers: Vec::new(), subprotocols: Vec::new() })
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "wss"
    }

    fn host_header(&self) -> Result<String> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl("missing host".into()))?;
        match self.url.port() {
            Some(port) => Ok(format!("{host}:{port}")),
            None => Ok(host.to_string()),
        }
    }

    fn resource(&self) -> String {
        let mut resource = self.url.path().to_string();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = self.url.query() {
            resource.push('?');
            resource.push_str(query);
        }
        resource
    }
}

/// A freshly generated `Sec-WebSocket-Key`, kept around so the response can
/// be checked against the accept value it implies.
pub struct SecKey(String);

impl SecKey {
    pub fn generate() -> Self {
        let raw: [u8; 16] = rand::rng().random();
        Self(STANDARD.encode(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn expected_accept(&self) -> String {
        accept_value(&self.0)
    }
}

fn accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the exact upgrade request bytes to send over the (already dialed)
/// transport.
pub fn build_request(spec: &RequestSpec, key: &SecKey) -> Result<Vec<u8>> {
    let host = spec.host_header()?;
    let mut request = format!(
        "GET {resource} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Origin: {origin}\r\n",
        resource = spec.resource(),
        host = host,
        key = key.as_str(),
        origin = spec.origin,
    );

    if !spec.subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            spec.subprotocols.join(", ")
        ));
    }

    for (name, value) in &spec.extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }

    request.push_str("\r\n");
    Ok(request.into_bytes())
}

/// The parts of the server's handshake response the caller needs once it has
/// validated.
pub struct HandshakeResponse {
    pub selected_protocol: Option<String>,
}

/// Parse and validate a handshake response out of `buf`.
///
/// Returns `Ok(None)` when `buf` doesn't yet contain the full header block
/// (terminated by `\r\n\r\n`) — the caller should read more and retry. Once
/// complete, returns the parsed response plus how many leading bytes of
/// `buf` the header block occupied (anything past that may be the start of
/// the frame stream, if the server pipelined one).
pub fn parse_response(buf: &[u8], key: &SecKey) -> Result<Option<(HandshakeResponse, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);

    let status = response
        .parse(buf)
        .map_err(|e| Error::Handshake(format!("malformed HTTP response: {e}")))?;

    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let code = response
        .code
        .ok_or_else(|| Error::Handshake("missing status code".into()))?;
    if code != 101 {
        return Err(Error::Handshake(format!("expected HTTP 101, got {code}")));
    }

    let header_value = |name: &str| -> Option<String> {
        response
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::to_string)
    };

    let upgrade = header_value("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::Handshake(format!("unexpected Upgrade header: {upgrade}")));
    }

    let connection = header_value("Connection").unwrap_or_default();
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::Handshake(format!(
            "unexpected Connection header: {connection}"
        )));
    }

    let accept = header_value("Sec-WebSocket-Accept")
        .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Accept".into()))?;
    if accept != key.expected_accept() {
        return Err(Error::Handshake("Sec-WebSocket-Accept mismatch".into()));
    }

    let selected_protocol = header_value("Sec-WebSocket-Protocol");

    Ok(Some((HandshakeResponse { selected_protocol }, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str) -> RequestSpec {
        RequestSpec::new(Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn builds_minimal_request() {
        let key = SecKey::generate();
        let request = build_request(&spec("ws://example.com/chat"), &key).unwrap();
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {}\r\n", key.as_str())));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Origin: http://example.com/\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(matches!(
            RequestSpec::new(Url::parse("http://example.com/chat").unwrap()),
            Err(Error::InvalidScheme(scheme)) if scheme == "http"
        ));
    }

    #[test]
    fn wss_origin_defaults_to_https() {
        let s = spec("wss://example.com:9443/socket");
        assert_eq!(s.origin.as_str(), "https://example.com:9443/");
    }

    #[test]
    fn explicit_origin_overrides_default() {
        let s = spec("ws://example.com/chat").with_origin(Url::parse("https://app.example.net").unwrap());
        let key = SecKey::generate();
        let text = String::from_utf8(build_request(&s, &key).unwrap()).unwrap();
        assert!(text.contains("Origin: https://app.example.net/\r\n"));
    }

    #[test]
    fn includes_port_and_query_and_protocols() {
        let mut s = spec("ws://example.com:9001/socket?id=42");
        s.subprotocols = vec!["chat".into(), "superchat".into()];
        let key = SecKey::generate();
        let text = String::from_utf8(build_request(&s, &key).unwrap()).unwrap();
        assert!(text.starts_with("GET /socket?id=42 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9001\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
    }

    #[test]
    fn accept_value_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(accept_value(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn parses_valid_response() {
        let key = SecKey::generate();
        let accept = key.expected_accept();
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             Sec-WebSocket-Protocol: chat\r\n\
             \r\n"
        );
        let (response, consumed) = parse_response(raw.as_bytes(), &key).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(response.selected_protocol.as_deref(), Some("chat"));
    }

    #[test]
    fn incomplete_headers_need_more_bytes() {
        let key = SecKey::generate();
        let raw = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: web";
        assert!(parse_response(raw.as_bytes(), &key).unwrap().is_none());
    }

    #[test]
    fn rejects_accept_mismatch() {
        let key = SecKey::generate();
        let raw = "HTTP/1.1 101 Switching Protocols\r\n\
                   Upgrade: websocket\r\n\
                   Connection: Upgrade\r\n\
                   Sec-WebSocket-Accept: bm90dGhlcmlnaHR2YWx1ZQ==\r\n\
                   \r\n";
        assert!(parse_response(raw.as_bytes(), &key).is_err());
    }

    #[test]
    fn rejects_non_101_status() {
        let key = SecKey::generate();
        let raw = "HTTP/1.1 404 Not Found\r\n\r\n";
        assert!(parse_response(raw.as_bytes(), &key).is_err());
    }
}

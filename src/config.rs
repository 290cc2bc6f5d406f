//! Client configuration: frame/message size limits and handshake options.

use std::time::Duration;

/// Frame- and message-size limits, and the close-handshake timeout.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest single wire frame this client will send. Defaults to 16 MiB.
    pub max_frame_size: usize,
    /// Largest reassembled message this client will accept before failing
    /// the connection with 1009. Defaults to 64 MiB.
    pub max_message_size: usize,
    /// How long to wait for the peer's CLOSE frame after sending one before
    /// giving up and closing the transport anyway.
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything needed to dial a server, beyond the URL itself.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Extra headers sent with the opening handshake.
    pub extra_headers: Vec<(String, String)>,
    /// Subprotocols advertised via `Sec-WebSocket-Protocol`. The server's
    /// selection, if any, is recorded but not otherwise enforced —
    /// subprotocol-specific framing is left to the caller.
    pub subprotocols: Vec<String>,
    /// PEM-encoded CA certificate bundle to trust for `wss://`, in addition
    /// to the bundled Mozilla roots. `None` uses the bundled roots only.
    pub ca_file: Option<String>,
}

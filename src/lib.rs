//! Client-side WebSocket implementation for the Tokio stack.
//!
//! Dials a `ws://`/`wss://` endpoint, performs the RFC 6455 opening
//! handshake, and hands back a [`Connection`] handle plus an [`EventStream`]
//! of everything that happens afterward: text/binary messages, pongs, state
//! transitions, and the eventual close. The handle is cheap to clone and
//! safe to call from any thread; all the actual socket work happens on one
//! task per connection.
//!
//! ```no_run
//! use wisp_socket::{connect, ClientConfig, RequestSpec};
//! use futures::StreamExt;
//!
//! # async fn run() -> wisp_socket::Result<()> {
//! let spec = RequestSpec::new(url::Url::parse("ws://example.com/socket")?)?;
//! let (connection, mut events) = connect(spec, ClientConfig::default()).await?;
//! connection.send_text("hello")?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod stream;

pub use config::{ClientConfig, WebSocketConfig};
pub use connection::{connect, connect_with_transport, Connection, ConnectionState};
pub use error::{Error, Result};
pub use event::{Event, EventStream};
pub use frame::{close_code, Frame, OpCode};
pub use handshake::RequestSpec;
pub use message::Message;

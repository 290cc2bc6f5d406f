//! The connection state machine: one tokio task per connection owns the
//! transport and drains a command queue, so every public operation is a
//! message posted to that task rather than a direct socket write.

use std::pin::Pin;

use bytes::BytesMut;
use futures::future;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant, Sleep};

use crate::config::ClientConfig;
use crate::decoder::FrameDecoder;
use crate::encoder::encode_frame;
use crate::error::{Error, ProtocolErrorKind, Result};
use crate::event::{Event, EventStream};
use crate::frame::{close_code, Frame, OpCode};
use crate::handshake::{self, RequestSpec, SecKey};
use crate::message::Message;
use crate::stream;

/// The four connection states, kept in their declared order so
/// `state >= ConnectionState::Closing` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

/// Operations posted to the connection task from any thread.
#[derive(Debug)]
pub(crate) enum Command {
    Send(Message),
    Ping(Vec<u8>),
    Close(u16, Vec<u8>),
}

/// A cheap, `Clone + Send + Sync` handle to a running connection. Carries no
/// I/O itself: operations are posted to the connection task over an
/// unbounded channel, and state reads go through a `watch` channel so they
/// never block on the task.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn require_open(&self) -> Result<()> {
        if self.state() == ConnectionState::Open {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.require_open()?;
        self.commands.send(Command::Send(Message::Text(text.into().into_bytes())))?;
        Ok(())
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.require_open()?;
        self.commands.send(Command::Send(Message::Binary(data.into())))?;
        Ok(())
    }

    pub fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.require_open()?;
        self.commands.send(Command::Ping(payload.into()))?;
        Ok(())
    }

    /// Start the closing handshake. A second call once already
    /// `Closing` or `Closed` is a no-op rather than an error — close is
    /// idempotent from the caller's point of view.
    pub fn close(&self, code: u16, reason: impl Into<Vec<u8>>) -> Result<()> {
        if self.state() >= ConnectionState::Closing {
            return Ok(());
        }
        self.commands.send(Command::Close(code, reason.into()))?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state() < ConnectionState::Closing {
            let _ = self.commands.send(Command::Close(close_code::GOING_AWAY, Vec::new()));
        }
    }
}

/// Dial `spec.url` and perform the opening handshake, spawning the
/// connection task on success.
pub async fn connect(spec: RequestSpec, config: ClientConfig) -> Result<(Connection, EventStream)> {
    let transport = stream::connect(&spec, config.ca_file.as_deref()).await?;
    connect_with_transport(transport, spec, config).await
}

/// Same as [`connect`], but over a caller-supplied transport. Exists so
/// tests can drive the handshake and state machine over an in-memory duplex
/// stream instead of a real socket.
pub async fn connect_with_transport<S>(
    mut transport: S,
    spec: RequestSpec,
    config: ClientConfig,
) -> Result<(Connection, EventStream)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let key = SecKey::generate();
    let mut request_spec = spec;
    request_spec.extra_headers.extend(config.extra_headers.clone());
    request_spec.subprotocols = config.subprotocols.clone();
    let request = handshake::build_request(&request_spec, &key)?;
    transport.write_all(&request).await?;

    let mut buf = BytesMut::with_capacity(1024);
    let (_response, consumed) = loop {
        let mut tmp = [0u8; 1024];
        let n = transport.read(&mut tmp).await?;
        if n == 0 {
            return Err(Error::Handshake("connection closed during handshake".into()));
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(parsed) = handshake::parse_response(&buf, &key)? {
            break parsed;
        }
    };

    let leftover = BytesMut::from(&buf[consumed..]);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    // The dial-and-handshake phase above is CONNECTING, but no Connection
    // handle exists yet for a caller to observe it through; the watch
    // channel starts directly at Open so the handle returned below is
    // never in a state the task hasn't reached.
    let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
    let (event_tx, event_rx) = mpsc::channel(64);
    let _ = event_tx.send(Event::StateChanged(ConnectionState::Open)).await;

    let task = Task {
        transport,
        read_buf: leftover,
        decoder: FrameDecoder::new(config.web_socket_config.max_message_size),
        state_tx,
        event_tx,
        command_rx,
        config: config.web_socket_config.clone(),
        pending_ping: None,
        close_timer: None,
    };
    tokio::spawn(task.run());

    let connection = Connection { commands: command_tx, state: state_rx };
    Ok((connection, EventStream::new(event_rx)))
}

struct Task<S> {
    transport: S,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<Event>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    config: crate::config::WebSocketConfig,
    pending_ping: Option<(Vec<u8>, Instant)>,
    close_timer: Option<Pin<Box<Sleep>>>,
}

impl<S> Task<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let mut read_tmp = [0u8; 4096];
        loop {
            if self.state() == ConnectionState::Closed {
                break;
            }

            let close_fut = async {
                match self.close_timer.as_mut() {
                    Some(timer) => timer.await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = close_fut => {
                    debug!("close handshake timed out, tearing down transport");
                    self.finish_closed(close_code::NORMAL, Vec::new()).await;
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // every Connection handle dropped without an explicit close.
                            self.finish_closed(close_code::GOING_AWAY, Vec::new()).await;
                        }
                    }
                }
                result = self.transport.read(&mut read_tmp) => {
                    match result {
                        Ok(0) => self.finish_closed(close_code::ABNORMAL, Vec::new()).await,
                        Ok(n) => {
                            self.read_buf.extend_from_slice(&read_tmp[..n]);
                            self.drain_frames().await;
                        }
                        Err(e) => {
                            let _ = self.event_tx.send(Event::Error(Error::Transport { source: e })).await;
                            self.finish_closed(close_code::ABNORMAL, Vec::new()).await;
                        }
                    }
                }
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    async fn set_state(&mut self, new: ConnectionState) -> std::result::Result<(), ()> {
        self.state_tx.send(new).map_err(|_| ())?;
        let _ = self.event_tx.send(Event::StateChanged(new)).await;
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        if self.state() != ConnectionState::Open {
            return;
        }
        match command {
            Command::Send(message) => self.send_message(message).await,
            Command::Ping(payload) => self.send_ping(payload).await,
            Command::Close(code, reason) => self.start_close(code, reason).await,
        }
    }

    async fn send_message(&mut self, message: Message) {
        for (opcode, fin, chunk) in message.to_frames(self.config.max_frame_size) {
            if self.write_frame(opcode, fin, chunk).await.is_err() {
                self.finish_closed(close_code::ABNORMAL, Vec::new()).await;
                return;
            }
        }
    }

    async fn send_ping(&mut self, payload: Vec<u8>) {
        if self.write_frame(OpCode::Ping, true, &payload).await.is_ok() {
            self.pending_ping = Some((payload, Instant::now()));
        }
    }

    async fn start_close(&mut self, code: u16, reason: Vec<u8>) {
        let payload = close_payload(code, &reason);
        let _ = self.write_frame(OpCode::Close, true, &payload).await;
        if self.set_state(ConnectionState::Closing).await.is_err() {
            return;
        }
        self.close_timer = Some(Box::pin(sleep(self.config.close_timeout)));
    }

    async fn write_frame(&mut self, opcode: OpCode, fin: bool, payload: &[u8]) -> std::io::Result<()> {
        let bytes = encode_frame(payload, opcode, fin, true);
        self.transport.write_all(&bytes).await
    }

    async fn drain_frames(&mut self) {
        loop {
            let decoded = self.decoder.decode(&mut self.read_buf);
            match decoded {
                Ok(Some(frame)) => {
                    if self.handle_frame(frame).await {
                        return;
                    }
                }
                Ok(None) => return,
                Err(kind) => {
                    self.fail(kind).await;
                    return;
                }
            }
        }
    }

    /// Returns `true` if the connection was closed while handling this
    /// frame, so the caller should stop draining.
    async fn handle_frame(&mut self, frame: Frame) -> bool {
        match frame.opcode {
            OpCode::Text => match String::from_utf8(frame.payload) {
                Ok(text) => {
                    let _ = self.event_tx.send(Event::Message(Message::Text(text.into_bytes()))).await;
                    false
                }
                Err(_) => {
                    self.fail(ProtocolErrorKind::InvalidUtf8Text).await;
                    true
                }
            },
            OpCode::Binary => {
                let _ = self.event_tx.send(Event::Message(Message::Binary(frame.payload))).await;
                false
            }
            OpCode::Ping => {
                let _ = self.write_frame(OpCode::Pong, true, &frame.payload).await;
                false
            }
            OpCode::Pong => {
                let latency = match &self.pending_ping {
                    Some((sent, started)) if *sent == frame.payload => {
                        let started = *started;
                        self.pending_ping = None;
                        started.elapsed()
                    }
                    _ => std::time::Duration::ZERO,
                };
                let _ = self.event_tx.send(Event::Pong { latency }).await;
                false
            }
            OpCode::Close => {
                self.handle_close_frame(frame.payload).await;
                true
            }
            OpCode::Continuation => unreachable!("decoder never yields a bare continuation"),
        }
    }

    async fn handle_close_frame(&mut self, payload: Vec<u8>) {
        let (code, reason) = parse_close_payload(&payload);
        let reason = reason.unwrap_or_default();

        if std::str::from_utf8(&reason).is_err() {
            self.fail(ProtocolErrorKind::InvalidUtf8CloseReason).await;
            return;
        }

        if self.state() == ConnectionState::Open {
            // Peer-initiated close: echo the code back (or 1000 if none) before
            // tearing down, not the raw bytes we received.
            let echoed = close_payload(code.unwrap_or(close_code::NORMAL), &reason);
            let _ = self.write_frame(OpCode::Close, true, &echoed).await;
        }

        match code {
            Some(code) if !close_code::is_valid_received(code) => {
                let kind = ProtocolErrorKind::InvalidCloseCode(code);
                let _ = self.event_tx.send(Event::Error(Error::Protocol(kind))).await;
                self.finish_closed(close_code::PROTOCOL_ERROR, Vec::new()).await;
            }
            _ => {
                let code = code.unwrap_or(close_code::NO_STATUS);
                self.finish_closed(code, reason).await;
            }
        }
    }

    async fn fail(&mut self, kind: ProtocolErrorKind) {
        let code = kind.close_code();
        warn!("protocol violation, failing connection with {code}: {kind}");
        let _ = self.event_tx.send(Event::Error(Error::Protocol(kind))).await;
        let _ = self.write_frame(OpCode::Close, true, &close_payload(code, &[])).await;
        self.finish_closed(code, Vec::new()).await;
    }

    async fn finish_closed(&mut self, code: u16, reason: Vec<u8>) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let _ = self.set_state(ConnectionState::Closed).await;
        let _ = self.event_tx.send(Event::Closed { code, reason }).await;
    }
}

fn close_payload(code: u16, reason: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason);
    payload
}

/// Parses a received CLOSE frame payload into `(code, reason)`. An empty
/// payload (no status, code 1005) yields `(None, None)`.
fn parse_close_payload(payload: &[u8]) -> (Option<u16>, Option<Vec<u8>>) {
    if payload.len() < 2 {
        return (None, None);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (Some(code), Some(payload[2..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_monotonically_ordered() {
        assert!(ConnectionState::Connecting < ConnectionState::Open);
        assert!(ConnectionState::Open < ConnectionState::Closing);
        assert!(ConnectionState::Closing < ConnectionState::Closed);
    }

    #[test]
    fn close_payload_roundtrips_through_parse() {
        let bytes = close_payload(close_code::NORMAL, b"bye");
        let (code, reason) = parse_close_payload(&bytes);
        assert_eq!(code, Some(close_code::NORMAL));
        assert_eq!(reason.unwrap(), b"bye");
    }

    #[test]
    fn empty_close_payload_has_no_status() {
        let (code, reason) = parse_close_payload(&[]);
        assert_eq!(code, None);
        assert_eq!(reason, None);
    }
}

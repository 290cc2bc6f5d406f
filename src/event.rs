//! Outbound events delivered to the caller as a single ordered stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::connection::ConnectionState;
use crate::error::Error;
use crate::message::Message;

/// Everything the connection task can report back to the caller, in the
/// order it happened. One `EventStream` per `Connection`.
#[derive(Debug)]
pub enum Event {
    StateChanged(ConnectionState),
    Message(Message),
    Pong { latency: std::time::Duration },
    Error(Error),
    Closed { code: u16, reason: Vec<u8> },
}

/// A `Stream` of [`Event`]s for one connection. Ends once the connection
/// task has reported `Closed` and dropped its sender.
pub struct EventStream {
    inner: ReceiverStream<Event>,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Event>) -> Self {
        Self { inner: ReceiverStream::new(receiver) }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

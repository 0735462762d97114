//! Line-oriented reference connection
//!
//! Writes each command as one text line and reads each reply as one text
//! line. It exists so the multiplexer can be driven over any
//! `AsyncRead + AsyncWrite` transport (a TCP stream, a `tokio::io::duplex`
//! pair in tests) without pulling in a real server protocol.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::command::Command;
use crate::error::ConnectionError;
use crate::reply::Reply;
use crate::traits::Connection;

/// Longest reply line accepted before the stream is considered corrupt
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A [`Connection`] speaking one line per command and one line per reply
pub struct LineConnection<T> {
    sink: Mutex<SplitSink<Framed<T, LinesCodec>, String>>,
    stream: Mutex<SplitStream<Framed<T, LinesCodec>>>,
    /// First fatal error seen on the transport
    fault: SyncMutex<Option<ConnectionError>>,
    closed: AtomicBool,
}

impl<T> LineConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap an established transport
    pub fn new(io: T) -> Self {
        let framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (sink, stream) = framed.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            fault: SyncMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Remember a transport failure and hand it back
    fn fail(&self, err: ConnectionError) -> ConnectionError {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            tracing::debug!("Line connection failed: {}", err);
            *fault = Some(err.clone());
        }
        err
    }

    fn check_usable(&self) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        match self.fault.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Render a command as a single line
fn encode_command(command: &Command) -> Result<String, ConnectionError> {
    let line = command.to_string();
    if line.contains(['\n', '\r']) {
        return Err(ConnectionError::Protocol(format!(
            "command {} contains a line break",
            command.name()
        )));
    }
    Ok(line)
}

/// Interpret a reply line
fn decode_reply(line: String) -> Reply {
    match line.strip_prefix('-') {
        Some(message) => Reply::Error(message.to_string()),
        None => Reply::Status(line),
    }
}

impl From<LinesCodecError> for ConnectionError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ConnectionError::Protocol(format!(
                "reply line exceeds {} bytes",
                MAX_LINE_LENGTH
            )),
            LinesCodecError::Io(e) => e.into(),
        }
    }
}

#[async_trait]
impl<T> Connection for LineConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        self.check_usable()?;
        // Sticky so a caller that already counted this command as sent
        // cannot go on to read a reply that belongs to the next one
        let line = encode_command(command).map_err(|e| self.fail(e))?;
        let mut sink = self.sink.lock().await;
        sink.feed(line).await.map_err(|e| self.fail(e.into()))
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        self.check_usable()?;
        let mut sink = self.sink.lock().await;
        SinkExt::<String>::flush(&mut *sink)
            .await
            .map_err(|e| self.fail(e.into()))
    }

    async fn receive(&self) -> Result<Reply, ConnectionError> {
        self.check_usable()?;
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(line)) => Ok(decode_reply(line)),
            Some(Err(e)) => Err(self.fail(e.into())),
            None => Err(self.fail(ConnectionError::ConnectionLost(
                "end of stream".to_string(),
            ))),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        SinkExt::<String>::close(&mut *sink)
            .await
            .map_err(ConnectionError::from)
    }

    fn err(&self) -> Option<ConnectionError> {
        self.fault.lock().clone()
    }
}

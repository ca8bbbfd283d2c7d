//! Async framed transport: an I/O pump around [`FrameDecoder`].

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::framing::{FrameDecoder, FramingLimits, encode_frame};
use crate::message::JsonRpcMessage;

/// Events emitted by the receive side of a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete, parsed message arrived.
    Message(JsonRpcMessage),
    /// A frame or message was rejected; the transport keeps running.
    Error(TransportError),
    /// The peer closed the stream or reading failed fatally.
    Closed,
}

/// Bidirectional framed JSON-RPC transport over arbitrary byte streams.
///
/// Reading runs on a spawned pump task that feeds a [`FrameDecoder`] and
/// delivers [`TransportEvent`]s in arrival order over a bounded channel.
/// Writing happens inline through [`FramedTransport::send`].
pub struct FramedTransport {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    limits: FramingLimits,
    closed: AtomicBool,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl FramedTransport {
    /// Start a transport over the given streams.
    ///
    /// Returns the transport handle and the event receiver. Events stop
    /// after a [`TransportEvent::Closed`] or when the handle is closed.
    #[must_use]
    pub fn spawn(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        limits: FramingLimits,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let handle = tokio::spawn(pump(reader, limits, events_tx));
        (
            Self {
                writer: Mutex::new(Box::new(writer)),
                limits,
                closed: AtomicBool::new(false),
                reader: StdMutex::new(Some(handle)),
            },
            events_rx,
        )
    }

    /// Serialize and send one message with a `Content-Length` header.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after [`FramedTransport::close`],
    /// [`TransportError::MessageTooLarge`] when the serialized body
    /// exceeds the message limit, or an I/O error from the stream.
    pub async fn send(&self, message: &JsonRpcMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let body = message.to_bytes()?;
        if body.len() > self.limits.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                limit: self.limits.max_message_size,
            });
        }
        let frame = encode_frame(&body);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// The limits this transport enforces.
    #[must_use]
    pub fn limits(&self) -> FramingLimits {
        self.limits
    }

    /// Stop the pump and refuse further sends. Idempotent.
    ///
    /// The underlying streams are not shut down here; their owner (the
    /// proxy, or the process holding stdio) decides their fate.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.reader.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
        debug!("transport closed");
    }

    /// Whether [`FramedTransport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Read loop: bytes -> decoder -> parsed messages -> event channel.
async fn pump(
    mut reader: impl AsyncRead + Send + Unpin,
    limits: FramingLimits,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut decoder = FrameDecoder::new(limits);
    let mut chunk = vec![0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::Closed).await;
                return;
            },
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.into())).await;
                let _ = events.send(TransportEvent::Closed).await;
                return;
            },
        };

        if let Err(e) = decoder.push(&chunk[..read]) {
            if events.send(TransportEvent::Error(e)).await.is_err() {
                return;
            }
            continue;
        }

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    let event = match JsonRpcMessage::from_bytes(&frame) {
                        Ok(message) => TransportEvent::Message(message),
                        Err(e) => TransportEvent::Error(e),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    if events.send(TransportEvent::Error(e)).await.is_err() {
                        return;
                    }
                },
            }
        }
    }
}

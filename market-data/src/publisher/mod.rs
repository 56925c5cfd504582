//! Publisher module for IPC communication
//!
//! Forwards book updates and trades to other processes over a Unix socket as
//! length-prefixed MessagePack frames.

use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::messages::Trade;
use crate::orderbook::{BookListener, TopOfBook};

/// Event written to the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PublishedEvent {
    BookUpdate(TopOfBook),
    Trade(Trade),
}

/// Encode an event as a 4-byte big-endian length followed by MessagePack
pub fn encode_frame(event: &PublishedEvent) -> Result<Bytes> {
    let data = rmp_serde::to_vec(event).map_err(|e| {
        MarketDataError::SerializationError(format!("Failed to serialize: {}", e))
    })?;

    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.put_u32(frame_len(data.len())?);
    frame.extend_from_slice(&data);
    Ok(frame.freeze())
}

fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        MarketDataError::SerializationError(format!("Frame of {len} bytes exceeds the u32 length prefix"))
    })
}

/// Listener that hands events to a background socket writer
///
/// Never blocks the caller: when the queue is full the event is dropped.
pub struct IpcPublisher {
    tx: mpsc::Sender<PublishedEvent>,
}

impl IpcPublisher {
    /// Spawn the writer task. The socket is connected lazily.
    pub fn spawn(socket_path: impl Into<PathBuf>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = SocketWriter {
            socket_path: socket_path.into(),
            stream: None,
        };
        let handle = tokio::spawn(writer.run(rx));
        (Self { tx }, handle)
    }

    fn enqueue(&self, event: PublishedEvent) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("IPC queue full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(MarketDataError::IpcError("IPC writer stopped".to_string()))
            }
        }
    }
}

impl BookListener for IpcPublisher {
    fn on_book_update(&self, update: &TopOfBook) -> Result<()> {
        self.enqueue(PublishedEvent::BookUpdate(update.clone()))
    }

    fn on_trade(&self, trade: &Trade) -> Result<()> {
        self.enqueue(PublishedEvent::Trade(trade.clone()))
    }
}

struct SocketWriter {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
}

impl SocketWriter {
    /// Runs until every publisher handle is dropped
    async fn run(mut self, mut rx: mpsc::Receiver<PublishedEvent>) {
        while let Some(event) = rx.recv().await {
            let frame = match encode_frame(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Skipping unencodable event");
                    continue;
                }
            };
            self.write(&frame).await;
        }
        debug!(path = %self.socket_path.display(), "IPC writer finished");
    }

    async fn connect(&mut self) -> Result<()> {
        let path: &Path = &self.socket_path;
        if !path.exists() {
            return Err(MarketDataError::IpcError(format!(
                "Socket path does not exist: {}",
                path.display()
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            MarketDataError::IpcError(format!("Failed to connect to {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Connected to IPC socket");
        self.stream = Some(stream);
        Ok(())
    }

    /// Write failures drop the frame and the connection; the next frame reconnects
    async fn write(&mut self, frame: &[u8]) {
        if self.stream.is_none() {
            if let Err(e) = self.connect().await {
                debug!(error = %e, "IPC socket unavailable, dropping frame");
                return;
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.write_all(frame).await {
                warn!(error = %e, "Failed to write to IPC socket");
                self.stream = None;
            }
        }
    }
}

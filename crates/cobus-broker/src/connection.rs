//! Framed message I/O shared by both ends of a broker stream.
//!
//! Writes go through a single writer task per stream that drains a queue one
//! message at a time, so messages reach the wire in enqueue order and never
//! interleave.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use cobus_core::wire::MESSAGE_HEADER_SIZE;
use cobus_core::Message;

use crate::error::TransportError;

/// Work item for a writer task.
#[derive(Debug)]
pub enum Outbound {
    Message(Message),
    /// Shut the write half once everything queued before it is written.
    Close,
}

pub type OutboundTx = mpsc::UnboundedSender<Outbound>;
pub type OutboundRx = mpsc::UnboundedReceiver<Outbound>;

/// Read one message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Message>, TransportError> {
    let mut head = [0u8; MESSAGE_HEADER_SIZE];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = Message::decode_header(&head)?;

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    Ok(Some(Message::from_parts(&header, Bytes::from(body))?))
}

/// Drain `rx` into `writer`, one complete message at a time.
///
/// Returns when the queue closes or [`Outbound::Close`] arrives; the write
/// half is shut down in both cases.
pub async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: OutboundRx) -> io::Result<()> {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Message(msg) => {
                writer.write_all(&msg.encode()).await?;
                tracing::trace!(kind = ?msg.kind, header = %msg.header, "message written");
            }
            Outbound::Close => break,
        }
    }
    writer.shutdown().await
}

/// Server-side view of one accepted stream.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    listening: AtomicBool,
    outbound: OutboundTx,
}

impl Connection {
    pub fn new(id: u64, peer: SocketAddr, outbound: OutboundTx) -> Self {
        Self {
            id,
            peer,
            listening: AtomicBool::new(false),
            outbound,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn set_listening(&self) {
        self.listening.store(true, Ordering::Release);
    }

    /// Queue a message. False once the writer has gone away.
    pub fn send(&self, msg: Message) -> bool {
        self.outbound.send(Outbound::Message(msg)).is_ok()
    }

    /// Ask the writer to shut the stream after what is already queued.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// A sender onto this connection's write queue.
    pub fn outbound(&self) -> OutboundTx {
        self.outbound.clone()
    }
}

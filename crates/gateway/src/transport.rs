//! Ordered, bidirectional frame channels.
//!
//! Server and client only ever see a [`ChannelEnd`]; whether the other side
//! lives in the same process or behind a socket is decided here.

use std::net::SocketAddr;

use proto::{Frame, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-direction channel capacity.
pub const DEFAULT_BUFFER: usize = 64;
/// Largest accepted frame. Screenshots travel base64-encoded inside frames.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One end of an ordered, bidirectional frame channel.
pub struct ChannelEnd {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl ChannelEnd {
    /// Sends a frame to the peer.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Receives the next frame; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Splits into independently owned send and receive halves.
    pub fn split(self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        (self.tx, self.rx)
    }
}

/// Creates two in-process ends wired to each other.
pub fn linked_pair(buffer: usize) -> (ChannelEnd, ChannelEnd) {
    let (a_tx, b_rx) = mpsc::channel(buffer);
    let (b_tx, a_rx) = mpsc::channel(buffer);
    (
        ChannelEnd { tx: a_tx, rx: a_rx },
        ChannelEnd { tx: b_tx, rx: b_rx },
    )
}

/// Wraps a byte stream with length-prefixed JSON framing.
///
/// Spawns one reader and one writer task; the returned end closes when the
/// stream hits EOF or an IO/codec error.
pub fn framed<IO>(io: IO, buffer: usize) -> ChannelEnd
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(io);
    let (local, pump) = linked_pair(buffer);
    let (inbound_tx, mut outbound_rx) = pump.split();

    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if inbound_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Framed stream reached EOF");
                    break;
                }
                Err(e) => {
                    warn!("Framed stream read error: {e}");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!("Framed stream write error: {e}");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    local
}

/// Connects to a dispatch server listening on `addr`.
pub async fn connect_tcp(addr: SocketAddr) -> Result<ChannelEnd, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("Connected to dispatch server at {addr}");
    Ok(framed(stream, DEFAULT_BUFFER))
}

/// Reads one frame; `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = parse_frame_len(len_buf);
    ensure_frame_len(len)?;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    decode_frame(&buf).map(Some)
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let (len, bytes) = encode_frame(frame)?;
    writer.write_all(&len).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Parses a big-endian 4-byte frame length prefix.
fn parse_frame_len(len_buf: [u8; 4]) -> usize {
    u32::from_be_bytes(len_buf) as usize
}

/// Validates a frame size against the maximum.
fn ensure_frame_len(len: usize) -> Result<(), TransportError> {
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    Ok(())
}

fn decode_frame(buf: &[u8]) -> Result<Frame, TransportError> {
    serde_json::from_slice(buf).map_err(|e| TransportError::Codec(format!("Deserialize error: {e}")))
}

/// Encodes a frame as length prefix plus JSON body.
fn encode_frame(frame: &Frame) -> Result<([u8; 4], Vec<u8>), TransportError> {
    let bytes = serde_json::to_vec(frame)
        .map_err(|e| TransportError::Codec(format!("Serialize error: {e}")))?;
    ensure_frame_len(bytes.len())?;
    Ok(((bytes.len() as u32).to_be_bytes(), bytes))
}

// ABOUTME: Provides TCP connection management for SMPP v3.4 protocol communication
// ABOUTME: Implements frame-based I/O with buffering, splittable into independent reader and writer halves

use crate::codec::CodecError;
use crate::error::{SmppError, SmppResult};
use crate::frame::{self, Frame};
use bytes::{Buf, BytesMut};
use std::io::Cursor;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::warn;

/// SMPP v3.4 Connection Management
///
/// Handles frame-based communication over TCP for one SMPP session.
///
/// ## Session States
///
/// ```text
/// CLOSED → OPEN → BOUND_TX/BOUND_RX/BOUND_TRX → UNBOUND → CLOSED
/// ```
///
/// - **OPEN**: TCP connection established but no bind completed
/// - **BOUND_TX**: may submit_sm, enquire_link, unbind
/// - **BOUND_RX**: receives deliver_sm; may enquire_link, unbind
/// - **BOUND_TRX**: both of the above
///
/// `Connection` does not track those states; it only moves frames. The bind
/// handshake runs on a whole `Connection`, after which it is usually split
/// with [`Connection::into_split`] so a reader task and a writer task can
/// own one half each.
#[derive(Debug)]
pub struct Connection {
    // Decorated with a `BufWriter` for write-level buffering
    stream: BufWriter<TcpStream>,

    // The buffer for reading frames.
    buffer: BytesMut,
}

impl Connection {
    /// Create a new `Connection`, backed by `socket`. Read and write buffers
    /// are initialized.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            // 4KB covers a full short message PDU with room for a few queued ones
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    pub fn peer_addr(&self) -> SmppResult<SocketAddr> {
        Ok(self.stream.get_ref().peer_addr()?)
    }

    /// Read a single `Frame` value from the underlying stream.
    ///
    /// Waits until enough data has been buffered to parse a frame. Any data
    /// remaining after the frame stays buffered for the next call.
    ///
    /// # Returns
    ///
    /// On success, the received frame is returned. If the `TcpStream` is
    /// closed in a way that doesn't break a frame in half, it returns `None`.
    /// Otherwise, an error is returned.
    pub async fn read_frame(&mut self) -> SmppResult<Option<Frame>> {
        read_frame_from(self.stream.get_mut(), &mut self.buffer).await
    }

    /// Write a single `Frame` to the socket and flush it.
    pub async fn write_frame(&mut self, frame: &Frame) -> SmppResult<()> {
        write_frame_to(&mut self.stream, frame).await
    }

    /// Split into independently owned halves. Bytes already buffered on the
    /// read side move to the reader.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = self.stream.into_inner().into_split();
        (
            FrameReader {
                stream: read_half,
                buffer: self.buffer,
            },
            FrameWriter {
                stream: BufWriter::new(write_half),
            },
        )
    }
}

/// Read half of a split [`Connection`].
#[derive(Debug)]
pub struct FrameReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
}

impl FrameReader {
    pub async fn read_frame(&mut self) -> SmppResult<Option<Frame>> {
        read_frame_from(&mut self.stream, &mut self.buffer).await
    }
}

/// Write half of a split [`Connection`].
#[derive(Debug)]
pub struct FrameWriter {
    stream: BufWriter<OwnedWriteHalf>,
}

impl FrameWriter {
    pub async fn write_frame(&mut self, frame: &Frame) -> SmppResult<()> {
        write_frame_to(&mut self.stream, frame).await
    }

    /// Write a PDU that was encoded ahead of time.
    pub async fn write_pdu(&mut self, pdu: &[u8]) -> SmppResult<()> {
        self.stream.write_all(pdu).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush and half-close the socket.
    pub async fn shutdown(&mut self) -> SmppResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn read_frame_from<R>(stream: &mut R, buffer: &mut BytesMut) -> SmppResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = parse_frame(buffer)? {
            return Ok(Some(frame));
        }

        // `0` indicates "end of stream".
        if 0 == stream.read_buf(buffer).await? {
            // A clean shutdown leaves nothing half read in the buffer.
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(SmppError::ConnectionClosed)
            };
        }
    }
}

/// Tries to cut one frame off the front of `buffer`.
///
/// A complete PDU with invalid contents is consumed and surfaced as
/// `Frame::Malformed` so the session can nack it and keep reading. Only a
/// PDU whose length field cannot be trusted is a hard error, because the
/// stream can no longer be resynchronised.
fn parse_frame(buffer: &mut BytesMut) -> SmppResult<Option<Frame>> {
    let mut buf = Cursor::new(&buffer[..]);

    match Frame::check(&mut buf) {
        Ok(()) => {
            let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
            buf.set_position(0);

            let frame = match Frame::parse(&mut buf) {
                Ok(frame) => frame,
                Err(frame::Error::Invalid(err)) => malformed(buffer, err),
                Err(frame::Error::Incomplete) => malformed(
                    buffer,
                    CodecError::FieldValidation {
                        field: "command_length",
                        reason: "body shorter than its mandatory fields".to_string(),
                    },
                ),
                Err(other) => return Err(other.into()),
            };

            buffer.advance(len);
            Ok(Some(frame))
        }
        Err(frame::Error::Incomplete) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn malformed(buffer: &BytesMut, err: CodecError) -> Frame {
    let sequence_number = u32::from_be_bytes([buffer[12], buffer[13], buffer[14], buffer[15]]);
    let status = err.to_command_status();
    warn!(sequence_number, ?status, "discarding malformed PDU: {err}");
    Frame::Malformed {
        sequence_number,
        status,
    }
}

async fn write_frame_to<W>(stream: &mut BufWriter<W>, frame: &Frame) -> SmppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

// ABOUTME: Frame-level I/O over a byte stream, split into reader and writer halves
// ABOUTME: The reader reassembles frames and resynchronizes on preamble corruption

use crate::frame::{Frame, FrameError};
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Reads frames from the receive half of a stream.
///
/// Owns a growable reassembly buffer. Generic over the stream type so unit
/// tests can drive it with an in-memory duplex; the connection engine uses
/// the read half of a `TcpStream`.
#[derive(Debug)]
pub(crate) struct FrameReader<R> {
    half: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(half: R) -> FrameReader<R> {
        FrameReader {
            half,
            // Default to a 4KB read buffer; it grows as needed for frames
            // carrying large payloads.
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next valid frame.
    ///
    /// Returns `None` when the peer closed the stream orderly (an empty
    /// read). Everything else is resolved internally:
    ///
    /// - a transport read error discards the buffer and retries, since the
    ///   frame boundary has been lost anyway;
    /// - a corrupt preamble discards the buffer to resynchronize;
    /// - a complete frame that fails validation is dropped silently.
    pub(crate) async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Some(frame);
            }

            match self.half.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        debug!(
                            buffered = self.buffer.len(),
                            "peer closed mid-frame, dropping partial data"
                        );
                    }
                    return None;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, discarded = self.buffer.len(), "transport read failed");
                    self.buffer.clear();
                }
            }
        }
    }

    /// Extract at most one valid frame from the buffered data, skipping over
    /// invalid ones. `None` means more bytes are needed.
    fn take_frame(&mut self) -> Option<Frame> {
        loop {
            let total = match Frame::check(&self.buffer) {
                Ok(total) => total,
                Err(FrameError::Incomplete) => return None,
                Err(error) => {
                    warn!(%error, discarded = self.buffer.len(), "resynchronizing");
                    self.buffer.clear();
                    return None;
                }
            };

            let raw = self.buffer.split_to(total);
            if !Frame::validate(&raw) {
                warn!(len = total, "dropping invalid frame");
                continue;
            }
            match Frame::parse(&raw) {
                Ok(frame) => return Some(frame),
                Err(error) => {
                    // validate gates this path; a failure here means the two
                    // walks disagree, which is a codec bug worth surfacing
                    warn!(%error, "dropping frame that validated but failed to parse");
                    continue;
                }
            }
        }
    }
}

/// Writes serialized frames to the send half of a stream.
#[derive(Debug)]
pub(crate) struct FrameWriter<W> {
    half: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(half: W) -> FrameWriter<W> {
        FrameWriter {
            half: BufWriter::new(half),
        }
    }

    /// Write one serialized frame and flush it to the stream.
    pub(crate) async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.half.write_all(frame).await?;
        self.half.flush().await
    }

    /// Half-close the send direction; the peer observes an orderly EOF.
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

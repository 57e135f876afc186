//! Wire codec for notifications
//!
//! One JSON object per frame, terminated by a single `\n`. serde_json
//! escapes control characters inside strings, so the delimiter can never
//! appear inside an encoded payload.
//!
//! Wire format:  {"type":"created","id":42,"timestamp":"..."}\n

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

use super::Notification;

/// Maximum encoded frame size, delimiter included
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

/// Frame terminator
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default deadline for a single frame write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────

/// Encodes and decodes single notification frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationCodec {
    max_frame_size: usize,
}

impl Default for NotificationCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl NotificationCodec {
    /// Codec with a custom frame limit (delimiter included)
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Serialize a notification into one delimited frame
    pub fn encode(&self, notification: &Notification) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(notification)?;
        frame.push(FRAME_DELIMITER);

        if frame.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        Ok(frame)
    }

    /// Parse one frame body (delimiter already stripped)
    pub fn decode(&self, frame: &[u8]) -> Result<Notification> {
        if frame.len() + 1 > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: frame.len() + 1,
                max: self.max_frame_size,
            });
        }

        let body = frame.strip_suffix(b"\r").unwrap_or(frame);
        Ok(serde_json::from_slice(body)?)
    }
}

// ─────────────────────────────────────────────────────────────────
// Frame Reader
// ─────────────────────────────────────────────────────────────────

/// Reads delimiter-terminated frames from a byte stream.
///
/// Memory use is bounded by the frame limit: an oversized frame is skipped
/// up to its delimiter and reported as `FrameTooLarge`, after which the
/// stream is positioned at the next frame. Partial frames survive a
/// cancelled read, so `read_frame` can sit under a timeout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    codec: NotificationCodec,
    buf: Vec<u8>,
    discarding: bool,
    skipped: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, codec: NotificationCodec) -> Self {
        Self {
            inner: BufReader::new(inner),
            codec,
            buf: Vec::new(),
            discarding: false,
            skipped: 0,
        }
    }

    /// Read the next frame body without its delimiter
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let max = self.codec.max_frame_size();

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                self.buf.clear();
                return Err(Error::ConnectionClosed);
            }

            let newline = available.iter().position(|b| *b == FRAME_DELIMITER);
            let take = newline.map(|pos| pos + 1).unwrap_or(available.len());
            let body_len = newline.unwrap_or(available.len());

            if !self.discarding && self.buf.len() + body_len + 1 > max {
                self.discarding = true;
                self.skipped = self.buf.len();
                self.buf = Vec::new();
            }

            if self.discarding {
                self.skipped += take;
            } else {
                self.buf.extend_from_slice(&available[..body_len]);
            }
            self.inner.consume(take);

            if newline.is_some() {
                if self.discarding {
                    self.discarding = false;
                    let size = std::mem::take(&mut self.skipped);
                    return Err(Error::FrameTooLarge { size, max });
                }
                return Ok(std::mem::take(&mut self.buf));
            }
        }
    }

    /// Read and decode one notification, bounded by `deadline`
    pub async fn read_notification(&mut self, deadline: Duration) -> Result<Notification> {
        let frame = tokio::time::timeout(deadline, self.read_frame())
            .await
            .map_err(|_| Error::timeout("read", deadline))??;
        self.codec.decode(&frame)
    }
}

// ─────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────

/// Encode and write one notification, bounded by `deadline`.
///
/// Encoding happens first, so an oversized notification never reaches the wire.
pub async fn write_notification<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &NotificationCodec,
    notification: &Notification,
    deadline: Duration,
) -> Result<()> {
    let frame = codec.encode(notification)?;
    write_frame(writer, &frame, deadline).await
}

/// Write an already encoded frame, bounded by `deadline`
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
    deadline: Duration,
) -> Result<()> {
    tokio::time::timeout(deadline, async {
        writer.write_all(frame).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| Error::timeout("write", deadline))??;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

//! Length-prefixed JSON framing over any async byte pair.
//!
//! A frame is 8 ASCII hex digits encoding the body length as an unsigned
//! 32-bit value, followed by exactly that many bytes of UTF-8 JSON. Frames
//! are independent: one flush per message, no interleaving, no compression.
//!
//! Every blocking read and write races the session's cancellation token, so
//! a stuck peer can never wedge a run. Invalid JSON and a non-object top
//! level are both reported as a shape violation.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::errors::{ProtocolError, SessionError};

/// Upper bound on a frame body. Anything larger is rejected before the body
/// is read, so a corrupt prefix cannot trigger a giant allocation.
pub const MAX_FRAME: u32 = 64 * 1024 * 1024;

const PREFIX_LEN: usize = 8;

/// Framing codec wrapping one reader/writer pair.
pub struct FrameCodec<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> FrameCodec<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Marshal `value` to JSON and write it as one frame, flushing once.
    pub async fn send<T: Serialize + Sync>(
        &mut self,
        value: &T,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| SessionError::Transport(format!("encoding frame body: {e}")))?;
        let len = u32::try_from(body.len()).map_err(|_| ProtocolError::Oversize(u32::MAX))?;
        if len > MAX_FRAME {
            return Err(ProtocolError::Oversize(len).into());
        }
        let prefix = format!("{len:08x}");

        tokio::select! {
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            res = async {
                self.writer.write_all(prefix.as_bytes()).await?;
                self.writer.write_all(&body).await?;
                self.writer.flush().await
            } => res.map_err(|e| SessionError::Transport(e.to_string())),
        }
    }

    /// Read one frame and parse its body.
    ///
    /// EOF before the prefix completes is the peer closing and is reported
    /// as [`SessionError::StreamClosed`]; EOF mid-body is a truncated
    /// frame.
    pub async fn receive(&mut self, cancel: &CancellationToken) -> Result<Value, SessionError> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.read_full(&mut prefix, Eof::StreamClosed, cancel).await?;

        if !prefix.iter().all(u8::is_ascii_hexdigit) {
            return Err(ProtocolError::BadPrefix.into());
        }
        // Validated as hex above, so both conversions are infallible.
        let text = std::str::from_utf8(&prefix).map_err(|_| ProtocolError::BadPrefix)?;
        let len = u32::from_str_radix(text, 16).map_err(|_| ProtocolError::BadPrefix)?;
        if len > MAX_FRAME {
            return Err(ProtocolError::Oversize(len).into());
        }

        let mut body = vec![0u8; len as usize];
        self.read_full(&mut body, Eof::Truncated, cancel).await?;

        let value: Value =
            serde_json::from_slice(&body).map_err(|_| ProtocolError::Shape)?;
        if !value.is_object() {
            return Err(ProtocolError::Shape.into());
        }
        Ok(value)
    }

    /// Fill `buf` completely, racing the cancellation token. `on_eof` is
    /// what an early end of stream means at this point of the frame.
    async fn read_full(
        &mut self,
        buf: &mut [u8],
        on_eof: Eof,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = tokio::select! {
                () = cancel.cancelled() => return Err(SessionError::Cancelled),
                res = self.reader.read(&mut buf[filled..]) => {
                    res.map_err(|e| SessionError::Transport(e.to_string()))?
                }
            };
            if n == 0 {
                return Err(match on_eof {
                    Eof::StreamClosed => SessionError::StreamClosed,
                    Eof::Truncated => ProtocolError::Truncated.into(),
                });
            }
            filled += n;
        }
        Ok(())
    }
}

/// Meaning of an early EOF, by frame position.
#[derive(Clone, Copy)]
enum Eof {
    StreamClosed,
    Truncated,
}

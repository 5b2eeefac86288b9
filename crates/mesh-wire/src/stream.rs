//! The physical-stream seam. TCP/TLS/QUIC transports are out of scope as
//! *implementations* (spec.md §1), but Crane still needs something
//! byte-oriented to drive its handshake and steady-state loops over.
//! [`PhysicalStream`] is that boundary — any Tokio `AsyncRead + AsyncWrite`
//! already qualifies, including `tokio::net::TcpStream` and
//! `tokio::io::DuplexStream`. [`read_frame`]/[`write_frame`] implement the
//! outer-frame wire format (length prefix + payload, spec.md §6) against
//! that boundary so Crane's loops never touch raw varint bytes themselves.

use crate::outer_frame::{self, MAX_OUTER_FRAME};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Anything byte-oriented a Crane can run its init handshake and
/// steady-state loops over.
pub trait PhysicalStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PhysicalStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Read one outer frame: a varint length prefix followed by that many
/// payload bytes. `Ok(None)` is a clean EOF exactly at a frame boundary;
/// any other EOF, or a declared length over [`MAX_OUTER_FRAME`], is an
/// error (spec.md §8: "any inbound outer frame claiming length > 16384
/// causes Crane shutdown with MalformedData before any body bytes are
/// read").
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = Vec::with_capacity(4);
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if len_buf.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid length-prefix",
            ));
        }
        len_buf.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            break;
        }
        if len_buf.len() >= mesh_core::varint::MAX_ENCODED_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "outer frame length prefix too long",
            ));
        }
    }
    let (len, _) = mesh_core::varint::decode(&len_buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    if len as usize > MAX_OUTER_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("outer frame length {len} exceeds the {MAX_OUTER_FRAME}-byte ceiling"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one outer frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let framed =
        outer_frame::encode(payload).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    writer.write_all(&framed).await?;
    writer.flush().await
}

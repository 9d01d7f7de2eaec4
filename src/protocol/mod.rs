//! RTSP wire protocol: message framing, headers, interleaved frames
//!
//! Parsing is strictly line-oriented over a buffered byte stream, with
//! hard limits on every token so a misbehaving peer cannot grow buffers
//! without bound. All reads are async; encoding goes through a `BytesMut`
//! so a full message is written with a single `write_all`.

pub mod header;
pub mod interleaved;
pub mod message;
pub mod transport;

pub use header::HeaderMap;
pub use interleaved::{ChannelMap, FrameKind, RtpFrame};
pub use message::{Method, Request, Response, StatusCode};
pub use transport::Transport;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Read bytes up to and including `delim`, returning them without the
/// delimiter. Fails with `Malformed` if the delimiter is not found within
/// `max` bytes (delimiter included in the count).
pub(crate) async fn read_until_limited<R: AsyncRead + Unpin>(
    r: &mut R,
    delim: u8,
    max: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = r.read_u8().await?;
        if b == delim {
            return Ok(out);
        }
        if out.len() + 1 >= max {
            return Err(Error::Malformed(format!(
                "token exceeds {} bytes before '{}'",
                max,
                delim.escape_ascii()
            )));
        }
        out.push(b);
    }
}

/// Read a single byte and require it to equal `expected`.
pub(crate) async fn expect_byte<R: AsyncRead + Unpin>(r: &mut R, expected: u8) -> Result<()> {
    let b = r.read_u8().await?;
    if b != expected {
        return Err(Error::Malformed(format!(
            "expected '{}', got '{}'",
            expected.escape_ascii(),
            b.escape_ascii()
        )));
    }
    Ok(())
}

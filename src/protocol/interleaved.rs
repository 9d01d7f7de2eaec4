//! Interleaved `$` framing and channel bookkeeping
//!
//! An interleaved frame is `0x24 | channel:u8 | length:u16-be | payload`.
//! The only ambiguity on the wire is the first byte: RTSP start lines
//! begin with an ASCII letter, frames begin with `$`. The demultiplexer
//! reads one byte and routes on it.

use std::fmt;
use std::sync::RwLock;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// First byte of every interleaved frame.
pub const INTERLEAVED_MAGIC: u8 = 0x24;

/// What an interleaved channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Audio,
    AudioControl,
    Video,
    VideoControl,
}

impl FrameKind {
    pub fn is_video(&self) -> bool {
        matches!(self, FrameKind::Video)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameKind::Audio => "audio",
            FrameKind::AudioControl => "audio control",
            FrameKind::Video => "video",
            FrameKind::VideoControl => "video control",
        })
    }
}

/// One RTP (or RTCP) frame in flight through the relay.
///
/// The payload is reference-counted, so fanning a frame out to N
/// subscribers clones the handle, not the data.
#[derive(Debug, Clone)]
pub struct RtpFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl RtpFrame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Read the remainder of an interleaved frame after the `$` byte.
pub async fn read_interleaved<R: AsyncRead + Unpin>(r: &mut R) -> Result<(u8, Bytes)> {
    let mut head = [0u8; 3];
    r.read_exact(&mut head).await?;
    let channel = head[0];
    let len = u16::from_be_bytes([head[1], head[2]]) as usize;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok((channel, Bytes::from(payload)))
}

/// Encode a full interleaved frame.
pub fn encode_interleaved(channel: u8, payload: &[u8], buf: &mut BytesMut) -> Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(Error::Malformed(format!(
            "interleaved payload of {} bytes exceeds u16 length",
            payload.len()
        )));
    }
    buf.reserve(4 + payload.len());
    buf.put_u8(INTERLEAVED_MAGIC);
    buf.put_u8(channel);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
struct Channels {
    a_rtp: Option<u8>,
    a_rtcp: Option<u8>,
    v_rtp: Option<u8>,
    v_rtcp: Option<u8>,
}

/// Channel numbers negotiated at SETUP, one slot per frame kind.
///
/// Shared between the session (which binds channels as SETUP requests
/// arrive) and the player sender task (which resolves the outgoing
/// channel per frame), so bindings take effect immediately.
#[derive(Debug, Default)]
pub struct ChannelMap {
    inner: RwLock<Channels>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed layout this crate's client negotiates: video on 0/1,
    /// audio on 2/3.
    pub fn client_default() -> Self {
        let map = Self::new();
        map.bind_video(0, 1);
        map.bind_audio(2, 3);
        map
    }

    pub fn bind_audio(&self, rtp: u8, rtcp: u8) {
        let mut ch = self.inner.write().unwrap();
        ch.a_rtp = Some(rtp);
        ch.a_rtcp = Some(rtcp);
    }

    pub fn bind_video(&self, rtp: u8, rtcp: u8) {
        let mut ch = self.inner.write().unwrap();
        ch.v_rtp = Some(rtp);
        ch.v_rtcp = Some(rtcp);
    }

    /// Classify an inbound channel number.
    pub fn kind_for(&self, channel: u8) -> Option<FrameKind> {
        let ch = self.inner.read().unwrap();
        if ch.a_rtp == Some(channel) {
            Some(FrameKind::Audio)
        } else if ch.a_rtcp == Some(channel) {
            Some(FrameKind::AudioControl)
        } else if ch.v_rtp == Some(channel) {
            Some(FrameKind::Video)
        } else if ch.v_rtcp == Some(channel) {
            Some(FrameKind::VideoControl)
        } else {
            None
        }
    }

    /// Outgoing channel number for a frame kind, if one was bound.
    pub fn channel_for(&self, kind: FrameKind) -> Option<u8> {
        let ch = self.inner.read().unwrap();
        match kind {
            FrameKind::Audio => ch.a_rtp,
            FrameKind::AudioControl => ch.a_rtcp,
            FrameKind::Video => ch.v_rtp,
            FrameKind::VideoControl => ch.v_rtcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_interleaved() {
        let mut input: &[u8] = &[0x00, 0x00, 0x05, b'A', b'B', b'C', b'D', b'E'];
        let (channel, payload) = read_interleaved(&mut input).await.unwrap();
        assert_eq!(channel, 0);
        assert_eq!(&payload[..], b"ABCDE");
    }

    #[tokio::test]
    async fn test_read_interleaved_short_payload() {
        let mut input: &[u8] = &[0x02, 0x00, 0x05, b'X'];
        assert!(read_interleaved(&mut input).await.is_err());
    }

    #[test]
    fn test_encode_interleaved() {
        let mut buf = BytesMut::new();
        encode_interleaved(2, b"XYZ", &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x24, 0x02, 0x00, 0x03, b'X', b'Y', b'Z']);
    }

    #[test]
    fn test_encode_interleaved_oversized() {
        let payload = vec![0u8; u16::MAX as usize + 1];
        let mut buf = BytesMut::new();
        assert!(encode_interleaved(0, &payload, &mut buf).is_err());
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buf = BytesMut::new();
        encode_interleaved(7, b"payload", &mut buf).unwrap();

        let mut input: &[u8] = &buf;
        let magic = [input[0]];
        input = &input[1..];
        assert_eq!(magic[0], INTERLEAVED_MAGIC);
        let (channel, payload) = read_interleaved(&mut input).await.unwrap();
        assert_eq!(channel, 7);
        assert_eq!(&payload[..], b"payload");
    }

    #[test]
    fn test_channel_map_dispatch() {
        // audio on 2/3, video on 0/1
        let map = ChannelMap::new();
        map.bind_audio(2, 3);
        map.bind_video(0, 1);

        assert_eq!(map.kind_for(0), Some(FrameKind::Video));
        assert_eq!(map.kind_for(1), Some(FrameKind::VideoControl));
        assert_eq!(map.kind_for(2), Some(FrameKind::Audio));
        assert_eq!(map.kind_for(3), Some(FrameKind::AudioControl));
        assert_eq!(map.kind_for(9), None);

        assert_eq!(map.channel_for(FrameKind::Video), Some(0));
        assert_eq!(map.channel_for(FrameKind::Audio), Some(2));
    }

    #[test]
    fn test_channel_map_unbound() {
        let map = ChannelMap::new();
        assert_eq!(map.kind_for(0), None);
        assert_eq!(map.channel_for(FrameKind::Video), None);

        map.bind_video(4, 5);
        assert_eq!(map.kind_for(4), Some(FrameKind::Video));
        assert_eq!(map.channel_for(FrameKind::Audio), None);
    }
}

//! Media-level parsing: RTP headers, H.264 keyframes, GOP caching, SDP

pub mod gop;
pub mod h264;
pub mod rtp;
pub mod sdp;

pub use gop::GopCache;
pub use rtp::RtpPacket;
pub use sdp::{MediaInfo, MediaKind, SdpDescription};

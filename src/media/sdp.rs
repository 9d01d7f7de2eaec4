//! SDP attribute extraction
//!
//! Parses the subset of a DESCRIBE/ANNOUNCE body the relay needs: per
//! media section the payload type, codec, control URL, clock rate and the
//! fmtp parameters for AAC (`config`, `sizelength`, `indexlength`) and
//! H.264/H.265 (`sprop-parameter-sets`). Unknown lines and attributes are
//! ignored, not errors.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Media section kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Extracted attributes of one media section.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub payload_type: Option<u8>,
    /// Normalized codec name: `aac`, `h264`, `h265`, or empty if unknown.
    pub codec: String,
    pub control: String,
    pub time_scale: u32,
    pub config: Vec<u8>,
    pub size_length: u32,
    pub index_length: u32,
    pub parameter_sets: Vec<Vec<u8>>,
}

impl MediaInfo {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            payload_type: None,
            codec: String::new(),
            control: String::new(),
            time_scale: 0,
            config: Vec::new(),
            size_length: 0,
            index_length: 0,
            parameter_sets: Vec::new(),
        }
    }
}

/// The parsed subset of an SDP document.
#[derive(Debug, Clone, Default)]
pub struct SdpDescription {
    pub audio: Option<MediaInfo>,
    pub video: Option<MediaInfo>,
}

impl SdpDescription {
    /// Parse an SDP body. A section or attribute the relay does not
    /// understand is skipped, never an error.
    pub fn parse(raw: &str) -> SdpDescription {
        let mut sdp = SdpDescription::default();
        let mut current: Option<MediaKind> = None;

        for line in raw.lines() {
            let line = line.trim();
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };

            match kind {
                "m" => {
                    let tokens: Vec<&str> = value.split_whitespace().collect();
                    let media_kind = match tokens.first() {
                        Some(&"audio") => MediaKind::Audio,
                        Some(&"video") => MediaKind::Video,
                        _ => {
                            current = None;
                            continue;
                        }
                    };
                    let mut info = MediaInfo::new(media_kind);
                    info.payload_type = tokens.get(3).and_then(|t| t.parse().ok());
                    match media_kind {
                        MediaKind::Audio => sdp.audio = Some(info),
                        MediaKind::Video => sdp.video = Some(info),
                    }
                    current = Some(media_kind);
                }
                "a" => {
                    let Some(info) = (match current {
                        Some(MediaKind::Audio) => sdp.audio.as_mut(),
                        Some(MediaKind::Video) => sdp.video.as_mut(),
                        None => None,
                    }) else {
                        continue;
                    };
                    parse_attribute(info, value);
                }
                _ => {}
            }
        }

        sdp
    }

    /// Sections present in the description, for per-track SETUP.
    pub fn tracks(&self) -> Vec<&MediaInfo> {
        self.video.iter().chain(self.audio.iter()).collect()
    }
}

/// Handle one `a=` line: `attr[:value]`.
fn parse_attribute(info: &mut MediaInfo, value: &str) {
    let Some((attr, value)) = value.split_once(':') else {
        return;
    };

    match attr {
        "control" => info.control = value.trim().to_string(),
        "rtpmap" => {
            // rtpmap:<payload type> <codec>/<clock rate>[/<channels>]
            let Some((_, encoding)) = value.split_once(' ') else {
                return;
            };
            let mut parts = encoding.split('/');
            let name = parts.next().unwrap_or_default();
            info.codec = match name {
                "MPEG4-GENERIC" => "aac".to_string(),
                "H264" => "h264".to_string(),
                "H265" => "h265".to_string(),
                _ => String::new(),
            };
            if let Some(rate) = parts.next().and_then(|r| r.parse().ok()) {
                info.time_scale = rate;
            }
        }
        "fmtp" => {
            // fmtp:<payload type> key=value;key=value;...
            let Some((_, params)) = value.split_once(' ') else {
                return;
            };
            for param in params.split(';') {
                let Some((key, value)) = param.split_once('=') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "config" => {
                        if let Some(bytes) = decode_hex(value) {
                            info.config = bytes;
                        }
                    }
                    "sizelength" => {
                        if let Ok(n) = value.parse() {
                            info.size_length = n;
                        }
                    }
                    "indexlength" => {
                        if let Ok(n) = value.parse() {
                            info.index_length = n;
                        }
                    }
                    "sprop-parameter-sets" => {
                        info.parameter_sets = value
                            .split(',')
                            .filter_map(|set| BASE64.decode(set).ok())
                            .collect();
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

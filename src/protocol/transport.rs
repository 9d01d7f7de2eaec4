//! `Transport` header parsing and formatting
//!
//! Only `RTP/AVP/TCP;unicast;interleaved=N-M` is accepted; UDP transport
//! specs are rejected outright.

use std::fmt;

use crate::error::{Error, Result};

/// A negotiated TCP-interleaved transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
}

impl Transport {
    pub fn new(rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            rtp_channel,
            rtcp_channel,
        }
    }

    /// Parse a `Transport` header value.
    pub fn parse(value: &str) -> Result<Transport> {
        let mut tcp = false;
        let mut interleaved = None;

        for part in value.split(';') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("RTP/AVP/TCP") {
                tcp = true;
            } else if let Some(spec) = part.strip_prefix("interleaved=") {
                let (rtp, rtcp) = match spec.split_once('-') {
                    Some((n, m)) => (parse_channel(n)?, parse_channel(m)?),
                    // a single channel implies the adjacent RTCP channel
                    None => {
                        let n = parse_channel(spec)?;
                        (n, n.wrapping_add(1))
                    }
                };
                interleaved = Some((rtp, rtcp));
            }
        }

        if !tcp {
            return Err(Error::Protocol(format!(
                "unsupported transport '{}': only RTP/AVP/TCP interleaved is accepted",
                value
            )));
        }

        match interleaved {
            Some((rtp_channel, rtcp_channel)) => Ok(Transport {
                rtp_channel,
                rtcp_channel,
            }),
            None => Err(Error::Protocol(format!(
                "transport '{}' carries no interleaved channels",
                value
            ))),
        }
    }
}

fn parse_channel(s: &str) -> Result<u8> {
    s.parse::<u8>()
        .map_err(|_| Error::Protocol(format!("invalid interleaved channel '{}'", s)))
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            self.rtp_channel, self.rtcp_channel
        )
    }
}

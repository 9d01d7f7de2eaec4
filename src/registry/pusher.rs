//! Pusher: producer-side owner of a named stream
//!
//! A pusher is fed by exactly one source (a server session that ANNOUNCEd,
//! or a pulling client), holds the subscriber set, and runs one dispatcher
//! task that drains the inbound queue, maintains the GOP cache and fans
//! frames out. The source can be swapped under it (rebind) without the
//! subscribers noticing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock as StdRwLock};

use bytes::BytesMut;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Error, Result};
use crate::media::{h264, GopCache, RtpPacket, SdpDescription};
use crate::protocol::{FrameKind, RtpFrame};
use crate::registry::player::Player;
use crate::registry::random_id;
use crate::shutdown::StopToken;

/// What kind of endpoint feeds a pusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A server-side session that ANNOUNCEd the stream
    Session,
    /// A pulling client owned by this process
    Client,
}

/// The endpoint currently feeding a pusher.
#[derive(Debug, Clone)]
pub struct PusherSource {
    pub id: String,
    pub kind: SourceKind,
    pub stop: Arc<StopToken>,
}

/// Stream description a pusher hands to its subscribers.
#[derive(Debug, Clone, Default)]
pub struct PusherMedia {
    pub sdp_raw: String,
    pub video_codec: String,
    pub video_control: String,
    pub audio_codec: String,
    pub audio_control: String,
}

impl PusherMedia {
    /// Extract the fields the relay needs from an SDP body.
    pub fn from_sdp(raw: &str) -> PusherMedia {
        let sdp = SdpDescription::parse(raw);
        let mut media = PusherMedia {
            sdp_raw: raw.to_string(),
            ..Default::default()
        };
        if let Some(video) = &sdp.video {
            media.video_codec = video.codec.clone();
            media.video_control = video.control.clone();
        }
        if let Some(audio) = &sdp.audio {
            media.audio_codec = audio.codec.clone();
            media.audio_control = audio.control.clone();
        }
        media
    }
}

/// Optional per-frame payload hook, applied at keyframe boundaries to
/// bytes `2..` of the RTP payload. Exactly one transform may be
/// configured; the hook must preserve header length and sequencing.
#[derive(Clone)]
pub enum PayloadTransform {
    Encrypt(Arc<dyn Fn(&[u8], u16) -> Vec<u8> + Send + Sync>),
    Decrypt(Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>),
}

impl PayloadTransform {
    fn apply(&self, payload: &[u8], sequence_number: u16) -> Vec<u8> {
        match self {
            PayloadTransform::Encrypt(f) => f(payload, sequence_number),
            PayloadTransform::Decrypt(f) => f(payload),
        }
    }
}

impl fmt::Debug for PayloadTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayloadTransform::Encrypt(_) => "PayloadTransform::Encrypt",
            PayloadTransform::Decrypt(_) => "PayloadTransform::Decrypt",
        })
    }
}

/// Producer-side owner of one stream path.
pub struct Pusher {
    id: String,
    path: String,
    stop: Arc<StopToken>,

    source: StdRwLock<PusherSource>,
    media: StdRwLock<PusherMedia>,

    players: RwLock<HashMap<String, Arc<Player>>>,

    gop_enabled: bool,
    gop: Mutex<GopCache>,
    transform: Option<PayloadTransform>,

    inbound_tx: mpsc::UnboundedSender<RtpFrame>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<RtpFrame>>>,
}

impl Pusher {
    /// Pusher fed by a server session (ANNOUNCE/RECORD flow).
    pub fn from_session(
        path: impl Into<String>,
        source: PusherSource,
        media: PusherMedia,
        gop_enabled: bool,
        gop_max_size: usize,
    ) -> Arc<Pusher> {
        Self::build(path.into(), source, media, gop_enabled, gop_max_size, None)
    }

    /// Pusher fed by a pulling client, optionally with a payload
    /// transform.
    pub fn from_client(
        path: impl Into<String>,
        source: PusherSource,
        media: PusherMedia,
        gop_enabled: bool,
        gop_max_size: usize,
        transform: Option<PayloadTransform>,
    ) -> Arc<Pusher> {
        Self::build(path.into(), source, media, gop_enabled, gop_max_size, transform)
    }

    fn build(
        path: String,
        source: PusherSource,
        media: PusherMedia,
        gop_enabled: bool,
        gop_max_size: usize,
        transform: Option<PayloadTransform>,
    ) -> Arc<Pusher> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Pusher {
            id: random_id(),
            path,
            stop: StopToken::new(),
            source: StdRwLock::new(source),
            media: StdRwLock::new(media),
            players: RwLock::new(HashMap::new()),
            gop_enabled,
            gop: Mutex::new(GopCache::with_max_size(gop_max_size)),
            transform,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source_id(&self) -> String {
        self.source.read().unwrap().id.clone()
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.read().unwrap().kind
    }

    pub fn sdp_raw(&self) -> String {
        self.media.read().unwrap().sdp_raw.clone()
    }

    pub fn video_codec(&self) -> String {
        self.media.read().unwrap().video_codec.clone()
    }

    pub fn audio_codec(&self) -> String {
        self.media.read().unwrap().audio_codec.clone()
    }

    pub fn video_control(&self) -> String {
        self.media.read().unwrap().video_control.clone()
    }

    pub fn audio_control(&self) -> String {
        self.media.read().unwrap().audio_control.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Enqueue an inbound frame. Frames from a source that has been
    /// replaced by a rebind are dropped.
    pub fn ingest(&self, source_id: &str, frame: RtpFrame) {
        if self.source.read().unwrap().id != source_id {
            tracing::debug!(
                pusher = %self.path,
                source_id = source_id,
                "Dropping frame from stale source"
            );
            return;
        }
        let _ = self.inbound_tx.send(frame);
    }

    /// Swap in a new session-backed source, keeping the subscriber set.
    ///
    /// The GOP cache is cleared (subscribers joined mid-GOP of the old
    /// source must wait for the new source's first keyframe) and the old
    /// session is stopped. Client-backed pushers refuse rebinding.
    pub fn rebind(&self, source: PusherSource, media: PusherMedia) -> Result<()> {
        let old = {
            let mut current = self.source.write().unwrap();
            if current.kind == SourceKind::Client {
                return Err(Error::Conflict(format!(
                    "client-backed pusher on '{}' cannot be rebound",
                    self.path
                )));
            }
            std::mem::replace(&mut *current, source)
        };

        *self.media.write().unwrap() = media;
        self.gop.lock().unwrap().clear();
        old.stop.stop();

        tracing::info!(
            pusher = %self.path,
            old_session = %old.id,
            new_session = %self.source_id(),
            "Pusher rebound to new session"
        );
        Ok(())
    }

    pub async fn has_player(&self, id: &str) -> bool {
        self.players.read().await.contains_key(id)
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    /// Enroll a subscriber and start its sender task.
    ///
    /// The GOP replay happens under the subscriber-map write lock, so a
    /// concurrent broadcast cannot slip a frame between the replayed
    /// sequence and the live stream.
    pub async fn add_player(&self, player: Arc<Player>) {
        let mut players = self.players.write().await;
        if players.contains_key(player.id()) {
            return;
        }

        if self.gop_enabled {
            let cached = self.gop.lock().unwrap().snapshot();
            for frame in cached {
                player.queue_frame(frame);
            }
        }

        players.insert(player.id().to_string(), player.clone());
        let count = players.len();
        drop(players);

        tokio::spawn(player.run());
        tracing::info!(pusher = %self.path, players = count, "Player enrolled");
    }

    pub async fn remove_player(&self, id: &str) {
        let mut players = self.players.write().await;
        if players.remove(id).is_some() {
            let count = players.len();
            drop(players);
            tracing::info!(pusher = %self.path, players = count, "Player removed");
        }
    }

    /// Stop and drop every subscriber. Used when the pusher goes away.
    pub async fn clear_players(&self) {
        let players: Vec<Arc<Player>> = {
            let mut map = self.players.write().await;
            map.drain().map(|(_, p)| p).collect()
        };
        for player in players {
            player.stop();
        }
    }

    /// Dispatcher task: drain the inbound queue, gate through the GOP
    /// cache, broadcast to subscribers.
    pub async fn run(self: Arc<Self>) {
        let rx = self.inbound_rx.lock().unwrap().take();
        let Some(mut rx) = rx else {
            return;
        };

        tracing::debug!(pusher = %self.path, id = %self.id, "Pusher dispatcher started");

        loop {
            let frame = tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = self.stop.stopped() => break,
            };

            let frame = self.process(frame);

            // snapshot under the read lock, enqueue outside it, so one
            // slow player cannot stall fanout to the rest
            let players: Vec<Arc<Player>> =
                self.players.read().await.values().cloned().collect();
            for player in players {
                player.queue_frame(frame.clone());
            }
        }

        tracing::debug!(pusher = %self.path, id = %self.id, "Pusher dispatcher stopped");
    }

    /// GOP-cache maintenance for one inbound frame. Returns the frame to
    /// broadcast, which differs from the input only when a payload
    /// transform ran.
    fn process(&self, frame: RtpFrame) -> RtpFrame {
        if !self.gop_enabled {
            return frame;
        }

        let mut frame = frame;
        if frame.kind == FrameKind::Video
            && self.video_codec().eq_ignore_ascii_case("h264")
        {
            if let Some(pkt) = RtpPacket::parse(&frame.payload) {
                if h264::is_keyframe(pkt.payload(&frame.payload)) {
                    if let Some(transform) = &self.transform {
                        frame = transform_frame(&frame, &pkt, transform);
                    }
                    self.gop.lock().unwrap().start_gop();
                }
            }
        }

        if matches!(frame.kind, FrameKind::Audio | FrameKind::Video) {
            self.gop.lock().unwrap().push(frame.clone());
        }
        frame
    }

    #[cfg(test)]
    pub(crate) fn gop_frame_count(&self) -> usize {
        self.gop.lock().unwrap().frame_count()
    }
}

impl fmt::Debug for Pusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pusher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("gop_enabled", &self.gop_enabled)
            .finish_non_exhaustive()
    }
}

/// Rewrite the payload tail through the configured hook, keeping the RTP
/// header and the first two payload bytes in place.
fn transform_frame(frame: &RtpFrame, pkt: &RtpPacket, transform: &PayloadTransform) -> RtpFrame {
    let payload = pkt.payload(&frame.payload);
    if payload.len() < 2 {
        return frame.clone();
    }

    let rewritten = transform.apply(&payload[2..], pkt.sequence_number);
    let mut out = BytesMut::with_capacity(pkt.payload_offset + 2 + rewritten.len());
    out.extend_from_slice(&frame.payload[..pkt.payload_offset + 2]);
    out.extend_from_slice(&rewritten);
    RtpFrame::new(frame.kind, out.freeze())
}

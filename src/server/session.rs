//! Per-connection server session
//!
//! One task per accepted TCP connection. The main loop is the
//! interleaved demultiplexer: a `$` byte starts an RTP frame routed to
//! the bound pusher, any other byte starts an RTSP request. A session is
//! unassigned until ANNOUNCE makes it a pusher or DESCRIBE makes it a
//! player; RECORD is only valid for pushers and PLAY only for players.
//!
//! Handler failures answer with a status code on this connection and
//! never propagate to other sessions.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use url::Url;

use crate::auth::{self, Credentials};
use crate::error::{Error, Result};
use crate::protocol::interleaved::{encode_interleaved, read_interleaved, INTERLEAVED_MAGIC};
use crate::protocol::{ChannelMap, Method, Request, Response, RtpFrame, StatusCode, Transport};
use crate::registry::{
    random_id, AttachOutcome, Player, Pusher, PusherMedia, PusherRegistry, PusherSource, SourceKind,
};
use crate::server::config::ServerConfig;
use crate::shutdown::StopToken;

/// Exclusive write side of a session's TCP connection.
///
/// The lock is held around each full message or interleaved frame, so
/// responses written by the session task and frames written by the
/// player sender task never interleave mid-message.
pub struct SessionWriter {
    inner: Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl SessionWriter {
    pub fn new(w: impl AsyncWrite + Send + Unpin + 'static) -> SessionWriter {
        Self::with_capacity(8 * 1024, w)
    }

    pub fn with_capacity(capacity: usize, w: impl AsyncWrite + Send + Unpin + 'static) -> SessionWriter {
        SessionWriter {
            inner: Mutex::new(BufWriter::with_capacity(capacity, Box::new(w))),
        }
    }

    pub async fn write_response(&self, res: &Response) -> Result<()> {
        let mut buf = BytesMut::new();
        res.encode(&mut buf);
        let mut w = self.inner.lock().await;
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }

    pub async fn write_frame(&self, channel: u8, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        encode_interleaved(channel, payload, &mut buf)?;
        let mut w = self.inner.lock().await;
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }

    pub async fn close(&self) {
        let mut w = self.inner.lock().await;
        let _ = w.shutdown().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionRole {
    Unassigned,
    Pusher,
    Player,
}

/// Server-side per-connection state machine.
pub struct Session {
    id: String,
    config: ServerConfig,
    registry: Arc<PusherRegistry>,

    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Arc<SessionWriter>,
    channels: Arc<ChannelMap>,
    stop: Arc<StopToken>,

    role: SessionRole,
    url: Option<Url>,
    audio_control: String,
    video_control: String,

    pusher: Option<Arc<Pusher>>,
    player: Option<Arc<Player>>,
}

impl Session {
    pub fn new(
        stream: impl AsyncRead + AsyncWrite + Send + 'static,
        config: ServerConfig,
        registry: Arc<PusherRegistry>,
    ) -> Session {
        let (r, w) = tokio::io::split(stream);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(r);
        Session {
            id: random_id(),
            reader: BufReader::with_capacity(config.read_buffer_size, reader),
            writer: Arc::new(SessionWriter::with_capacity(config.write_buffer_size, w)),
            config,
            registry,
            channels: Arc::new(ChannelMap::new()),
            stop: StopToken::new(),
            role: SessionRole::Unassigned,
            url: None,
            audio_control: String::new(),
            video_control: String::new(),
            pusher: None,
            player: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop_token(&self) -> Arc<StopToken> {
        self.stop.clone()
    }

    /// Drive the session until the peer disconnects or it is stopped,
    /// then tear down in order.
    pub async fn run(mut self) {
        tracing::debug!(session = %self.id, "Session started");

        if let Err(e) = self.main_loop().await {
            match e {
                Error::ConnectionClosed => {
                    tracing::debug!(session = %self.id, "Peer disconnected")
                }
                e => tracing::debug!(session = %self.id, error = %e, "Session error"),
            }
        }

        self.teardown().await;
    }

    async fn main_loop(&mut self) -> Result<()> {
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }

            // players legitimately go quiet once streaming; pushers and
            // role-less connections must keep the wire busy
            let byte = if self.role == SessionRole::Player {
                self.next_byte().await?
            } else {
                tokio::time::timeout(self.config.timeout, self.next_byte())
                    .await
                    .map_err(|_| Error::Timeout)??
            };
            let Some(first) = byte else {
                return Ok(());
            };

            if first == INTERLEAVED_MAGIC {
                let (channel, payload) = read_interleaved(&mut self.reader).await?;
                match self.channels.kind_for(channel) {
                    Some(kind) => {
                        if self.role == SessionRole::Pusher {
                            if let Some(pusher) = &self.pusher {
                                pusher.ingest(&self.id, RtpFrame::new(kind, payload));
                            }
                        }
                    }
                    None => {
                        tracing::trace!(session = %self.id, channel = channel, "Frame on unbound channel")
                    }
                }
            } else {
                let req = Request::read_after(&mut self.reader, first).await?;
                self.handle_request(req).await?;
            }
        }
    }

    /// Wait for the next wire byte, or `None` if the session is stopped.
    async fn next_byte(&mut self) -> Result<Option<u8>> {
        let stop = self.stop.clone();
        tokio::select! {
            b = self.reader.read_u8() => Ok(Some(b?)),
            _ = stop.stopped() => Ok(None),
        }
    }

    async fn handle_request(&mut self, req: Request) -> Result<()> {
        tracing::debug!(session = %self.id, method = %req.method, url = %req.url, "Request");

        let mut res = Response::new(StatusCode::OK);
        res.header.echo("CSeq", &req.header);
        res.header.set("Session", self.id.clone());

        if self.check_auth(&req, &mut res) {
            if let Err(e) = self.dispatch(&req, &mut res).await {
                tracing::debug!(session = %self.id, method = %req.method, error = %e, "Request failed");
                res.status = status_for(&e);
                if res.status == StatusCode::UNAUTHORIZED {
                    auth::set_challenge(&mut res.header, &self.config.realm);
                }
                res.body = Bytes::new();
            }
        }

        tracing::debug!(session = %self.id, status = %res.status, "Response");
        self.writer.write_response(&res).await?;

        if res.status == StatusCode::OK {
            self.post_response(req.method).await;
        }
        Ok(())
    }

    /// Effects that must run after the response bytes are on the wire:
    /// player enrollment on PLAY, session stop on TEARDOWN.
    async fn post_response(&mut self, method: Method) {
        match method {
            Method::Play => {
                if self.role == SessionRole::Player {
                    if let (Some(pusher), Some(player)) = (&self.pusher, &self.player) {
                        if pusher.has_player(player.id()).await {
                            player.set_paused(false);
                        } else {
                            pusher.add_player(player.clone()).await;
                        }
                    }
                }
            }
            Method::Teardown => {
                self.stop.stop();
            }
            _ => {}
        }
    }

    fn check_auth(&self, req: &Request, res: &mut Response) -> bool {
        if !self.config.authorization || req.method == Method::Options {
            return true;
        }

        let creds = Credentials::new(&self.config.username, &self.config.password);
        let verified = match req.header.get("Authorization") {
            Some(value) => match auth::verify(&creds, req.method, value) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(session = %self.id, error = %e, "Authorization rejected");
                    false
                }
            },
            None => false,
        };

        if !verified {
            res.status = StatusCode::UNAUTHORIZED;
            auth::set_challenge(&mut res.header, &self.config.realm);
        }
        verified
    }

    async fn dispatch(&mut self, req: &Request, res: &mut Response) -> Result<()> {
        match req.method {
            Method::Options => {
                let public: Vec<&str> = Method::ALL.iter().map(|m| m.as_str()).collect();
                res.header.set("Public", public.join(", "));
                Ok(())
            }
            Method::Announce => self.handle_announce(req).await,
            Method::Describe => self.handle_describe(req, res).await,
            Method::Setup => self.handle_setup(req, res),
            Method::Play => {
                if self.role != SessionRole::Player || self.pusher.is_none() {
                    return Err(Error::State("PLAY without DESCRIBE".into()));
                }
                res.header.echo("Range", &req.header);
                Ok(())
            }
            Method::Record => {
                if self.role != SessionRole::Pusher || self.pusher.is_none() {
                    return Err(Error::State("RECORD without ANNOUNCE".into()));
                }
                Ok(())
            }
            Method::Pause => match &self.player {
                Some(player) => {
                    player.set_paused(true);
                    Ok(())
                }
                None => Err(Error::State("PAUSE without an active player".into())),
            },
            Method::Teardown | Method::GetParameter | Method::SetParameter => Ok(()),
        }
    }

    async fn handle_announce(&mut self, req: &Request) -> Result<()> {
        self.role = SessionRole::Pusher;
        self.url = Some(req.url.clone());
        let path = req.url.path().to_string();

        let sdp_raw = String::from_utf8_lossy(&req.body);
        let media = PusherMedia::from_sdp(&sdp_raw);
        self.audio_control = media.audio_control.clone();
        self.video_control = media.video_control.clone();
        tracing::info!(
            session = %self.id,
            path = %path,
            video_codec = %media.video_codec,
            audio_codec = %media.audio_codec,
            "Stream announced"
        );

        let source = PusherSource {
            id: self.id.clone(),
            kind: SourceKind::Session,
            stop: self.stop.clone(),
        };

        if self.config.close_old {
            match self
                .registry
                .try_attach(&path, source.clone(), media.clone())
                .await
            {
                AttachOutcome::Attached(pusher) => {
                    self.pusher = Some(pusher);
                    return Ok(());
                }
                AttachOutcome::Rejected => {
                    return Err(Error::Conflict(path));
                }
                AttachOutcome::CreateNew => {}
            }
        }

        let pusher = Pusher::from_session(
            &path,
            source,
            media,
            self.config.gop_cache_enabled,
            self.config.gop_cache_max_size,
        );
        self.registry.add_pusher(pusher.clone()).await?;
        self.pusher = Some(pusher);
        Ok(())
    }

    async fn handle_describe(&mut self, req: &Request, res: &mut Response) -> Result<()> {
        self.role = SessionRole::Player;
        self.url = Some(req.url.clone());
        let path = req.url.path().to_string();

        let pusher = self
            .registry
            .get_pusher(&path)
            .await
            .ok_or(Error::NotFound(path.clone()))?;

        self.audio_control = pusher.audio_control();
        self.video_control = pusher.video_control();

        let player = Player::new(
            self.id.clone(),
            &path,
            self.writer.clone(),
            self.channels.clone(),
            self.stop.clone(),
            self.config.queue_limit,
            self.config.drop_when_paused,
        );
        self.player = Some(player);

        res.body = Bytes::from(pusher.sdp_raw());
        self.pusher = Some(pusher);
        Ok(())
    }

    fn handle_setup(&mut self, req: &Request, res: &mut Response) -> Result<()> {
        let transport_value = req
            .header
            .get("Transport")
            .ok_or_else(|| Error::State("SETUP without Transport header".into()))?;

        if self.pusher.is_none() {
            return Err(Error::State("SETUP before ANNOUNCE or DESCRIBE".into()));
        }

        let transport = Transport::parse(transport_value)?;
        let setup_path = normalize_url(req.url.clone()).to_string();
        let audio_path = resolve_control(&self.audio_control)?;
        let video_path = resolve_control(&self.video_control)?;

        if control_matches(&setup_path, &audio_path) {
            self.channels
                .bind_audio(transport.rtp_channel, transport.rtcp_channel);
        } else if control_matches(&setup_path, &video_path) {
            self.channels
                .bind_video(transport.rtp_channel, transport.rtcp_channel);
        } else {
            return Err(Error::State(format!(
                "SETUP got unknown control '{}'",
                setup_path
            )));
        }

        res.header.echo("Transport", &req.header);
        Ok(())
    }

    /// Ordered teardown: signal stop, detach the player, retire a
    /// session-owned pusher, close the socket. Safe to reach at most
    /// once from `run`; the stop token makes external stops idempotent.
    async fn teardown(&mut self) {
        self.stop.stop();

        if let Some(player) = self.player.take() {
            player.stop();
            if let Some(pusher) = &self.pusher {
                pusher.remove_player(player.id()).await;
            }
        }

        if self.role == SessionRole::Pusher {
            if let Some(pusher) = self.pusher.take() {
                // after a rebind this session no longer owns the pusher
                if pusher.source_id() == self.id {
                    pusher.stop();
                    pusher.clear_players().await;
                    self.registry.remove_pusher(&pusher).await;
                }
            }
        }

        self.writer.close().await;
        tracing::info!(
            session = %self.id,
            path = self.url.as_ref().map(|u| u.path()).unwrap_or(""),
            "Session closed"
        );
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::NOT_ACCEPTABLE,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// RTSP URLs with no explicit port are normalized to :554 before control
/// matching, so `rtsp://host/...` and `rtsp://host:554/...` compare equal.
fn normalize_url(mut url: Url) -> Url {
    if url.port().is_none() {
        let _ = url.set_port(Some(554));
    }
    url
}

/// A control attribute is either an absolute `rtsp://` URL (used as-is,
/// port-normalized) or a bare track identifier.
fn resolve_control(control: &str) -> Result<String> {
    if control.to_ascii_lowercase().starts_with("rtsp://") {
        let url = Url::parse(control)
            .map_err(|e| Error::State(format!("invalid control URL '{}': {}", control, e)))?;
        Ok(normalize_url(url).to_string())
    } else {
        Ok(control.to_string())
    }
}

/// The SETUP URL matches a control by equality or suffix.
fn control_matches(setup_path: &str, control: &str) -> bool {
    !control.is_empty() && (setup_path == control || setup_path.ends_with(control))
}

//! Client connection actor
//!
//! All verbs funnel through one command channel into a single connection
//! task that performs one request/response cycle at a time; concurrent
//! requests on an RTSP connection would corrupt CSeq ordering. After
//! PLAY the task switches into stream mode: it demultiplexes interleaved
//! frames to the frame sink and keeps the connection alive with a 30 s
//! OPTIONS whose response is deliberately left for the stream demux to
//! consume (`skip_response`).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::auth::Sender;
use crate::error::{Error, Result};
use crate::protocol::interleaved::{read_interleaved, INTERLEAVED_MAGIC};
use crate::protocol::{ChannelMap, Method, Request, Response, RtpFrame, StatusCode, Transport};
use crate::shutdown::StopToken;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const STREAM_BUFFER_SIZE: usize = 200 * 1024;

/// One RTSP verb, delivered to the connection task.
#[derive(Debug)]
pub(crate) enum Verb {
    Options { skip_response: bool },
    Describe,
    Setup { url: Url, transport: Transport },
    Play,
    Close,
}

pub(crate) struct VerbRequest {
    verb: Verb,
    reply: oneshot::Sender<Result<Option<Response>>>,
}

/// Handle to a client connection task.
pub struct ClientConn {
    cmd_tx: mpsc::Sender<VerbRequest>,
    stop: Arc<StopToken>,
}

impl ClientConn {
    /// Dial the server behind `url` and spawn the connection task.
    /// Demultiplexed RTP frames are delivered on `frame_tx`.
    pub async fn connect(
        agent: &str,
        debug: bool,
        dial_timeout: Duration,
        url: Url,
        frame_tx: mpsc::UnboundedSender<RtpFrame>,
    ) -> Result<ClientConn> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("no host in '{}'", url)))?;
        let addr = format!("{}:{}", host, url.port().unwrap_or(554));

        let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)??;
        let _ = stream.set_nodelay(true);

        let stop = StopToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let task = ConnTask {
            stream: BufStream::with_capacity(STREAM_BUFFER_SIZE, STREAM_BUFFER_SIZE, stream),
            url,
            agent: agent.to_string(),
            debug,
            cseq: 0,
            state: ClientState::Init,
            session: None,
            sender: None,
            channels: ChannelMap::client_default(),
            frame_tx,
            stop: stop.clone(),
            cmd_rx,
        };
        tokio::spawn(task.run());

        Ok(ClientConn { cmd_tx, stop })
    }

    pub async fn options(&self, skip_response: bool) -> Result<Option<Response>> {
        self.request(Verb::Options { skip_response }).await
    }

    pub async fn describe(&self) -> Result<Response> {
        self.expect_response(Verb::Describe).await
    }

    pub async fn setup(&self, url: Url, transport: Transport) -> Result<Response> {
        self.expect_response(Verb::Setup { url, transport }).await
    }

    pub async fn play(&self) -> Result<Response> {
        self.expect_response(Verb::Play).await
    }

    pub async fn close(&self) {
        let _ = self.request(Verb::Close).await;
        self.stop.stop();
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_token(&self) -> Arc<StopToken> {
        self.stop.clone()
    }

    async fn expect_response(&self, verb: Verb) -> Result<Response> {
        self.request(verb)
            .await?
            .ok_or(Error::ConnectionClosed)
    }

    async fn request(&self, verb: Verb) -> Result<Option<Response>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(VerbRequest { verb, reply })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

enum StreamEvent {
    Byte(u8),
    Keepalive,
    Verb(Option<VerbRequest>),
    Stopped,
}

/// Where the connection is in the OPTIONS→DESCRIBE→SETUP×N→PLAY
/// sequence. PLAY is final: once playing, the task leaves the verb loop
/// for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Init,
    Described,
    Setup,
}

struct ConnTask {
    stream: BufStream<TcpStream>,
    url: Url,
    agent: String,
    debug: bool,

    cseq: u32,
    state: ClientState,
    session: Option<String>,
    sender: Option<Sender>,

    channels: ChannelMap,
    frame_tx: mpsc::UnboundedSender<RtpFrame>,
    stop: Arc<StopToken>,
    cmd_rx: mpsc::Receiver<VerbRequest>,
}

impl ConnTask {
    async fn run(mut self) {
        let playing = self.verb_loop().await;
        if playing {
            if let Err(e) = self.stream_loop().await {
                tracing::debug!(url = %self.url, error = %e, "Stream mode ended");
            }
        }
        let _ = self.stream.shutdown().await;
        self.stop.stop();
        tracing::debug!(url = %self.url, "Client connection closed");
    }

    /// Serve verbs one at a time. Returns true once PLAY succeeded and
    /// the task should switch to stream mode.
    async fn verb_loop(&mut self) -> bool {
        loop {
            let request = {
                let stop = self.stop.clone();
                tokio::select! {
                    request = self.cmd_rx.recv() => request,
                    _ = stop.stopped() => return false,
                }
            };
            let Some(VerbRequest { verb, reply }) = request else {
                return false;
            };

            match verb {
                Verb::Close => {
                    let _ = reply.send(Ok(None));
                    return false;
                }
                verb => {
                    let is_play = matches!(verb, Verb::Play);
                    let result = self.perform(verb).await;
                    let succeeded =
                        matches!(&result, Ok(Some(res)) if res.status == StatusCode::OK);
                    let _ = reply.send(result);
                    if is_play && succeeded {
                        return true;
                    }
                }
            }
        }
    }

    async fn perform(&mut self, verb: Verb) -> Result<Option<Response>> {
        match verb {
            Verb::Options { skip_response } => {
                let req = self.options_request();
                self.do_request(req, skip_response).await
            }
            Verb::Describe => {
                if self.state == ClientState::Setup {
                    return Err(Error::State("DESCRIBE after SETUP".into()));
                }
                let mut req = Request::new(Method::Describe, self.url.clone());
                req.header.set("Accept", "application/sdp");
                let res = self.do_request(req, false).await?;
                if matches!(&res, Some(r) if r.status == StatusCode::OK) {
                    self.state = ClientState::Described;
                }
                Ok(res)
            }
            Verb::Setup { url, transport } => {
                if self.state == ClientState::Init {
                    return Err(Error::State("SETUP before DESCRIBE".into()));
                }
                let mut req = Request::new(Method::Setup, url);
                req.header.set("Transport", transport.to_string());
                let res = self.do_request(req, false).await?;
                if matches!(&res, Some(r) if r.status == StatusCode::OK) {
                    self.state = ClientState::Setup;
                }
                Ok(res)
            }
            Verb::Play => {
                if self.state != ClientState::Setup {
                    return Err(Error::State("PLAY before SETUP".into()));
                }
                let req = Request::new(Method::Play, self.url.clone());
                self.do_request(req, false).await
            }
            Verb::Close => Ok(None),
        }
    }

    fn options_request(&self) -> Request {
        let mut req = Request::new(Method::Options, self.url.clone());
        req.header.set("Require", "implicit-play");
        req
    }

    /// One request/response cycle: decorate, send, read, learn the
    /// session, and on the first 401 retry once with credentials parsed
    /// from the URL userinfo.
    async fn do_request(&mut self, req: Request, skip_response: bool) -> Result<Option<Response>> {
        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut decorated = req.clone();
            decorated.header.set("User-Agent", self.agent.clone());
            if let Some(session) = &self.session {
                decorated.header.set("Session", session.clone());
            }
            if let Some(sender) = &self.sender {
                sender.apply(&mut decorated);
            }
            self.cseq += 1;
            decorated.header.set("CSeq", self.cseq.to_string());

            if self.debug {
                tracing::debug!(request = %decorated, "client [c->s]");
            }
            decorated.write(&mut self.stream).await?;

            if skip_response {
                return Ok(None);
            }

            let res = Response::read(&mut self.stream).await?;
            if self.debug {
                tracing::debug!(response = %res, "client [s->c]");
            }

            // sticky Session, learned from the first response carrying one
            if let Some(value) = res.header.get("Session") {
                let id = value.split(';').next().unwrap_or(value).trim();
                self.session = Some(id.to_string());
            }

            if res.status == StatusCode::UNAUTHORIZED && self.sender.is_none() && attempts == 1 {
                let username = req.url.username().to_string();
                if !username.is_empty() {
                    let password = req.url.password().unwrap_or_default().to_string();
                    self.sender = Some(Sender::new(
                        res.header.get_all("WWW-Authenticate"),
                        &username,
                        &password,
                    )?);
                    continue;
                }
            }

            return Ok(Some(res));
        }
    }

    /// Stream mode: demultiplex interleaved frames, discard in-band RTSP
    /// messages, keep the connection alive.
    async fn stream_loop(&mut self) -> Result<()> {
        tracing::debug!(url = %self.url, "Client entering stream mode");

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // the first tick completes immediately

        loop {
            let event = {
                let stop = self.stop.clone();
                tokio::select! {
                    b = self.stream.read_u8() => StreamEvent::Byte(b?),
                    _ = keepalive.tick() => StreamEvent::Keepalive,
                    request = self.cmd_rx.recv() => StreamEvent::Verb(request),
                    _ = stop.stopped() => StreamEvent::Stopped,
                }
            };

            match event {
                StreamEvent::Stopped => return Ok(()),
                StreamEvent::Byte(INTERLEAVED_MAGIC) => {
                    let (channel, payload) = read_interleaved(&mut self.stream).await?;
                    match self.channels.kind_for(channel) {
                        Some(kind) => {
                            let _ = self.frame_tx.send(RtpFrame::new(kind, payload));
                        }
                        None => {
                            tracing::trace!(channel = channel, "Frame on unknown channel")
                        }
                    }
                }
                StreamEvent::Byte(first) => {
                    // an in-band RTSP message, typically the response to a
                    // skip_response keepalive
                    let res = Response::read_after(&mut self.stream, first).await?;
                    if self.debug {
                        tracing::debug!(response = %res, "client [s->c] in stream mode");
                    }
                }
                StreamEvent::Keepalive => {
                    let req = self.options_request();
                    self.do_request(req, true).await?;
                }
                StreamEvent::Verb(None) => return Ok(()),
                StreamEvent::Verb(Some(VerbRequest { verb, reply })) => match verb {
                    Verb::Close => {
                        let _ = reply.send(Ok(None));
                        return Ok(());
                    }
                    Verb::Options { skip_response: true } => {
                        let req = self.options_request();
                        let result = self.do_request(req, true).await;
                        let _ = reply.send(result);
                    }
                    other => {
                        let _ = reply.send(Err(Error::State(format!(
                            "{:?} is not valid while streaming",
                            other
                        ))));
                    }
                },
            }
        }
    }
}

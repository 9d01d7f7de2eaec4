//! Player: one subscriber's bounded queue and pacing task
//!
//! Each subscriber gets its own queue so a slow consumer only ever drops
//! its own frames. The sender task drains the queue onto the subscriber's
//! TCP connection as interleaved frames, using whatever channel numbers
//! that session negotiated at SETUP.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::protocol::{ChannelMap, RtpFrame};
use crate::server::session::SessionWriter;
use crate::shutdown::StopToken;

/// One subscriber of a pusher.
pub struct Player {
    id: String,
    pusher_path: String,
    writer: Arc<SessionWriter>,
    channels: Arc<ChannelMap>,
    stop: Arc<StopToken>,

    queue: Mutex<VecDeque<RtpFrame>>,
    notify: Notify,
    /// 0 = unbounded; otherwise the oldest frame is dropped on overflow.
    queue_limit: usize,
    paused: AtomicBool,
    drop_when_paused: bool,
}

impl Player {
    pub fn new(
        id: impl Into<String>,
        pusher_path: impl Into<String>,
        writer: Arc<SessionWriter>,
        channels: Arc<ChannelMap>,
        stop: Arc<StopToken>,
        queue_limit: usize,
        drop_when_paused: bool,
    ) -> Arc<Player> {
        Arc::new(Player {
            id: id.into(),
            pusher_path: pusher_path.into(),
            writer,
            channels,
            stop,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_limit,
            paused: AtomicBool::new(false),
            drop_when_paused,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pusher_path(&self) -> &str {
        &self.pusher_path
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause or resume delivery. With `drop_when_paused`, pausing also
    /// discards everything already queued.
    pub fn set_paused(&self, paused: bool) {
        if paused && self.drop_when_paused {
            self.queue.lock().unwrap().clear();
        }
        self.paused.store(paused, Ordering::Release);
        tracing::debug!(
            player = %self.id,
            pusher = %self.pusher_path,
            paused = paused,
            "Player pause state changed"
        );
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Enqueue a frame for delivery. Drops from the head when the queue
    /// limit is exceeded, and drops outright while paused if configured.
    pub fn queue_frame(&self, frame: RtpFrame) {
        if self.stop.is_stopped() {
            return;
        }
        if self.is_paused() && self.drop_when_paused {
            return;
        }

        {
            let mut queue = self.queue.lock().unwrap();
            queue.push_back(frame);
            if self.queue_limit > 0 && queue.len() > self.queue_limit {
                queue.pop_front();
            }
        }
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Sender task: pop, pace, write interleaved.
    pub async fn run(self: Arc<Self>) {
        tracing::debug!(player = %self.id, pusher = %self.pusher_path, "Player sender started");

        loop {
            let frame = loop {
                if self.stop.is_stopped() {
                    tracing::debug!(player = %self.id, "Player sender stopped");
                    return;
                }
                if let Some(frame) = self.queue.lock().unwrap().pop_front() {
                    break frame;
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = self.stop.stopped() => {}
                }
            };

            // paused frames are consumed and discarded
            if self.is_paused() {
                continue;
            }

            let Some(channel) = self.channels.channel_for(frame.kind) else {
                tracing::trace!(player = %self.id, kind = %frame.kind, "No channel bound, dropping frame");
                continue;
            };

            if let Err(e) = self.writer.write_frame(channel, &frame.payload).await {
                tracing::debug!(player = %self.id, error = %e, "Player send failed");
                return;
            }
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("pusher_path", &self.pusher_path)
            .field("queue_limit", &self.queue_limit)
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameKind;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    fn test_player(
        writer: Arc<SessionWriter>,
        queue_limit: usize,
        drop_when_paused: bool,
    ) -> Arc<Player> {
        let channels = Arc::new(ChannelMap::new());
        channels.bind_video(0, 1);
        channels.bind_audio(2, 3);
        Player::new(
            "p1",
            "/live/test",
            writer,
            channels,
            StopToken::new(),
            queue_limit,
            drop_when_paused,
        )
    }

    fn frame(kind: FrameKind, payload: &'static [u8]) -> RtpFrame {
        RtpFrame::new(kind, Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_frames_leave_in_enqueue_order() {
        let (client, server) = tokio::io::duplex(4096);
        let writer = Arc::new(SessionWriter::new(server));
        let player = test_player(writer, 0, false);

        player.queue_frame(frame(FrameKind::Video, b"ABCDE"));
        player.queue_frame(frame(FrameKind::Audio, b"XYZ"));
        tokio::spawn(player.clone().run());

        let mut reader = client;
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(head, [0x24, 0x00, 0x00, 0x05]);
        let mut payload = [0u8; 5];
        reader.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"ABCDE");

        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(head, [0x24, 0x02, 0x00, 0x03]);
        let mut payload = [0u8; 3];
        reader.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"XYZ");

        player.stop();
    }

    #[tokio::test]
    async fn test_queue_limit_drops_oldest() {
        let (_client, server) = tokio::io::duplex(64);
        let writer = Arc::new(SessionWriter::new(server));
        let player = test_player(writer, 2, false);

        player.queue_frame(frame(FrameKind::Video, b"1"));
        player.queue_frame(frame(FrameKind::Video, b"2"));
        player.queue_frame(frame(FrameKind::Video, b"3"));
        assert_eq!(player.queue_len(), 2);

        let queued: Vec<_> = player
            .queue
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.payload.clone())
            .collect();
        assert_eq!(queued, vec![Bytes::from_static(b"2"), Bytes::from_static(b"3")]);
    }

    #[tokio::test]
    async fn test_drop_when_paused() {
        let (_client, server) = tokio::io::duplex(64);
        let writer = Arc::new(SessionWriter::new(server));
        let player = test_player(writer, 0, true);

        player.queue_frame(frame(FrameKind::Video, b"1"));
        assert_eq!(player.queue_len(), 1);

        // pausing clears the queue, and enqueues are discarded while paused
        player.set_paused(true);
        assert_eq!(player.queue_len(), 0);
        player.queue_frame(frame(FrameKind::Video, b"2"));
        assert_eq!(player.queue_len(), 0);

        player.set_paused(false);
        player.queue_frame(frame(FrameKind::Video, b"3"));
        assert_eq!(player.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_player_discards_frames() {
        let (_client, server) = tokio::io::duplex(64);
        let writer = Arc::new(SessionWriter::new(server));
        let player = test_player(writer, 0, false);

        player.stop();
        player.queue_frame(frame(FrameKind::Video, b"1"));
        assert_eq!(player.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_run_exits_on_stop() {
        let (_client, server) = tokio::io::duplex(64);
        let writer = Arc::new(SessionWriter::new(server));
        let player = test_player(writer, 0, false);

        let task = tokio::spawn(player.clone().run());
        player.stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("player task should exit after stop")
            .unwrap();
    }
}

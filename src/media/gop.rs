//! GOP cache for late-joiner support
//!
//! A subscriber that joins a running stream needs a keyframe before any
//! delta frame it receives can be decoded. The cache holds every media
//! frame since the most recent keyframe; replaying it to a new subscriber
//! lets playback start immediately instead of stalling until the next
//! GOP boundary.

use crate::protocol::RtpFrame;

const DEFAULT_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Keyframe-prefixed frame cache with a byte budget.
///
/// Frames are only collected once a keyframe has opened a GOP, so the
/// cache is always a complete keyframe-prefixed sequence (or empty). An
/// oversized GOP is dropped whole: trimming from the head would leave a
/// sequence that no longer starts at a keyframe.
#[derive(Debug)]
pub struct GopCache {
    max_size: usize,
    current_size: usize,
    frames: Vec<RtpFrame>,
    started: bool,
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GopCache {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            frames: Vec::new(),
            started: false,
        }
    }

    /// Drop all cached frames and start a new GOP at the next push.
    pub fn start_gop(&mut self) {
        self.frames.clear();
        self.current_size = 0;
        self.started = true;
    }

    /// Drop all cached frames; nothing is collected until the next
    /// keyframe.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.current_size = 0;
        self.started = false;
    }

    /// Append a frame to the open GOP. Frames arriving before the first
    /// keyframe are ignored.
    pub fn push(&mut self, frame: RtpFrame) {
        if !self.started {
            return;
        }

        let size = frame.payload.len();
        if self.current_size + size > self.max_size {
            self.clear();
            return;
        }

        self.frames.push(frame);
        self.current_size += size;
    }

    /// Clone the cached sequence for replay to a new subscriber.
    /// Cheap: frame payloads are reference-counted.
    pub fn snapshot(&self) -> Vec<RtpFrame> {
        self.frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

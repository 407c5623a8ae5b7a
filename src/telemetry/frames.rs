// Latest-wins frame slot
//
// The producer overwrites a single slot; subscribers only ever see the most
// recent frame at the time they look. Nothing is queued, so a slow viewer
// skips frames instead of building a backlog. Delivery is gated on the
// rendering flag.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// One rendered game frame (encoded image bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub payload: Arc<[u8]>,
}

/// Counters exposed on the metrics endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub published: u64,
    /// Frames produced while rendering was off
    pub gated: u64,
    pub subscribers: usize,
}

/// Single-slot frame distribution
pub struct FrameSlot {
    latest: watch::Sender<Option<Frame>>,
    rendering: watch::Sender<bool>,
    next_sequence: AtomicU64,
    gated: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        let (rendering, _) = watch::channel(false);
        Self {
            latest,
            rendering,
            next_sequence: AtomicU64::new(1),
            gated: AtomicU64::new(0),
        }
    }

    /// Replace the slot's frame; returns its sequence, or `None` when
    /// rendering is off and the frame was discarded
    pub fn publish(&self, payload: impl Into<Arc<[u8]>>) -> Option<u64> {
        let payload = payload.into();
        let mut published = None;

        // The gate is read under the slot lock so it cannot flip to off
        // between the check and the write
        self.latest.send_if_modified(|slot| {
            if !*self.rendering.borrow() {
                return false;
            }
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            *slot = Some(Frame { sequence, payload });
            published = Some(sequence);
            true
        });

        if published.is_none() {
            self.gated.fetch_add(1, Ordering::Relaxed);
        }
        published
    }

    /// Gate delivery; turning rendering off also empties the slot
    pub fn set_rendering(&self, rendering: bool) {
        let mut was = rendering;
        self.latest.send_if_modified(|slot| {
            was = self.rendering.send_replace(rendering);
            !rendering && slot.take().is_some()
        });
        if was != rendering {
            tracing::debug!(rendering, "Frame delivery gate changed");
        }
    }

    pub fn is_rendering(&self) -> bool {
        *self.rendering.borrow()
    }

    /// Most recent frame, if rendering
    pub fn latest(&self) -> Option<Frame> {
        self.latest.borrow().clone()
    }

    pub fn clear(&self) {
        self.latest.send_replace(None);
    }

    /// Open a subscription that yields the latest frame whenever it changes
    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            frames: self.latest.subscribe(),
            rendering: self.rendering.subscribe(),
            last_seen: 0,
        }
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            published: self.next_sequence.load(Ordering::Relaxed) - 1,
            gated: self.gated.load(Ordering::Relaxed),
            subscribers: self.latest.receiver_count(),
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// A viewer's handle on the frame slot; dropping it unsubscribes
pub struct FrameSubscription {
    frames: watch::Receiver<Option<Frame>>,
    rendering: watch::Receiver<bool>,
    last_seen: u64,
}

impl FrameSubscription {
    /// Wait for a frame newer than the last one delivered.
    ///
    /// While rendering is off this waits without yielding anything. Returns
    /// `None` once the slot itself is gone.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            if !*self.rendering.borrow_and_update() {
                self.rendering.changed().await.ok()?;
                continue;
            }

            let latest = self.frames.borrow_and_update().clone();
            if let Some(frame) = latest {
                if frame.sequence > self.last_seen {
                    self.last_seen = frame.sequence;
                    return Some(frame);
                }
            }

            tokio::select! {
                changed = self.frames.changed() => changed.ok()?,
                changed = self.rendering.changed() => changed.ok()?,
            }
        }
    }

    /// Sequence of the last delivered frame (0 before the first)
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

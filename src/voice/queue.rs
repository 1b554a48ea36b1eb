//! Sequential audio chunk queue

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::Player;

/// One base64 audio chunk as received from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub payload: String,
    pub sample_rate: u32,
}

impl AudioChunk {
    #[must_use]
    pub fn new(payload: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            payload: payload.into(),
            sample_rate,
        }
    }
}

struct Inner {
    player: Player,
    pending: Mutex<VecDeque<AudioChunk>>,
    running: watch::Sender<bool>,
}

/// FIFO of chunks drained one at a time through a [`Player`]
///
/// The drain loop awaits each chunk's completion before taking the next, so
/// chunks never overlap. A chunk that fails is logged and skipped.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("pending", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl PlaybackQueue {
    #[must_use]
    pub fn new(player: Player) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                player,
                pending: Mutex::new(VecDeque::new()),
                running,
            }),
        }
    }

    #[must_use]
    pub fn player(&self) -> &Player {
        &self.inner.player
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<AudioChunk>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk, starting the drain loop if it is not running
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, chunk: AudioChunk) {
        let mut pending = self.pending();
        pending.push_back(chunk);
        tracing::debug!(pending = pending.len(), "audio chunk queued");
        self.ensure_draining(&pending);
    }

    /// Restart the drain loop for chunks left behind, if any
    pub fn resume(&self) {
        let pending = self.pending();
        self.ensure_draining(&pending);
    }

    /// Drop every chunk not yet started
    ///
    /// The chunk currently playing is left alone; see [`Self::stop`].
    pub fn clear(&self) {
        let mut pending = self.pending();
        if !pending.is_empty() {
            tracing::debug!(dropped = pending.len(), "audio queue cleared");
        }
        pending.clear();
    }

    /// Clear pending chunks and stop the one playing
    pub fn stop(&self) {
        self.clear();
        self.inner.player.stop();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Whether the drain loop is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Watch the drain loop's running flag
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.running.subscribe()
    }

    /// Wait until the drain loop has nothing left to play
    pub async fn drained(&self) {
        let mut running = self.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    // Called with the pending lock held so the loop cannot exit between the
    // caller's push and this check
    fn ensure_draining(&self, pending: &VecDeque<AudioChunk>) {
        if pending.is_empty() {
            return;
        }

        let started = self.inner.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });

        if started {
            tracing::trace!("drain loop started");
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    async fn drain(self) {
        loop {
            let chunk = {
                let mut pending = self.pending();
                let Some(chunk) = pending.pop_front() else {
                    self.inner.running.send_replace(false);
                    tracing::trace!("drain loop idle");
                    return;
                };
                chunk
            };

            match self.inner.player.play(&chunk.payload, chunk.sample_rate).await {
                Ok(outcome) => tracing::trace!(?outcome, "queued chunk settled"),
                Err(e) => tracing::warn!(error = %e, "audio chunk failed, continuing with next"),
            }
        }
    }
}

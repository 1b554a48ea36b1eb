//! Single-flight playback engine
//!
//! A [`Player`] owns at most one live [`Voice`]. Starting a new chunk
//! terminates the previous one, whose [`Completion`] then resolves with
//! [`PlaybackOutcome::Superseded`]. Observers are notified after every change
//! to the `{is_playing, is_paused}` pair.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::output::{AudioOutput, Voice};
use super::AudioClip;
use crate::Result;

/// Snapshot of the engine's observable state
///
/// `is_paused` implies `is_playing`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
}

impl PlaybackState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        !self.is_playing
    }
}

/// How a started chunk was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Played to the end
    Finished,
    /// Cut short by [`Player::stop`]
    Stopped,
    /// Replaced by a later [`Player::start`]
    Superseded,
}

/// Callback invoked with the new state after each transition
pub type StateObserver = Box<dyn Fn(PlaybackState) + Send + Sync>;

/// Hook for mirroring state into OS transport controls
pub type RefreshHook = Box<dyn Fn(PlaybackState) + Send + Sync>;

type Callback = Arc<dyn Fn(PlaybackState) + Send + Sync>;
type Settle = oneshot::Sender<Result<PlaybackOutcome>>;

/// Resolves when a started chunk settles
///
/// Dropping it does not stop playback.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    rx: oneshot::Receiver<Result<PlaybackOutcome>>,
}

impl Future for Completion {
    type Output = Result<PlaybackOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Engine dropped with the chunk still active
            Poll::Ready(Err(_)) => Poll::Ready(Ok(PlaybackOutcome::Stopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Active {
    id: u64,
    voice: Box<dyn Voice>,
    settle: Settle,
}

/// A started chunk whose output is still being opened
struct Opening {
    id: u64,
    settle: Settle,
}

struct EngineState {
    active: Option<Active>,
    opening: Option<Opening>,
    paused: bool,
    next_id: u64,
    volume: f32,
    observer: Option<Callback>,
    refresh: Option<Callback>,
}

impl EngineState {
    const fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            is_playing: self.active.is_some(),
            is_paused: self.active.is_some() && self.paused,
        }
    }

    fn settle_active(&mut self, outcome: PlaybackOutcome) {
        if let Some(mut prior) = self.active.take() {
            prior.voice.halt();
            let _ = prior.settle.send(Ok(outcome));
            tracing::debug!(id = prior.id, ?outcome, "settled active chunk");
        }
        if let Some(opening) = self.opening.take() {
            let _ = opening.settle.send(Ok(outcome));
            tracing::debug!(id = opening.id, ?outcome, "settled chunk before it opened");
        }
        self.paused = false;
    }
}

struct Shared {
    output: Arc<dyn AudioOutput>,
    state: Mutex<EngineState>,
}

/// Playback engine handle
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct Player {
    shared: Arc<Shared>,
}

/// Non-owning engine handle
#[derive(Clone)]
pub struct WeakPlayer {
    shared: Weak<Shared>,
}

impl WeakPlayer {
    #[must_use]
    pub fn upgrade(&self) -> Option<Player> {
        self.shared.upgrade().map(|shared| Player { shared })
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for WeakPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakPlayer").finish_non_exhaustive()
    }
}

impl Player {
    /// Create an engine playing through `output` at `volume` (0.0 to 1.0)
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>, volume: f32) -> Self {
        Self {
            shared: Arc::new(Shared {
                output,
                state: Mutex::new(EngineState {
                    active: None,
                    opening: None,
                    paused: false,
                    next_id: 0,
                    volume: volume.clamp(0.0, 1.0),
                    observer: None,
                    refresh: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state().is_playing
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state().is_paused
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakPlayer {
        WeakPlayer {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register the state observer, replacing any previous one
    pub fn set_state_observer(&self, observer: Option<StateObserver>) {
        self.lock().observer = observer.map(Arc::from);
    }

    /// Register the transport refresh hook, replacing any previous one
    pub fn set_refresh_hook(&self, hook: Option<RefreshHook>) {
        self.lock().refresh = hook.map(Arc::from);
    }

    /// Gain applied to chunks started after this call
    pub fn set_volume(&self, volume: f32) {
        self.lock().volume = volume.clamp(0.0, 1.0);
    }

    /// Decode a base64 chunk and start playing it
    ///
    /// Any chunk already active is halted and settles as `Superseded`, even
    /// when this chunk then fails to decode.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or the output refuses it;
    /// the engine is left idle.
    pub fn start(&self, payload: &str, sample_rate: u32) -> Result<Completion> {
        self.begin(AudioClip::from_base64(payload, sample_rate))
    }

    /// Start playing an already decoded clip
    ///
    /// # Errors
    ///
    /// Returns error if the output refuses the clip
    pub fn start_clip(&self, clip: AudioClip) -> Result<Completion> {
        self.begin(Ok(clip))
    }

    /// Play a base64 chunk to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or playback fails part way
    pub async fn play(&self, payload: &str, sample_rate: u32) -> Result<PlaybackOutcome> {
        self.start(payload, sample_rate)?.await
    }

    fn begin(&self, clip: Result<AudioClip>) -> Result<Completion> {
        let (settle_tx, settle_rx) = oneshot::channel();
        let (finish_tx, finish_rx) = oneshot::channel();

        let mut state = self.lock();
        let before = state.snapshot();
        state.settle_active(PlaybackOutcome::Superseded);
        let id = state.next_id;
        state.next_id += 1;
        state.opening = Some(Opening {
            id,
            settle: settle_tx,
        });
        let volume = state.volume;
        drop(state);

        // Unlocked while the device opens
        let opened = clip.and_then(|clip| {
            let clip = clip.with_gain(volume);
            tracing::debug!(
                id,
                samples = clip.samples().len(),
                sample_rate = clip.sample_rate(),
                "starting chunk"
            );
            self.shared.output.open(clip, finish_tx)
        });

        let mut state = self.lock();
        let opening = state.opening.take_if(|opening| opening.id == id);
        let result = match (opened, opening) {
            (Ok(voice), Some(opening)) => {
                state.active = Some(Active {
                    id,
                    voice,
                    settle: opening.settle,
                });
                Ok(true)
            }
            (Ok(mut voice), None) => {
                // Stopped or superseded while opening; already settled
                tracing::debug!(id, "discarding voice opened too late");
                voice.halt();
                Ok(false)
            }
            (Err(e), _) => {
                tracing::error!(id, error = %e, "failed to start chunk");
                Err(e)
            }
        };

        let after = state.snapshot();
        let callbacks = Callbacks::take(&state);
        drop(state);
        callbacks.notify(before, after);

        if result? {
            let weak = self.downgrade();
            tokio::spawn(async move {
                // A halted voice drops its sender; only real endings arrive here
                if let Ok(result) = finish_rx.await
                    && let Some(player) = weak.upgrade()
                {
                    player.finish(id, result);
                }
            });
        }

        Ok(Completion { rx: settle_rx })
    }

    fn finish(&self, id: u64, result: Result<()>) {
        let mut state = self.lock();
        if state.active.as_ref().is_none_or(|active| active.id != id) {
            return;
        }

        let before = state.snapshot();
        if let Some(active) = state.active.take() {
            match &result {
                Ok(()) => tracing::debug!(id, "chunk finished"),
                Err(e) => tracing::warn!(id, error = %e, "chunk failed during playback"),
            }
            let _ = active.settle.send(result.map(|()| PlaybackOutcome::Finished));
        }
        state.paused = false;

        let after = state.snapshot();
        let callbacks = Callbacks::take(&state);
        drop(state);
        callbacks.notify(before, after);
    }

    /// Suspend the active chunk in place; no-op unless playing and not paused
    pub fn pause(&self) {
        let mut state = self.lock();
        let before = state.snapshot();
        if !before.is_playing || before.is_paused {
            return;
        }

        let paused = state
            .active
            .as_mut()
            .map(|active| active.voice.pause());
        match paused {
            Some(Ok(())) => state.paused = true,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to pause playback");
                return;
            }
            None => return,
        }

        let after = state.snapshot();
        let callbacks = Callbacks::take(&state);
        drop(state);
        callbacks.notify(before, after);
    }

    /// Continue a paused chunk; no-op unless paused
    ///
    /// If the output refuses to restart, the engine stays paused.
    pub fn resume(&self) {
        let mut state = self.lock();
        let before = state.snapshot();
        if !before.is_paused {
            return;
        }

        let resumed = state
            .active
            .as_mut()
            .map(|active| active.voice.resume());
        match resumed {
            Some(Ok(())) => state.paused = false,
            Some(Err(e)) => {
                tracing::error!(error = %e, "failed to resume playback");
                return;
            }
            None => return,
        }

        let after = state.snapshot();
        let callbacks = Callbacks::take(&state);
        drop(state);
        callbacks.notify(before, after);
    }

    /// Halt the active chunk and go idle
    ///
    /// The chunk's completion resolves with `Stopped`.
    pub fn stop(&self) {
        let mut state = self.lock();
        let before = state.snapshot();
        state.settle_active(PlaybackOutcome::Stopped);

        let after = state.snapshot();
        let callbacks = Callbacks::take(&state);
        drop(state);
        callbacks.notify(before, after);
    }
}

/// Callbacks cloned out of the lock so they can re-enter the engine
struct Callbacks {
    observer: Option<Callback>,
    refresh: Option<Callback>,
}

impl Callbacks {
    fn take(state: &EngineState) -> Self {
        Self {
            observer: state.observer.clone(),
            refresh: state.refresh.clone(),
        }
    }

    fn notify(self, before: PlaybackState, after: PlaybackState) {
        if before == after {
            return;
        }

        tracing::trace!(
            playing = after.is_playing,
            paused = after.is_paused,
            "playback state changed"
        );

        if let Some(observer) = self.observer {
            observer(after);
        }
        if let Some(refresh) = self.refresh {
            refresh(after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_means_not_playing() {
        assert!(PlaybackState::default().is_idle());
        assert!(
            !PlaybackState {
                is_playing: true,
                is_paused: true
            }
            .is_idle()
        );
    }
}

//! Conversation controller
//!
//! Drives one chat turn at a time: opens the stream, folds text into the
//! assistant message, routes audio into the playback queue and reconciles
//! loading and audio indicators with both lifecycles. State changes are
//! published as [`ChatEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::stream::{StreamCoordinator, StreamHandle, StreamHandlers};
use crate::voice::{AudioChunk, PlaybackQueue, PlaybackState};
use crate::{Error, Result};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a front end needs to render the conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    /// A response is streaming
    pub is_loading: bool,
    /// Response audio is queued or playing
    pub is_audio_playing: bool,
    pub is_audio_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    TurnStarted,
    Text(String),
    Audio { queued: usize },
    TurnCompleted { audio_count: u32 },
    TurnFailed(String),
    /// The stream ended without a completion or error frame
    TurnEnded,
    Cancelled,
    /// Trailing audio finished after the turn's stream ended
    AudioSettled,
    Playback(PlaybackState),
}

struct Inner {
    coordinator: StreamCoordinator,
    queue: PlaybackQueue,
    settle_delay: Duration,
    state: Mutex<ChatState>,
    active: Mutex<Option<StreamHandle>>,
    turn: AtomicU64,
    events: broadcast::Sender<ChatEvent>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> MutexGuard<'_, Option<StreamHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_current(&self, turn: u64) -> bool {
        self.turn.load(Ordering::Acquire) == turn
    }

    fn append_text(&self, text: &str) {
        if let Some(last) = self.state().messages.last_mut() {
            last.content.push_str(text);
        }
    }

    fn record_error(&self, message: &str) {
        let mut state = self.state();
        state.is_loading = false;
        if let Some(last) = state.messages.last_mut() {
            if !last.content.is_empty() {
                last.content.push_str("\n\n");
            }
            last.content.push_str("Error: ");
            last.content.push_str(message);
        }
    }
}

/// Owns conversation state and the single active chat stream
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("state", &self.state())
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

impl ChatController {
    /// Create a controller and register it as the player's state observer
    #[must_use]
    pub fn new(coordinator: StreamCoordinator, queue: PlaybackQueue, settle_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            coordinator,
            queue,
            settle_delay,
            state: Mutex::new(ChatState::default()),
            active: Mutex::new(None),
            turn: AtomicU64::new(0),
            events,
        });

        let weak = Arc::downgrade(&inner);
        inner
            .queue
            .player()
            .set_state_observer(Some(Box::new(move |playback| {
                if let Some(inner) = weak.upgrade() {
                    inner.state().is_audio_paused = playback.is_paused;
                    inner.emit(ChatEvent::Playback(playback));
                }
            })));

        Self { inner }
    }

    #[must_use]
    pub fn queue(&self) -> &PlaybackQueue {
        &self.inner.queue
    }

    #[must_use]
    pub fn state(&self) -> ChatState {
        self.inner.state().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Start a turn with `text`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyMessage`] for blank input and [`Error::Busy`]
    /// while the previous response is still streaming.
    pub fn send(&self, text: &str) -> Result<StreamHandle> {
        self.send_and_subscribe(text).map(|(handle, _)| handle)
    }

    /// Start a turn and return a receiver whose first event is its
    /// [`ChatEvent::TurnStarted`]
    ///
    /// Events published before this turn, such as an earlier
    /// [`ChatEvent::Cancelled`], are not delivered to the receiver.
    ///
    /// # Errors
    ///
    /// Same as [`ChatController::send`].
    pub fn send_and_subscribe(
        &self,
        text: &str,
    ) -> Result<(StreamHandle, broadcast::Receiver<ChatEvent>)> {
        let message = text.trim();
        if message.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let mut active = self.inner.active();
        if active.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(Error::Busy);
        }

        let turn = self.inner.turn.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut state = self.inner.state();
            state.messages.push(Message::user(message));
            state.messages.push(Message::assistant(String::new()));
            state.is_loading = true;
        }
        tracing::info!(turn, "chat turn started");
        let events = self.inner.events.subscribe();
        self.inner.emit(ChatEvent::TurnStarted);

        let handle = self.inner.coordinator.open(message, self.handlers(turn));
        *active = Some(handle.clone());
        drop(active);

        let inner = Arc::clone(&self.inner);
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.finished().await;
            if watched.is_aborted() || !inner.is_current(turn) {
                return;
            }

            let unsettled = {
                let mut state = inner.state();
                std::mem::replace(&mut state.is_loading, false)
            };
            if unsettled {
                tracing::warn!(turn, "response ended without completion");
                inner.emit(ChatEvent::TurnEnded);
                settle_audio(inner, turn);
            }
        });

        Ok((handle, events))
    }

    fn handlers(&self, turn: u64) -> StreamHandlers {
        let text_inner = Arc::clone(&self.inner);
        let audio_inner = Arc::clone(&self.inner);
        let done_inner = Arc::clone(&self.inner);
        let error_inner = Arc::clone(&self.inner);

        StreamHandlers::new()
            .on_text(move |text| {
                text_inner.append_text(&text);
                text_inner.emit(ChatEvent::Text(text));
            })
            .on_audio(move |chunk: AudioChunk| {
                audio_inner.queue.enqueue(chunk);
                audio_inner.state().is_audio_playing = true;
                audio_inner.emit(ChatEvent::Audio {
                    queued: audio_inner.queue.len(),
                });
            })
            .on_complete(move |audio_count| {
                done_inner.state().is_loading = false;
                tracing::info!(turn, audio_count, "chat turn complete");
                done_inner.emit(ChatEvent::TurnCompleted { audio_count });
                settle_audio(Arc::clone(&done_inner), turn);
            })
            .on_error(move |message| {
                tracing::warn!(turn, error = %message, "chat turn failed");
                error_inner.record_error(&message);
                error_inner.emit(ChatEvent::TurnFailed(message));
                settle_audio(Arc::clone(&error_inner), turn);
            })
    }

    /// Abort the stream, stop playback and drop queued audio
    pub fn cancel(&self) {
        if let Some(handle) = self.inner.active().take() {
            handle.abort();
        }
        self.inner.queue.stop();

        {
            let mut state = self.inner.state();
            state.is_loading = false;
            state.is_audio_playing = false;
            state.is_audio_paused = false;
        }
        tracing::info!("chat turn cancelled");
        self.inner.emit(ChatEvent::Cancelled);
    }

    pub fn pause_audio(&self) {
        self.inner.queue.player().pause();
    }

    pub fn resume_audio(&self) {
        self.inner.queue.player().resume();
    }

    /// Stop audio without touching the stream
    pub fn stop_audio(&self) {
        self.inner.queue.stop();
        let mut state = self.inner.state();
        state.is_audio_playing = false;
        state.is_audio_paused = false;
    }

    /// Wait for the current stream, if any, to end
    pub async fn wait_for_stream(&self) {
        let handle = self.inner.active().clone();
        if let Some(handle) = handle {
            handle.finished().await;
        }
    }

    /// Wait for the current stream to end and its audio to drain
    pub async fn wait_for_turn(&self) {
        self.wait_for_stream().await;
        self.inner.queue.drained().await;
    }
}

/// Clear the audio indicator once trailing audio has played out
///
/// Runs after every stream ending that leaves audio behind: completion,
/// error frame or plain end of body.
fn settle_audio(inner: Arc<Inner>, turn: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(inner.settle_delay).await;
        inner.queue.drained().await;

        if !inner.is_current(turn) {
            return;
        }

        let was_playing = std::mem::replace(&mut inner.state().is_audio_playing, false);
        if was_playing {
            tracing::debug!(turn, "response audio settled");
            inner.emit(ChatEvent::AudioSettled);
        }
    });
}

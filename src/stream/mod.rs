//! Chat stream coordinator
//!
//! Opens one cancellable POST to the chat endpoint and turns the multiplexed
//! `event:`/`data:` body into ordered handler calls for text, audio,
//! completion and errors. Handlers run on the stream's own task, in wire order.

mod event;
mod frame;

pub use event::ParsedEvent;
pub use frame::{FrameDecoder, SseFrame};

use std::fmt::Display;
use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::voice::AudioChunk;
use crate::{Config, Result};

/// Fallback message for transport failures that carry no text
const GENERIC_STREAM_ERROR: &str = "Stream error";

pub type TextHandler = Box<dyn FnMut(String) + Send>;
pub type AudioHandler = Box<dyn FnMut(AudioChunk) + Send>;
pub type CompleteHandler = Box<dyn FnMut(u32) + Send>;
pub type ErrorHandler = Box<dyn FnMut(String) + Send>;

/// Optional callbacks for one chat stream
#[derive(Default)]
pub struct StreamHandlers {
    on_text: Option<TextHandler>,
    on_audio: Option<AudioHandler>,
    on_complete: Option<CompleteHandler>,
    on_error: Option<ErrorHandler>,
}

impl StreamHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with each text chunk
    #[must_use]
    pub fn on_text(mut self, handler: impl FnMut(String) + Send + 'static) -> Self {
        self.on_text = Some(Box::new(handler));
        self
    }

    /// Called with each audio chunk
    #[must_use]
    pub fn on_audio(mut self, handler: impl FnMut(AudioChunk) + Send + 'static) -> Self {
        self.on_audio = Some(Box::new(handler));
        self
    }

    /// Called with the server's audio chunk count when the turn completes
    #[must_use]
    pub fn on_complete(mut self, handler: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(handler));
        self
    }

    /// Called with a human-readable message on server or transport errors
    #[must_use]
    pub fn on_error(mut self, handler: impl FnMut(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }
}

impl std::fmt::Debug for StreamHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandlers")
            .field("on_text", &self.on_text.is_some())
            .field("on_audio", &self.on_audio.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Cancellation capability for an open stream
///
/// Cloning shares the same stream. Aborting after the stream ended is a no-op.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    cancel: CancellationToken,
    done: CancellationToken,
}

impl StreamHandle {
    /// Abort the request; no handler is invoked afterwards
    pub fn abort(&self) {
        if !self.done.is_cancelled() {
            tracing::debug!("aborting chat stream");
        }
        self.cancel.cancel();
    }

    /// Whether `abort` was called
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the stream task has ended (completed, failed, or aborted)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the stream task has ended
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    message: &'a str,
}

/// Opens chat streams against the configured backend
#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    client: reqwest::Client,
    url: String,
    default_sample_rate: u32,
    complete_on_eof: bool,
}

impl StreamCoordinator {
    /// Create a coordinator for the configured chat endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.stream.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.chat_stream_url(),
            default_sample_rate: config.audio.default_sample_rate,
            complete_on_eof: config.stream.complete_on_eof,
        })
    }

    /// Endpoint this coordinator posts to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `message` and stream the response into `handlers`
    ///
    /// Returns immediately; the request runs on a spawned task. The caller
    /// is responsible for passing a non-empty message. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn open(&self, message: &str, handlers: StreamHandlers) -> StreamHandle {
        tracing::info!(url = %self.url, len = message.len(), "opening chat stream");

        let request = self
            .client
            .post(&self.url)
            .json(&StreamRequest { message });
        let dispatcher = self.dispatcher(handlers);

        spawn_stream(move |cancel| async move {
            let mut dispatcher = dispatcher;

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("chat stream aborted before response");
                    return;
                }
                sent = request.send() => sent,
            };

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    if !cancel.is_cancelled() {
                        tracing::warn!(error = %e, "chat stream request failed");
                        dispatcher.error(error_text(&e));
                    }
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), "chat stream rejected");
                dispatcher.error(format!("HTTP error! status: {}", status.as_u16()));
                return;
            }

            pump(response.bytes_stream(), &mut dispatcher, &cancel).await;
        })
    }

    /// Stream an already-open byte source into `handlers`
    ///
    /// Same framing, ordering and cancellation rules as [`Self::open`]; used
    /// for replaying recorded responses and for driving the decoder in tests.
    #[must_use]
    pub fn consume<S, B, E>(&self, source: S, handlers: StreamHandlers) -> StreamHandle
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let dispatcher = self.dispatcher(handlers);

        spawn_stream(move |cancel| async move {
            let mut dispatcher = dispatcher;
            pump(source, &mut dispatcher, &cancel).await;
        })
    }

    fn dispatcher(&self, handlers: StreamHandlers) -> Dispatcher {
        Dispatcher {
            handlers,
            decoder: FrameDecoder::new(),
            default_sample_rate: self.default_sample_rate,
            complete_on_eof: self.complete_on_eof,
            audio_seen: 0,
            terminal_seen: false,
        }
    }
}

fn spawn_stream<F, Fut>(run: F) -> StreamHandle
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let done = CancellationToken::new();

    let task = run(cancel.clone());
    let guard = done.clone().drop_guard();

    tokio::spawn(async move {
        let _guard = guard;
        task.await;
    });

    StreamHandle { cancel, done }
}

/// Read the byte source to its end, or until cancelled
async fn pump<S, B, E>(source: S, dispatcher: &mut Dispatcher, cancel: &CancellationToken)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut source = std::pin::pin!(source);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("chat stream aborted");
                return;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                if dispatcher.feed(bytes.as_ref(), cancel).is_break() {
                    tracing::debug!("chat stream aborted mid-chunk");
                    return;
                }
            }
            Some(Err(e)) => {
                if !cancel.is_cancelled() {
                    tracing::warn!(error = %e, "chat stream read failed");
                    dispatcher.error(error_text(&e));
                }
                return;
            }
            None => {
                dispatcher.end_of_stream();
                return;
            }
        }
    }
}

/// Decodes frames and routes them to handlers
struct Dispatcher {
    handlers: StreamHandlers,
    decoder: FrameDecoder,
    default_sample_rate: u32,
    complete_on_eof: bool,
    audio_seen: u32,
    terminal_seen: bool,
}

impl Dispatcher {
    fn feed(&mut self, bytes: &[u8], cancel: &CancellationToken) -> ControlFlow<()> {
        for frame in self.decoder.push(bytes) {
            // A handler may abort the stream; nothing runs after that
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }

            match ParsedEvent::from_frame(&frame, self.default_sample_rate) {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => {
                    tracing::trace!(event = %frame.event, "ignoring frame");
                }
                Err(e) => {
                    tracing::warn!(
                        event = %frame.event,
                        error = %e,
                        "dropping malformed frame"
                    );
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn dispatch(&mut self, event: ParsedEvent) {
        tracing::trace!(event = event.name(), "dispatching stream event");

        match event {
            ParsedEvent::Text(text) => {
                if let Some(handler) = self.handlers.on_text.as_mut() {
                    handler(text);
                }
            }
            ParsedEvent::Audio(chunk) => {
                self.audio_seen = self.audio_seen.saturating_add(1);
                if let Some(handler) = self.handlers.on_audio.as_mut() {
                    handler(chunk);
                }
            }
            ParsedEvent::Done(count) => {
                self.terminal_seen = true;
                tracing::debug!(audio_count = count, "chat stream complete");
                if let Some(handler) = self.handlers.on_complete.as_mut() {
                    handler(count);
                }
            }
            ParsedEvent::Error(message) => {
                self.terminal_seen = true;
                self.error(message);
            }
        }
    }

    fn error(&mut self, message: String) {
        if let Some(handler) = self.handlers.on_error.as_mut() {
            handler(message);
        }
    }

    fn end_of_stream(&mut self) {
        if self.decoder.pending() > 0 {
            tracing::debug!(
                bytes = self.decoder.pending(),
                "discarding unterminated trailing line"
            );
        }

        if self.terminal_seen {
            return;
        }

        if self.complete_on_eof {
            tracing::debug!(
                audio_seen = self.audio_seen,
                "stream ended without done frame, completing"
            );
            if let Some(handler) = self.handlers.on_complete.as_mut() {
                handler(self.audio_seen);
            }
        } else {
            tracing::warn!("chat stream ended without a done frame");
        }
    }
}

fn error_text(e: &impl Display) -> String {
    let text = e.to_string();
    if text.trim().is_empty() {
        GENERIC_STREAM_ERROR.to_string()
    } else {
        text
    }
}

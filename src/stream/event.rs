//! Typed events carried by the chat stream

use serde::Deserialize;

use super::frame::SseFrame;
use crate::voice::AudioChunk;

/// One decoded event from the chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// Incremental assistant text
    Text(String),
    /// A self-contained audio chunk
    Audio(AudioChunk),
    /// The server finished the turn after sending `audio_count` chunks
    Done(u32),
    /// The server reported a failure
    Error(String),
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AudioPayload {
    audio: String,
    sample_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DonePayload {
    #[serde(default)]
    audio_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl ParsedEvent {
    /// Decode a frame into an event
    ///
    /// Returns `Ok(None)` for event names outside the chat protocol.
    ///
    /// # Errors
    ///
    /// Returns error if the data payload is not the JSON shape the event requires
    pub fn from_frame(
        frame: &SseFrame,
        default_sample_rate: u32,
    ) -> serde_json::Result<Option<Self>> {
        let event = match frame.event.as_str() {
            "text" => {
                let payload: TextPayload = serde_json::from_str(&frame.data)?;
                Self::Text(payload.text)
            }
            "audio" => {
                let payload: AudioPayload = serde_json::from_str(&frame.data)?;
                Self::Audio(AudioChunk::new(
                    payload.audio,
                    payload.sample_rate.unwrap_or(default_sample_rate),
                ))
            }
            "done" => {
                let payload: DonePayload = serde_json::from_str(&frame.data)?;
                Self::Done(payload.audio_count)
            }
            "error" => {
                let payload: ErrorPayload = serde_json::from_str(&frame.data)?;
                Self::Error(payload.error)
            }
            _ => return Ok(None),
        };

        Ok(Some(event))
    }

    /// Name of the wire event this variant is carried by
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Audio(_) => "audio",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }
}

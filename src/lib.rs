//! Knik client - streaming voice chat core
//!
//! Sends a message to the Knik assistant backend and consumes the
//! multiplexed response stream:
//! - Incremental text, rendered as it arrives
//! - Audio chunks, played back one after another
//! - Pause, resume and stop from the terminal or the OS media controls
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  ChatController                     │
//! │   messages  │  loading  │  audio indicators         │
//! └───────┬───────────────────────────────┬─────────────┘
//!         │ open                          │ enqueue
//! ┌───────▼──────────────┐     ┌──────────▼─────────────┐
//! │  StreamCoordinator   │     │    PlaybackQueue       │
//! │ POST, frames, events │     │  FIFO drain loop       │
//! └──────────────────────┘     └──────────┬─────────────┘
//!                                         │ play
//!                              ┌──────────▼─────────────┐
//!                              │        Player          │◄── MediaSessionBridge
//!                              │  one voice at a time   │    (refresh hook)
//!                              └──────────┬─────────────┘
//!                                         │
//!                              ┌──────────▼─────────────┐
//!                              │  AudioOutput (cpal)    │
//!                              └────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod media;
pub mod stream;
pub mod voice;

pub use chat::{ChatController, ChatEvent, ChatState};
pub use config::Config;
pub use error::{Error, Result};
pub use media::MediaSessionBridge;
pub use stream::{StreamCoordinator, StreamHandle, StreamHandlers};
pub use voice::{AudioChunk, PlaybackQueue, Player};

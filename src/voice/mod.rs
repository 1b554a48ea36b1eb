//! Audio playback
//!
//! Decoding ([`AudioClip`]), the output seam ([`AudioOutput`]), the
//! single-flight engine ([`Player`]) and the sequential chunk queue
//! ([`PlaybackQueue`]).

mod clip;
mod output;
mod player;
mod queue;

pub use clip::{AudioClip, samples_to_wav};
pub use output::{AudioOutput, CpalOutput, FinishSender, NullOutput, Voice};
pub use player::{
    Completion, PlaybackOutcome, PlaybackState, Player, RefreshHook, StateObserver, WeakPlayer,
};
pub use queue::{AudioChunk, PlaybackQueue};

use std::sync::Arc;

/// Pick the speaker backend, falling back to silence when none is usable
#[must_use]
pub fn default_output(enabled: bool) -> Arc<dyn AudioOutput> {
    if !enabled {
        tracing::info!("audio disabled");
        return Arc::new(NullOutput);
    }

    match CpalOutput::new() {
        Ok(output) => Arc::new(output),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, responses will be silent");
            Arc::new(NullOutput)
        }
    }
}

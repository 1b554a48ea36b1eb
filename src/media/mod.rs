//! OS media transport integration
//!
//! Mirrors the playback engine into the system's now-playing surface and
//! forwards its play/pause/stop buttons back into the engine. The engine
//! never depends on this module; the bridge attaches itself through the
//! engine's refresh hook.

#[cfg(windows)]
mod smtc;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::MediaSessionConfig;
use crate::voice::{PlaybackState, Player};
use crate::Result;

/// A transport button pressed by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Play,
    Pause,
    Stop,
}

/// Status shown by the OS surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Playing,
    Paused,
    Stopped,
}

/// Fixed now-playing descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub artwork: Option<PathBuf>,
}

impl From<&MediaSessionConfig> for NowPlaying {
    fn from(config: &MediaSessionConfig) -> Self {
        Self {
            title: config.title.clone(),
            artist: config.artist.clone(),
            artwork: config.artwork.clone(),
        }
    }
}

pub type ActionHandler = Arc<dyn Fn(TransportAction) + Send + Sync>;

/// A host transport-control surface
pub trait TransportControls: Send + Sync {
    /// Publish now-playing metadata
    ///
    /// # Errors
    ///
    /// Returns error if the host rejects the update
    fn set_metadata(&self, now_playing: &NowPlaying) -> Result<()>;

    /// Publish playback status
    ///
    /// # Errors
    ///
    /// Returns error if the host rejects the update
    fn set_status(&self, status: TransportStatus) -> Result<()>;

    /// Route button presses to `handler`, replacing any previous handler
    fn set_action_handler(&self, handler: ActionHandler);

    /// Remove metadata and show the session as stopped
    ///
    /// # Errors
    ///
    /// Returns error if the host rejects the update
    fn clear(&self) -> Result<()>;
}

/// Open the platform's transport controls, if it has any
#[must_use]
pub fn system_controls() -> Option<Arc<dyn TransportControls>> {
    #[cfg(windows)]
    {
        match smtc::SmtcControls::new() {
            Ok(controls) => return Some(Arc::new(controls)),
            Err(e) => tracing::warn!(error = %e, "system media controls unavailable"),
        }
    }

    tracing::debug!("no media session support on this platform");
    None
}

/// Presentation mirror of the playback engine
///
/// Holds no playback state of its own. Without host support every call is a
/// no-op.
pub struct MediaSessionBridge {
    controls: Option<Arc<dyn TransportControls>>,
    now_playing: NowPlaying,
}

impl std::fmt::Debug for MediaSessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSessionBridge")
            .field("supported", &self.is_supported())
            .field("now_playing", &self.now_playing)
            .finish()
    }
}

impl MediaSessionBridge {
    #[must_use]
    pub fn new(controls: Option<Arc<dyn TransportControls>>, now_playing: NowPlaying) -> Self {
        Self {
            controls,
            now_playing,
        }
    }

    /// Bridge to the system controls, or an inert bridge when disabled
    #[must_use]
    pub fn from_config(config: &MediaSessionConfig) -> Self {
        let controls = if config.enabled {
            system_controls()
        } else {
            None
        };
        Self::new(controls, NowPlaying::from(config))
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.controls.is_some()
    }

    /// Wire transport buttons to `player` and register as its refresh hook
    pub fn attach(bridge: &Arc<Self>, player: &Player) {
        let Some(controls) = bridge.controls.as_ref() else {
            return;
        };

        let weak = player.downgrade();
        controls.set_action_handler(Arc::new(move |action| {
            let Some(player) = weak.upgrade() else {
                return;
            };
            tracing::debug!(?action, "transport action");
            match action {
                TransportAction::Play => player.resume(),
                TransportAction::Pause => player.pause(),
                TransportAction::Stop => player.stop(),
            }
        }));

        let hook_bridge = Arc::clone(bridge);
        player.set_refresh_hook(Some(Box::new(move |state| hook_bridge.refresh(state))));
        bridge.refresh(player.state());
    }

    /// Mirror `state` into the OS surface
    pub fn refresh(&self, state: PlaybackState) {
        let Some(controls) = self.controls.as_ref() else {
            return;
        };

        let result = if state.is_idle() {
            controls.clear()
        } else {
            let status = if state.is_paused {
                TransportStatus::Paused
            } else {
                TransportStatus::Playing
            };
            controls
                .set_metadata(&self.now_playing)
                .and_then(|()| controls.set_status(status))
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to update media session");
        }
    }
}

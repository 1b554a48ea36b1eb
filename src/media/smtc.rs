//! Windows System Media Transport Controls

use std::sync::{Arc, Mutex, PoisonError};

use windows::Foundation::TypedEventHandler;
use windows::Media::Playback::MediaPlayer;
use windows::Media::{
    MediaPlaybackStatus, MediaPlaybackType, SystemMediaTransportControls,
    SystemMediaTransportControlsButton, SystemMediaTransportControlsButtonPressedEventArgs,
};
use windows::Storage::StorageFile;
use windows::Storage::Streams::RandomAccessStreamReference;
use windows::core::HSTRING;

use super::{ActionHandler, NowPlaying, TransportAction, TransportControls, TransportStatus};
use crate::{Error, Result};

type HandlerSlot = Arc<Mutex<Option<ActionHandler>>>;

fn smtc_error(what: &'static str) -> impl FnOnce(windows::core::Error) -> Error {
    move |e| Error::MediaSession(format!("{what}: {e}"))
}

pub struct SmtcControls {
    // Keeps the SMTC session alive
    _player: MediaPlayer,
    smtc: SystemMediaTransportControls,
    handler: HandlerSlot,
}

impl SmtcControls {
    pub fn new() -> Result<Self> {
        let player = MediaPlayer::new().map_err(smtc_error("failed to create MediaPlayer"))?;

        // Drive the controls manually instead of through the player's commands
        player
            .CommandManager()
            .map_err(smtc_error("failed to get CommandManager"))?
            .SetIsEnabled(false)
            .map_err(smtc_error("failed to disable CommandManager"))?;

        let smtc = player
            .SystemMediaTransportControls()
            .map_err(smtc_error("failed to get SMTC"))?;

        smtc.SetIsEnabled(true)
            .map_err(smtc_error("failed to enable SMTC"))?;
        smtc.SetIsPlayEnabled(true)
            .map_err(smtc_error("failed to enable play button"))?;
        smtc.SetIsPauseEnabled(true)
            .map_err(smtc_error("failed to enable pause button"))?;
        smtc.SetIsStopEnabled(true)
            .map_err(smtc_error("failed to enable stop button"))?;

        let handler: HandlerSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handler);

        let pressed = TypedEventHandler::new(
            move |_sender: &Option<SystemMediaTransportControls>,
                  args: &Option<SystemMediaTransportControlsButtonPressedEventArgs>| {
                let action = args.as_ref().and_then(|args| args.Button().ok()).and_then(
                    |button| match button {
                        SystemMediaTransportControlsButton::Play => Some(TransportAction::Play),
                        SystemMediaTransportControlsButton::Pause => Some(TransportAction::Pause),
                        SystemMediaTransportControlsButton::Stop => Some(TransportAction::Stop),
                        _ => None,
                    },
                );

                let handler = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
                if let (Some(action), Some(handler)) = (action, handler) {
                    handler(action);
                }
                Ok(())
            },
        );

        smtc.ButtonPressed(&pressed)
            .map_err(smtc_error("failed to register button handler"))?;

        tracing::debug!("system media transport controls ready");

        Ok(Self {
            _player: player,
            smtc,
            handler,
        })
    }

    fn set_artwork(
        updater: &windows::Media::SystemMediaTransportControlsDisplayUpdater,
        path: &std::path::Path,
    ) -> Result<()> {
        let path = HSTRING::from(path.to_string_lossy().as_ref());
        let file = StorageFile::GetFileFromPathAsync(&path)
            .and_then(|op| op.get())
            .map_err(smtc_error("failed to open artwork"))?;
        let stream = RandomAccessStreamReference::CreateFromFile(&file)
            .map_err(smtc_error("failed to read artwork"))?;
        updater
            .SetThumbnail(&stream)
            .map_err(smtc_error("failed to set artwork"))
    }
}

impl TransportControls for SmtcControls {
    fn set_metadata(&self, now_playing: &NowPlaying) -> Result<()> {
        let updater = self
            .smtc
            .DisplayUpdater()
            .map_err(smtc_error("failed to get display updater"))?;

        updater
            .SetType(MediaPlaybackType::Music)
            .map_err(smtc_error("failed to set media type"))?;

        let music = updater
            .MusicProperties()
            .map_err(smtc_error("failed to get music properties"))?;
        music
            .SetTitle(&HSTRING::from(now_playing.title.as_str()))
            .map_err(smtc_error("failed to set title"))?;
        music
            .SetArtist(&HSTRING::from(now_playing.artist.as_str()))
            .map_err(smtc_error("failed to set artist"))?;

        if let Some(path) = now_playing.artwork.as_deref() {
            if let Err(e) = Self::set_artwork(&updater, path) {
                tracing::warn!(path = %path.display(), error = %e, "skipping artwork");
            }
        }

        updater
            .Update()
            .map_err(smtc_error("failed to update display"))
    }

    fn set_status(&self, status: TransportStatus) -> Result<()> {
        let status = match status {
            TransportStatus::Playing => MediaPlaybackStatus::Playing,
            TransportStatus::Paused => MediaPlaybackStatus::Paused,
            TransportStatus::Stopped => MediaPlaybackStatus::Stopped,
        };

        self.smtc
            .SetPlaybackStatus(status)
            .map_err(smtc_error("failed to set playback status"))
    }

    fn set_action_handler(&self, handler: ActionHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn clear(&self) -> Result<()> {
        self.set_status(TransportStatus::Stopped)?;
        let updater = self
            .smtc
            .DisplayUpdater()
            .map_err(smtc_error("failed to get display updater"))?;
        updater
            .ClearAll()
            .map_err(smtc_error("failed to clear display"))?;
        updater
            .Update()
            .map_err(smtc_error("failed to update display"))
    }
}

// WinRT objects here are agile and may be used from any thread
#[allow(unsafe_code)]
unsafe impl Send for SmtcControls {}
#[allow(unsafe_code)]
unsafe impl Sync for SmtcControls {}

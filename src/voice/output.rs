//! Audio output seam and the cpal speaker backend
//!
//! An [`AudioOutput`] turns a decoded clip into exactly one live [`Voice`].
//! The voice reports natural completion (or failure) through the
//! [`FinishSender`] it was opened with; a halted voice drops the sender
//! without reporting anything.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::AudioClip;
use crate::{Error, Result};

/// Completion channel handed to a voice when it is opened
pub type FinishSender = oneshot::Sender<Result<()>>;

/// How often the playback thread checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Let the device drain its last buffer before the stream is dropped
const TAIL_DELAY: Duration = Duration::from_millis(100);

/// One playing clip
pub trait Voice: Send {
    /// Suspend output in place
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to pause
    fn pause(&mut self) -> Result<()>;

    /// Continue from where `pause` left off
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to restart
    fn resume(&mut self) -> Result<()>;

    /// Stop immediately and release the device; completion is never reported
    fn halt(&mut self);
}

/// Something that can play clips
pub trait AudioOutput: Send + Sync {
    /// Start playing `clip`
    ///
    /// Implementations must report completion through `finished` only after
    /// this call has returned.
    ///
    /// # Errors
    ///
    /// Returns error if playback cannot start (no device, refused by host)
    fn open(&self, clip: AudioClip, finished: FinishSender) -> Result<Box<dyn Voice>>;
}

/// Discards audio; every clip completes immediately
///
/// Used when audio is disabled or no output device exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

struct NullVoice;

impl Voice for NullVoice {
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn halt(&mut self) {}
}

impl AudioOutput for NullOutput {
    fn open(&self, clip: AudioClip, finished: FinishSender) -> Result<Box<dyn Voice>> {
        tracing::trace!(samples = clip.samples().len(), "discarding clip");
        // The receiver only polls after `open` returns, so sending now is safe
        let _ = finished.send(Ok(()));
        Ok(Box::new(NullVoice))
    }
}

/// Plays clips on the default output device
///
/// Each voice owns its cpal stream on a dedicated thread, since cpal streams
/// cannot move between threads on every platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl CpalOutput {
    /// Check that an output device is available
    ///
    /// # Errors
    ///
    /// Returns error if the host has no default output device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio output initialized"
        );

        Ok(Self)
    }
}

impl AudioOutput for CpalOutput {
    fn open(&self, clip: AudioClip, finished: FinishSender) -> Result<Box<dyn Voice>> {
        let (command_tx, command_rx) = mpsc::channel::<VoiceCommand>();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<()>>(1);

        std::thread::Builder::new()
            .name("knik-playback".to_string())
            .spawn(move || run_voice(clip, &command_rx, &init_tx, finished))
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during init".to_string()))??;

        Ok(Box::new(CpalVoice {
            commands: command_tx,
        }))
    }
}

/// Where the playback thread reports the result of a command
type Reply = mpsc::SyncSender<Result<()>>;

#[derive(Debug)]
enum VoiceCommand {
    Pause(Reply),
    Resume(Reply),
    Halt,
}

struct CpalVoice {
    commands: mpsc::Sender<VoiceCommand>,
}

impl CpalVoice {
    /// Send a command and wait for the device's answer
    fn request(&self, command: fn(Reply) -> VoiceCommand) -> Result<()> {
        let gone = || Error::Audio("playback thread is gone".to_string());
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.commands.send(command(reply_tx)).map_err(|_| gone())?;
        reply_rx.recv().map_err(|_| gone())?
    }
}

impl Voice for CpalVoice {
    fn pause(&mut self) -> Result<()> {
        self.request(VoiceCommand::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.request(VoiceCommand::Resume)
    }

    fn halt(&mut self) {
        let _ = self.commands.send(VoiceCommand::Halt);
    }
}

/// Shared between the playback thread and the device callback
struct Cursor {
    samples: Vec<f32>,
    position: AtomicUsize,
    drained: AtomicBool,
    failure: Mutex<Option<String>>,
}

fn run_voice(
    clip: AudioClip,
    commands: &mpsc::Receiver<VoiceCommand>,
    init: &mpsc::SyncSender<Result<()>>,
    finished: FinishSender,
) {
    let (stream, cursor) = match build_stream(clip) {
        Ok(built) => built,
        Err(e) => {
            let _ = init.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init.send(Err(Error::Audio(format!("failed to start stream: {e}"))));
        return;
    }
    let _ = init.send(Ok(()));

    drive(stream, &cursor, commands, finished);
}

/// Serve commands until the clip drains, fails or is halted
fn drive<S: StreamTrait>(
    stream: S,
    cursor: &Cursor,
    commands: &mpsc::Receiver<VoiceCommand>,
    finished: FinishSender,
) {
    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(VoiceCommand::Pause(reply)) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::Audio(format!("failed to pause stream: {e}")));
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "pause refused");
                }
                let _ = reply.send(result);
            }
            Ok(VoiceCommand::Resume(reply)) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::Audio(format!("failed to resume stream: {e}")));
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "resume refused");
                }
                let _ = reply.send(result);
            }
            Ok(VoiceCommand::Halt) | Err(RecvTimeoutError::Disconnected) => {
                tracing::trace!("voice halted");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                let failure = cursor
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(message) = failure {
                    let _ = finished.send(Err(Error::Playback(message)));
                    return;
                }

                if cursor.drained.load(Ordering::Acquire) {
                    std::thread::sleep(TAIL_DELAY);
                    drop(stream);
                    tracing::debug!(samples = cursor.samples.len(), "playback complete");
                    let _ = finished.send(Ok(()));
                    return;
                }
            }
        }
    }
}

fn build_stream(clip: AudioClip) -> Result<(Stream, Arc<Cursor>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let rate = clip.sample_rate();
    let native = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() <= 2)
        .find(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate))
        .map(|c| c.with_sample_rate(SampleRate(rate)).config());

    let (config, clip): (StreamConfig, AudioClip) = if let Some(config) = native {
        (config, clip)
    } else {
        // Device cannot run at the clip's rate; convert to its default
        let default = device
            .default_output_config()
            .map_err(|e| Error::Audio(format!("failed to get default output config: {e}")))?;
        let config: StreamConfig = default.into();
        tracing::debug!(
            from = rate,
            to = config.sample_rate.0,
            "resampling clip for output device"
        );
        let resampled = clip.resampled(config.sample_rate.0)?;
        (config, resampled)
    };

    let channels = usize::from(config.channels.max(1));
    let cursor = Arc::new(Cursor {
        samples: clip.into_samples(),
        position: AtomicUsize::new(0),
        drained: AtomicBool::new(false),
        failure: Mutex::new(None),
    });

    let data_cursor = Arc::clone(&cursor);
    let error_cursor = Arc::clone(&cursor);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = data_cursor.position.load(Ordering::Relaxed);

                for frame in data.chunks_mut(channels) {
                    let sample = data_cursor.samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < data_cursor.samples.len() {
                        pos += 1;
                    }
                }

                data_cursor.position.store(pos, Ordering::Relaxed);
                if pos >= data_cursor.samples.len() {
                    data_cursor.drained.store(true, Ordering::Release);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                *error_cursor
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "voice stream built"
    );

    Ok((stream, cursor))
}

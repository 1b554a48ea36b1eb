use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt as _;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use knik_client::chat::{ChatController, ChatEvent};
use knik_client::config::normalize_api_url;
use knik_client::voice::{self, AudioChunk, AudioClip, CpalOutput, PlaybackQueue, Player};
use knik_client::{Config, Error, MediaSessionBridge, StreamCoordinator};

/// Knik - voice chat with the Knik assistant
#[derive(Parser)]
#[command(name = "knik", version, about)]
struct Cli {
    /// Backend base URL (e.g., <http://localhost:8000>)
    #[arg(long, env = "KNIK_API_URL")]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print responses without playing audio
    #[arg(long)]
    no_audio: bool,

    /// Do not register with the OS media controls
    #[arg(long)]
    no_media_session: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and wait for the spoken reply
    Ask {
        /// Message text
        message: String,
    },
    /// Interactive chat (default)
    Chat,
    /// Play a test tone through the playback pipeline
    TestSpeaker,
    /// Play a local WAV or MP3 file
    Play {
        /// Audio file path
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,knik_client=debug",
        2 => "debug",
        _ => "trace",
    };

    // Responses go to stdout; keep logs out of the way
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.as_deref() {
        config.api_url = normalize_api_url(url)?;
    }
    if cli.no_audio {
        config.audio.enabled = false;
    }
    if cli.no_media_session {
        config.media_session.enabled = false;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Ask { message } => {
            let controller = build_controller(&config)?;
            ask(&controller, &message).await
        }
        Command::Chat => {
            let controller = build_controller(&config)?;
            repl(&controller).await
        }
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Play { file } => play_file(&config, &file).await,
    }
}

fn build_player(config: &Config) -> Player {
    let output = voice::default_output(config.audio.enabled);
    let player = Player::new(output, config.audio.volume);

    let bridge = Arc::new(MediaSessionBridge::from_config(&config.media_session));
    MediaSessionBridge::attach(&bridge, &player);
    player
}

fn build_controller(config: &Config) -> anyhow::Result<ChatController> {
    let queue = PlaybackQueue::new(build_player(config));
    let coordinator = StreamCoordinator::new(config)?;
    tracing::info!(url = coordinator.url(), "chat endpoint");

    Ok(ChatController::new(
        coordinator,
        queue,
        config.audio.settle_delay,
    ))
}

/// One turn, then wait for its audio
async fn ask(controller: &ChatController, message: &str) -> anyhow::Result<()> {
    let (_, mut events) = controller.send_and_subscribe(message)?;

    if !print_turn(controller, &mut events).await {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => controller.cancel(),
        () = controller.wait_for_turn() => {}
    }

    Ok(())
}

async fn repl(controller: &ChatController) -> anyhow::Result<()> {
    println!("Knik chat. Commands: /pause /resume /stop /cancel /quit");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
                println!();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/pause" => controller.pause_audio(),
            "/resume" => controller.resume_audio(),
            "/stop" => controller.stop_audio(),
            "/cancel" => controller.cancel(),
            // Fresh receiver per turn
            text => match controller.send_and_subscribe(text) {
                Ok((_, mut events)) => {
                    print_turn(controller, &mut events).await;
                }
                Err(Error::EmptyMessage) => {}
                Err(e) => eprintln!("{e}"),
            },
        }
    }

    controller.cancel();
    Ok(())
}

/// Print streamed text until the turn ends; false if the user cancelled
async fn print_turn(
    controller: &ChatController,
    events: &mut tokio::sync::broadcast::Receiver<ChatEvent>,
) -> bool {
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
                println!();
                return false;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(ChatEvent::Text(text)) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            Ok(ChatEvent::TurnCompleted { .. } | ChatEvent::TurnEnded) => {
                println!();
                return true;
            }
            Ok(ChatEvent::TurnFailed(message)) => {
                println!();
                eprintln!("error: {message}");
                return true;
            }
            Ok(ChatEvent::Cancelled) | Err(RecvError::Closed) => return false,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "display fell behind the stream");
            }
        }
    }
}

/// Tone through the same decode and queue path as streamed audio
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = Arc::new(CpalOutput::new()?);
    let queue = PlaybackQueue::new(Player::new(output, config.audio.volume));

    let sample_rate = config.audio.default_sample_rate;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let wav = voice::samples_to_wav(&samples, sample_rate)?;
    let payload = base64::engine::general_purpose::STANDARD.encode(wav);
    queue.enqueue(AudioChunk::new(payload, sample_rate));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => queue.stop(),
        () = queue.drained() => {}
    }

    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

async fn play_file(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let clip = AudioClip::from_bytes(&bytes, config.audio.default_sample_rate)?;
    println!(
        "Playing {} ({:.1}s at {} Hz)",
        path.display(),
        clip.duration().as_secs_f32(),
        clip.sample_rate()
    );

    let player = build_player(config);
    let completion = player.start_clip(clip)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => player.stop(),
        outcome = completion => {
            tracing::debug!(?outcome, "file playback settled");
            outcome?;
        }
    }

    Ok(())
}

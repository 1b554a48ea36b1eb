//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine as _;
use futures::StreamExt as _;

use knik_client::stream::StreamHandlers;
use knik_client::voice::{AudioClip, AudioOutput, FinishSender, Voice, samples_to_wav};
use knik_client::{AudioChunk, Config, Error};

/// Example response body from the backend
pub const SAMPLE_RESPONSE: &str = "event: text\ndata: {\"text\":\"Hi\"}\n\nevent: audio\ndata: {\"audio\":\"QUJD\",\"sample_rate\":24000}\n\nevent: done\ndata: {\"audio_count\":1}\n\n";

/// Poll `cond` until it holds, panicking after a few seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Base64 WAV payload with `len` samples at 24 kHz
#[must_use]
pub fn wav_base64(len: usize) -> String {
    let wav = samples_to_wav(&vec![0.1; len], 24000).expect("failed to encode wav");
    base64::engine::general_purpose::STANDARD.encode(wav)
}

/// `audio` frame carrying a WAV payload
#[must_use]
pub fn audio_frame(len: usize) -> String {
    format!(
        "event: audio\ndata: {{\"audio\":\"{}\",\"sample_rate\":24000}}\n\n",
        wav_base64(len)
    )
}

#[derive(Default)]
struct FakeState {
    /// Sample count of every opened clip, in open order
    opened: Vec<usize>,
    finishers: Vec<Option<FinishSender>>,
    live: Vec<bool>,
    max_live: usize,
    fail_next_open: bool,
    /// `pause 0`, `resume 0`, `halt 0`, ...
    log: Vec<String>,
}

impl FakeState {
    fn release(&mut self, index: usize) -> Option<FinishSender> {
        self.live[index] = false;
        self.finishers[index].take()
    }
}

/// Output that records voices instead of making sound
///
/// Voices only complete when the test calls [`FakeOutput::finish`] or
/// [`FakeOutput::fail`].
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<FakeState>>,
}

impl FakeOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_output(&self) -> Arc<dyn AudioOutput> {
        Arc::new(self.clone())
    }

    pub fn opened(&self) -> Vec<usize> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    /// Most voices ever live at the same time
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().fail_next_open = true;
    }

    /// Report voice `index` as played to the end
    pub fn finish(&self, index: usize) {
        let sender = self.state.lock().unwrap().release(index);
        if let Some(sender) = sender {
            let _ = sender.send(Ok(()));
        }
    }

    /// Report voice `index` as failed part way
    pub fn fail(&self, index: usize) {
        let sender = self.state.lock().unwrap().release(index);
        if let Some(sender) = sender {
            let _ = sender.send(Err(Error::Playback("device lost".to_string())));
        }
    }
}

impl AudioOutput for FakeOutput {
    fn open(&self, clip: AudioClip, finished: FinishSender) -> knik_client::Result<Box<dyn Voice>> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_open) {
            return Err(Error::Audio("device busy".to_string()));
        }

        let index = state.opened.len();
        state.opened.push(clip.samples().len());
        state.finishers.push(Some(finished));
        state.live.push(true);
        let live = state.live.iter().filter(|live| **live).count();
        state.max_live = state.max_live.max(live);

        Ok(Box::new(FakeVoice {
            index,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeVoice {
    index: usize,
    state: Arc<Mutex<FakeState>>,
}

impl Voice for FakeVoice {
    fn pause(&mut self) -> knik_client::Result<()> {
        self.state.lock().unwrap().log.push(format!("pause {}", self.index));
        Ok(())
    }

    fn resume(&mut self) -> knik_client::Result<()> {
        self.state.lock().unwrap().log.push(format!("resume {}", self.index));
        Ok(())
    }

    fn halt(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("halt {}", self.index));
        // Dropping the sender reports nothing
        drop(state.release(self.index));
    }
}

/// Records handler calls as `kind:value` strings
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    #[must_use]
    pub fn handlers(&self) -> StreamHandlers {
        let text = self.clone();
        let audio = self.clone();
        let complete = self.clone();
        let error = self.clone();

        StreamHandlers::new()
            .on_text(move |t| text.push(format!("text:{t}")))
            .on_audio(move |chunk: AudioChunk| {
                audio.push(format!("audio:{}@{}", chunk.payload, chunk.sample_rate));
            })
            .on_complete(move |count| complete.push(format!("complete:{count}")))
            .on_error(move |message| error.push(format!("error:{message}")))
    }
}

/// Local chat backend serving a canned event stream
pub struct SseServer {
    pub config: Config,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl SseServer {
    /// JSON bodies received so far
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct ServerState {
    status: StatusCode,
    chunks: Vec<String>,
    hold_open: bool,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn chat_stream(
    State(state): State<ServerState>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> Response {
    state.requests.lock().unwrap().push(body);

    if !state.status.is_success() {
        return state.status.into_response();
    }

    let chunks = futures::stream::iter(
        state
            .chunks
            .into_iter()
            .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
    );

    let body = if state.hold_open {
        Body::from_stream(chunks.chain(futures::stream::pending()))
    } else {
        Body::from_stream(chunks)
    };

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(body)
        .unwrap()
}

/// Serve `chunks` as the body of `/api/chat/stream`
///
/// With `hold_open` the body never ends after the last chunk.
pub async fn sse_server(chunks: Vec<String>, status: StatusCode, hold_open: bool) -> SseServer {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = ServerState {
        status,
        chunks,
        hold_open,
        requests: Arc::clone(&requests),
    };

    let app = Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = Config {
        api_url: format!("http://{addr}"),
        ..Config::default()
    };

    SseServer { config, requests }
}

/// Config pointing at a port nothing listens on
pub async fn refused_config() -> Config {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    Config {
        api_url: format!("http://{addr}"),
        ..Config::default()
    }
}

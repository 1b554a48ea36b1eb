//! Chat stream coordinator integration tests
//!
//! Byte-source tests drive `consume` directly; HTTP tests run against a
//! local axum server.

use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use futures::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use knik_client::stream::{StreamCoordinator, StreamHandle};
use knik_client::Config;

mod common;
use common::{Recorder, SAMPLE_RESPONSE, refused_config, sse_server, wait_until};

type Chunk = Result<Vec<u8>, std::io::Error>;

fn coordinator() -> StreamCoordinator {
    StreamCoordinator::new(&Config::default()).unwrap()
}

fn chunks(parts: &[&[u8]]) -> impl futures::Stream<Item = Chunk> + Send + 'static {
    let owned: Vec<Chunk> = parts.iter().map(|p| Ok(p.to_vec())).collect();
    stream::iter(owned)
}

async fn replay(coordinator: &StreamCoordinator, parts: &[&[u8]]) -> Vec<String> {
    let recorder = Recorder::new();
    let handle = coordinator.consume(chunks(parts), recorder.handlers());
    handle.finished().await;
    recorder.calls()
}

#[tokio::test]
async fn test_example_response_dispatches_in_wire_order() {
    let calls = replay(&coordinator(), &[SAMPLE_RESPONSE.as_bytes()]).await;

    assert_eq!(calls, vec!["text:Hi", "audio:QUJD@24000", "complete:1"]);
}

#[tokio::test]
async fn test_any_split_point_parses_identically() {
    let coordinator = coordinator();
    let bytes = SAMPLE_RESPONSE.as_bytes();
    let expected = replay(&coordinator, &[bytes]).await;

    for split in 0..=bytes.len() {
        let calls = replay(&coordinator, &[&bytes[..split], &bytes[split..]]).await;
        assert_eq!(calls, expected, "split at byte {split}");
    }
}

#[tokio::test]
async fn test_small_uneven_reads_parse_identically() {
    let coordinator = coordinator();
    let bytes = SAMPLE_RESPONSE.as_bytes();
    let expected = replay(&coordinator, &[bytes]).await;

    for size in 1..8 {
        let parts: Vec<&[u8]> = bytes.chunks(size).collect();
        let calls = replay(&coordinator, &parts).await;
        assert_eq!(calls, expected, "reads of {size} bytes");
    }
}

#[tokio::test]
async fn test_interleaved_text_and_audio_keep_order() {
    let body = concat!(
        "event: text\ndata: {\"text\":\"One\"}\n\n",
        "event: audio\ndata: {\"audio\":\"QQ==\",\"sample_rate\":24000}\n\n",
        "event: text\ndata: {\"text\":\" two\"}\n\n",
        "event: audio\ndata: {\"audio\":\"Qg==\",\"sample_rate\":16000}\n\n",
        "event: text\ndata: {\"text\":\" three\"}\n\n",
        "event: done\ndata: {\"audio_count\":2}\n\n",
    );

    let calls = replay(&coordinator(), &[body.as_bytes()]).await;

    assert_eq!(
        calls,
        vec![
            "text:One",
            "audio:QQ==@24000",
            "text: two",
            "audio:Qg==@16000",
            "text: three",
            "complete:2",
        ]
    );
}

#[tokio::test]
async fn test_malformed_json_is_skipped() {
    let body = concat!(
        "event: text\ndata: {\"text\":\"before\"}\n\n",
        "event: text\ndata: {\"text\":\n\n",
        "event: audio\ndata: not json at all\n\n",
        "event: text\ndata: {\"text\":\"after\"}\n\n",
        "event: done\ndata: {\"audio_count\":0}\n\n",
    );

    let calls = replay(&coordinator(), &[body.as_bytes()]).await;

    assert_eq!(calls, vec!["text:before", "text:after", "complete:0"]);
}

#[tokio::test]
async fn test_missing_done_fires_no_completion() {
    let body = "event: text\ndata: {\"text\":\"cut off\"}\n\n";

    let calls = replay(&coordinator(), &[body.as_bytes()]).await;

    assert_eq!(calls, vec!["text:cut off"]);
}

#[tokio::test]
async fn test_complete_on_eof_synthesizes_completion() {
    let mut config = Config::default();
    config.stream.complete_on_eof = true;
    let coordinator = StreamCoordinator::new(&config).unwrap();

    let body = concat!(
        "event: audio\ndata: {\"audio\":\"QQ==\",\"sample_rate\":24000}\n\n",
        "event: audio\ndata: {\"audio\":\"Qg==\",\"sample_rate\":24000}\n\n",
    );
    let calls = replay(&coordinator, &[body.as_bytes()]).await;

    assert_eq!(calls, vec!["audio:QQ==@24000", "audio:Qg==@24000", "complete:2"]);
}

#[tokio::test]
async fn test_complete_on_eof_does_not_double_complete() {
    let mut config = Config::default();
    config.stream.complete_on_eof = true;
    let coordinator = StreamCoordinator::new(&config).unwrap();

    let calls = replay(&coordinator, &[SAMPLE_RESPONSE.as_bytes()]).await;

    assert_eq!(calls, vec!["text:Hi", "audio:QUJD@24000", "complete:1"]);
}

#[tokio::test]
async fn test_server_error_frame_reaches_on_error() {
    let body = "event: error\ndata: {\"error\":\"model offline\"}\n\n";

    let calls = replay(&coordinator(), &[body.as_bytes()]).await;

    assert_eq!(calls, vec!["error:model offline"]);
}

#[tokio::test]
async fn test_transport_error_reports_message() {
    let recorder = Recorder::new();
    let source = stream::iter(vec![
        Ok(b"event: text\ndata: {\"text\":\"Hi\"}\n\n".to_vec()),
        Err(std::io::Error::other("connection reset")),
    ]);

    let handle = coordinator().consume(source, recorder.handlers());
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["text:Hi", "error:connection reset"]);
}

#[tokio::test]
async fn test_transport_error_without_text_uses_fallback() {
    let recorder = Recorder::new();
    let source = stream::iter(vec![Err::<Vec<u8>, _>(std::io::Error::other(""))]);

    let handle = coordinator().consume(source, recorder.handlers());
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["error:Stream error"]);
}

#[tokio::test]
async fn test_abort_mid_stream_silences_handlers() {
    let (tx, rx) = mpsc::channel::<Chunk>(8);
    let recorder = Recorder::new();
    let handle = coordinator().consume(ReceiverStream::new(rx), recorder.handlers());

    tx.send(Ok(b"event: text\ndata: {\"text\":\"first\"}\n\n".to_vec()))
        .await
        .unwrap();
    wait_until(|| recorder.len() == 1).await;

    handle.abort();
    assert!(handle.is_aborted());

    // The receiver may already be gone
    let _ = tx
        .send(Ok(SAMPLE_RESPONSE.as_bytes().to_vec()))
        .await;
    drop(tx);
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["text:first"]);
}

#[tokio::test]
async fn test_abort_from_handler_stops_remaining_frames() {
    let (tx, rx) = mpsc::channel::<Chunk>(8);
    let recorder = Recorder::new();
    let slot: Arc<Mutex<Option<StreamHandle>>> = Arc::new(Mutex::new(None));

    let text_recorder = recorder.clone();
    let text_slot = Arc::clone(&slot);
    let handlers = recorder
        .handlers()
        .on_text(move |t| {
            text_recorder.push(format!("text:{t}"));
            if let Some(handle) = text_slot.lock().unwrap().as_ref() {
                handle.abort();
            }
        });

    let handle = coordinator().consume(ReceiverStream::new(rx), handlers);
    *slot.lock().unwrap() = Some(handle.clone());

    // All frames arrive in one read; only the first may be dispatched
    tx.send(Ok(SAMPLE_RESPONSE.as_bytes().to_vec())).await.unwrap();
    drop(tx);
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["text:Hi"]);
}

#[tokio::test]
async fn test_abort_after_finish_is_noop() {
    let recorder = Recorder::new();
    let handle = coordinator().consume(chunks(&[SAMPLE_RESPONSE.as_bytes()]), recorder.handlers());
    handle.finished().await;
    assert!(handle.is_finished());

    handle.abort();

    assert_eq!(recorder.calls(), vec!["text:Hi", "audio:QUJD@24000", "complete:1"]);
}

#[tokio::test]
async fn test_http_stream_posts_message_and_dispatches() {
    let server = sse_server(
        vec![
            "event: text\ndata: {\"text\":\"Hi\"}\n\n".to_string(),
            "event: audio\ndata: {\"audio\":\"QUJD\",\"sample_rate\":24000}\n\n".to_string(),
            "event: done\ndata: {\"audio_count\":1}\n\n".to_string(),
        ],
        StatusCode::OK,
        false,
    )
    .await;
    let coordinator = StreamCoordinator::new(&server.config).unwrap();
    assert!(coordinator.url().ends_with("/api/chat/stream"));

    let recorder = Recorder::new();
    let handle = coordinator.open("Hello there", recorder.handlers());
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["text:Hi", "audio:QUJD@24000", "complete:1"]);
    assert_eq!(
        server.requests(),
        vec![serde_json::json!({ "message": "Hello there" })]
    );
}

#[tokio::test]
async fn test_http_error_status_reports_code() {
    let server = sse_server(vec![], StatusCode::INTERNAL_SERVER_ERROR, false).await;
    let coordinator = StreamCoordinator::new(&server.config).unwrap();

    let recorder = Recorder::new();
    coordinator.open("Hello", recorder.handlers()).finished().await;

    assert_eq!(recorder.calls(), vec!["error:HTTP error! status: 500"]);
}

#[tokio::test]
async fn test_connection_refused_reports_error() {
    let coordinator = StreamCoordinator::new(&refused_config().await).unwrap();

    let recorder = Recorder::new();
    coordinator.open("Hello", recorder.handlers()).finished().await;

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("error:"));
    assert!(calls[0].len() > "error:".len());
}

#[tokio::test]
async fn test_http_abort_is_silent() {
    let server = sse_server(
        vec!["event: text\ndata: {\"text\":\"thinking\"}\n\n".to_string()],
        StatusCode::OK,
        true,
    )
    .await;
    let coordinator = StreamCoordinator::new(&server.config).unwrap();

    let recorder = Recorder::new();
    let handle = coordinator.open("Hello", recorder.handlers());
    wait_until(|| recorder.len() == 1).await;
    assert!(!handle.is_finished());

    handle.abort();
    handle.finished().await;

    assert_eq!(recorder.calls(), vec!["text:thinking"]);
}

#[tokio::test]
async fn test_open_returns_before_response() {
    let server = sse_server(vec![], StatusCode::OK, true).await;
    let coordinator = StreamCoordinator::new(&server.config).unwrap();

    let recorder = Recorder::new();
    let handle = coordinator.open("Hello", recorder.handlers());

    assert!(!handle.is_finished());
    assert!(recorder.calls().is_empty());
    handle.abort();
    handle.finished().await;
    assert!(recorder.calls().is_empty());
}

//! Session loop integration tests
//!
//! Each test runs a real session against a loopback websocket endpoint,
//! with the microphone and speaker replaced by in-memory fakes. The session
//! future and the test driver run under one `join` so the loop makes
//! progress while the driver scripts the endpoint side.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use futures::future;
use futures::{SinkExt, StreamExt};
use lyra_voice::audio::pcm;
use lyra_voice::audio::playback::DoneCallback;
use lyra_voice::{
    AudioSink, ConversationState, MicSource, Notification, Origin, Result, Session, SessionHandle,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct MicState {
    frames: Option<mpsc::Sender<Vec<f32>>>,
    started: usize,
    stopped: usize,
}

/// Microphone fake that records lifecycle calls and hands out the frame
/// sender so tests can inject capture audio
#[derive(Clone, Default)]
struct FakeMic(Arc<Mutex<MicState>>);

impl FakeMic {
    fn frames(&self) -> mpsc::Sender<Vec<f32>> {
        self.0
            .lock()
            .unwrap()
            .frames
            .clone()
            .expect("capture not started")
    }

    fn started(&self) -> usize {
        self.0.lock().unwrap().started
    }

    fn stopped(&self) -> usize {
        self.0.lock().unwrap().stopped
    }
}

impl MicSource for FakeMic {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.frames = Some(frames);
        state.started += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.frames = None;
        state.stopped += 1;
    }

    fn is_capturing(&self) -> bool {
        self.0.lock().unwrap().frames.is_some()
    }
}

#[derive(Default)]
struct SinkState {
    played: Vec<Vec<f32>>,
    pending_done: Vec<DoneCallback>,
    stops: usize,
}

/// Speaker fake that holds completion callbacks until the test fires them
#[derive(Clone, Default)]
struct FakeSink(Arc<Mutex<SinkState>>);

impl FakeSink {
    /// Fire the completion callback of the oldest unfinished clip
    fn finish_one(&self) {
        let done = self.0.lock().unwrap().pending_done.remove(0);
        done();
    }

    fn played(&self) -> Vec<Vec<f32>> {
        self.0.lock().unwrap().played.clone()
    }

    fn pending(&self) -> usize {
        self.0.lock().unwrap().pending_done.len()
    }

    fn stops(&self) -> usize {
        self.0.lock().unwrap().stops
    }
}

impl AudioSink for FakeSink {
    fn play(&mut self, samples: Vec<f32>, on_done: DoneCallback) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.played.push(samples);
        state.pending_done.push(on_done);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.stops += 1;
        state.pending_done.clear();
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

fn harness(
    url: &str,
) -> (
    Session,
    SessionHandle,
    mpsc::UnboundedReceiver<Notification>,
    FakeMic,
    FakeSink,
) {
    let mic = FakeMic::default();
    let sink = FakeSink::default();
    let (session, handle, notifications) = Session::with_io(
        common::test_config(url),
        Box::new(mic.clone()),
        Box::new(sink.clone()),
    );
    (session, handle, notifications, mic, sink)
}

async fn expect_state(
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    expected: ConversationState,
) {
    match notifications.recv().await {
        Some(Notification::StateChanged(state)) if state == expected => {}
        other => panic!("expected transition to {expected}, got {other:?}"),
    }
}

#[tokio::test]
async fn start_reaches_listening_when_the_endpoint_opens() {
    let (url, accept) = common::loopback_endpoint().await;
    let (session, handle, mut notifications, mic, _sink) = harness(&url);

    let driver = {
        let mic = mic.clone();
        async move {
            handle.start().await.expect("start command");
            expect_state(&mut notifications, ConversationState::Processing).await;

            let mut server = accept.await.expect("accept task");
            let setup = server.next().await.expect("setup frame").expect("readable setup");
            assert!(setup.to_text().expect("text frame").contains("\"type\":\"setup\""));

            expect_state(&mut notifications, ConversationState::Listening).await;
            assert!(mic.is_capturing());

            drop(handle);
            server
        }
    };

    let (run_result, _server) = timeout(Duration::from_secs(10), future::join(session.run(), driver))
        .await
        .expect("test timed out");
    run_result.expect("session loop");

    assert_eq!(mic.started(), 1);
    assert_eq!(mic.stopped(), 1);
    assert!(!mic.is_capturing());
}

#[tokio::test]
async fn inbound_audio_plays_through_speaking_and_back_to_listening() {
    let (url, accept) = common::loopback_endpoint().await;
    let (session, handle, mut notifications, _mic, sink) = harness(&url);
    let wire: Vec<i16> = vec![8192; 240];

    let driver = {
        let sink = sink.clone();
        let wire = wire.clone();
        async move {
            handle.start().await.expect("start command");
            expect_state(&mut notifications, ConversationState::Processing).await;
            let mut server = accept.await.expect("accept task");
            server.next().await.expect("setup frame").expect("readable setup");
            expect_state(&mut notifications, ConversationState::Listening).await;

            server
                .send(Message::text(common::audio_frame(&wire, 24_000)))
                .await
                .expect("send audio frame");
            expect_state(&mut notifications, ConversationState::Speaking).await;

            sink.finish_one();
            expect_state(&mut notifications, ConversationState::Listening).await;

            drop(handle);
            server
        }
    };

    let (run_result, _server) = timeout(Duration::from_secs(10), future::join(session.run(), driver))
        .await
        .expect("test timed out");
    run_result.expect("session loop");

    let played = sink.played();
    assert_eq!(played.len(), 1);
    assert_eq!(pcm::encode(&played[0]), wire);
}

#[tokio::test]
async fn stop_while_speaking_tears_everything_down() {
    let (url, accept) = common::loopback_endpoint().await;
    let (session, handle, mut notifications, mic, sink) = harness(&url);

    let driver = async move {
        handle.start().await.expect("start command");
        expect_state(&mut notifications, ConversationState::Processing).await;
        let mut server = accept.await.expect("accept task");
        server.next().await.expect("setup frame").expect("readable setup");
        expect_state(&mut notifications, ConversationState::Listening).await;

        // First clip starts playing, second waits behind it
        server
            .send(Message::text(common::audio_frame(&[8192; 240], 24_000)))
            .await
            .expect("send first clip");
        server
            .send(Message::text(common::audio_frame(&[4096; 120], 24_000)))
            .await
            .expect("send second clip");
        expect_state(&mut notifications, ConversationState::Speaking).await;

        handle.stop().await.expect("stop command");
        expect_state(&mut notifications, ConversationState::Idle).await;

        drop(handle);
        server
    };

    let (run_result, mut server) = timeout(Duration::from_secs(10), future::join(session.run(), driver))
        .await
        .expect("test timed out");
    run_result.expect("session loop");

    assert_eq!(mic.stopped(), 1);
    assert!(!mic.is_capturing());
    assert_eq!(sink.played().len(), 1, "second clip never reached the sink");
    assert_eq!(sink.pending(), 0, "stop discards the completion callback");
    assert_eq!(sink.stops(), 1);

    let goodbye = timeout(Duration::from_secs(5), server.next())
        .await
        .expect("goodbye after stop");
    assert!(matches!(goodbye, None | Some(Ok(Message::Close(_)))));
}

#[tokio::test]
async fn turn_complete_keeps_listening_when_nothing_is_queued() {
    let (url, accept) = common::loopback_endpoint().await;
    let (session, handle, mut notifications, _mic, _sink) = harness(&url);

    let driver = async move {
        handle.start().await.expect("start command");
        expect_state(&mut notifications, ConversationState::Processing).await;
        let mut server = accept.await.expect("accept task");
        server.next().await.expect("setup frame").expect("readable setup");
        expect_state(&mut notifications, ConversationState::Listening).await;

        server
            .send(Message::text(r#"{"type":"turn_complete"}"#))
            .await
            .expect("send turn marker");
        server
            .send(Message::text(
                r#"{"type":"transcript","role":"assistant","text":"ping"}"#,
            ))
            .await
            .expect("send transcript");

        // The transcript lands with no state change in between
        match notifications.recv().await {
            Some(Notification::Message(entry)) => {
                assert_eq!(entry.origin, Origin::Assistant);
                assert_eq!(entry.text, "ping");
            }
            other => panic!("expected transcript message, got {other:?}"),
        }

        drop(handle);
        server
    };

    let (run_result, _server) = timeout(Duration::from_secs(10), future::join(session.run(), driver))
        .await
        .expect("test timed out");
    run_result.expect("session loop");
}

#[tokio::test]
async fn captured_frames_stream_to_the_endpoint_as_pcm() {
    let (url, accept) = common::loopback_endpoint().await;
    let (session, handle, mut notifications, mic, _sink) = harness(&url);

    let driver = {
        let mic = mic.clone();
        async move {
            handle.start().await.expect("start command");
            expect_state(&mut notifications, ConversationState::Processing).await;
            let mut server = accept.await.expect("accept task");
            server.next().await.expect("setup frame").expect("readable setup");
            expect_state(&mut notifications, ConversationState::Listening).await;

            mic.frames()
                .send(vec![0.25; 4096])
                .await
                .expect("frame delivery");

            let message = server.next().await.expect("audio frame").expect("readable audio");
            let value: serde_json::Value =
                serde_json::from_str(message.to_text().expect("text frame")).expect("json frame");
            assert_eq!(value["type"], "audio");
            assert_eq!(value["mime_type"], "audio/pcm;rate=16000");

            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value["data"].as_str().expect("base64 payload"))
                .expect("valid base64");
            let samples = pcm::bytes_to_samples(&bytes).expect("even payload");
            assert_eq!(samples.len(), 4096);
            assert!(samples.iter().all(|&s| s == 8192));

            drop(handle);
            server
        }
    };

    let (run_result, _server) = timeout(Duration::from_secs(10), future::join(session.run(), driver))
        .await
        .expect("test timed out");
    run_result.expect("session loop");
}

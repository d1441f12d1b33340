//! End-to-end controller tests against a simulated device: the real `SerialLink`
//! reader/writer wired to one half of a `tokio::io::duplex` pair, with the other
//! half played by the test acting as the microcontroller. No hardware, no mocks
//! of the controller itself — only the collaborator adapters are stubbed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};

use voxbridge::config::SessionConfig;
use voxbridge::controller::Controller;
use voxbridge::event::Event;
use voxbridge::mic_ingest::{self, RollingBuffer};
use voxbridge::protocol;
use voxbridge::segmenter::{SegmenterConfig, SAMPLE_RATE_HZ, SUB_FRAME_SAMPLES};
use voxbridge::serial_link::SerialLink;
use voxbridge::stages::{Recognizer, Rewriter, SynthesisChunk, SynthesisStream, Synthesizer};
use voxbridge::telemetry::TelemetrySink;

struct EchoRecognizer;

#[async_trait]
impl Recognizer for EchoRecognizer {
    async fn recognize(&self, pcm: &[i16], _sample_rate: u32) -> anyhow::Result<String> {
        Ok(format!("heard {} samples", pcm.len()))
    }
}

struct EmptyRecognizer;

#[async_trait]
impl Recognizer for EmptyRecognizer {
    async fn recognize(&self, _pcm: &[i16], _sample_rate: u32) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

struct HangingRecognizer;

#[async_trait]
impl Recognizer for HangingRecognizer {
    async fn recognize(&self, _pcm: &[i16], _sample_rate: u32) -> anyhow::Result<String> {
        std::future::pending().await
    }
}

struct UppercaseRewriter;

#[async_trait]
impl Rewriter for UppercaseRewriter {
    async fn rewrite(&self, text: &str) -> anyhow::Result<String> {
        Ok(text.to_uppercase())
    }
}

struct SingleChunkStream {
    chunk: Option<SynthesisChunk>,
}

#[async_trait]
impl SynthesisStream for SingleChunkStream {
    async fn next_chunk(&mut self) -> anyhow::Result<Option<SynthesisChunk>> {
        Ok(self.chunk.take())
    }
}

struct ToneSynthesizer;

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(&self, _text: &str) -> anyhow::Result<Box<dyn SynthesisStream>> {
        let samples: Vec<i16> = (0..400).map(|i| ((i % 64) * 100) as i16).collect();
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(Box::new(SingleChunkStream {
            chunk: Some(SynthesisChunk {
                bytes,
                sample_rate: SAMPLE_RATE_HZ,
                bits: 16,
                channels: 1,
            }),
        }))
    }
}

fn unique_log_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("voxbridge-test-{}-{}.jsonl", std::process::id(), n))
}

fn base_config(
    log_path: PathBuf,
    recognizer: Arc<dyn Recognizer>,
    rewriter: Arc<dyn Rewriter>,
    synthesizer: Arc<dyn Synthesizer>,
) -> SessionConfig {
    let mut config = SessionConfig::new("unused-in-tests", recognizer, rewriter, synthesizer, log_path);
    config.capture_watchdog = Duration::from_secs(5);
    config.playback_guard_delay = Duration::from_millis(10);
    config.watchdogs.recognizer = Duration::from_secs(2);
    config.watchdogs.rewriter = Duration::from_secs(2);
    config.watchdogs.synthesis_first_chunk = Duration::from_secs(2);
    config.watchdogs.playback = Duration::from_secs(5);
    config.max_cycles = Some(1);
    config
}

struct Harness {
    device: DuplexStream,
    inbox: Vec<u8>,
    controller_task: tokio::task::JoinHandle<()>,
    reader_task: tokio::task::JoinHandle<()>,
    ingest_task: tokio::task::JoinHandle<()>,
    log_path: PathBuf,
}

async fn start_session(config: SessionConfig) -> Harness {
    let (device_side, host_side) = tokio::io::duplex(1 << 20);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let (link, reader_task) = SerialLink::from_io(host_side, event_tx.clone(), frame_tx);
    let writer = link.writer_handle();

    let buffer = Arc::new(Mutex::new(RollingBuffer::new(32 * SAMPLE_RATE_HZ as usize)));
    let ingest_task = tokio::spawn(mic_ingest::run_mic_ingest(
        buffer.clone(),
        config.segmenter.clone(),
        frame_rx,
        event_tx.clone(),
    ));

    let log_path = config.log_path.clone();
    let telemetry = TelemetrySink::open(&log_path).await.unwrap();
    let controller = Controller::new("test-session".to_string(), config, event_rx, writer, buffer, telemetry);
    let controller_task = tokio::spawn(controller.run());

    Harness {
        device: device_side,
        inbox: Vec::new(),
        controller_task,
        reader_task,
        ingest_task,
        log_path,
    }
}

impl Harness {
    async fn fill_more(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.device.read(&mut chunk).await.expect("device read");
        assert!(n > 0, "device stream closed unexpectedly");
        self.inbox.extend_from_slice(&chunk[..n]);
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.inbox.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.inbox.drain(..=pos).collect();
                return String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
            }
            self.fill_more().await;
        }
    }

    async fn read_exact_bytes(&mut self, n: usize) -> Vec<u8> {
        while self.inbox.len() < n {
            self.fill_more().await;
        }
        self.inbox.drain(..n).collect()
    }

    async fn send_line(&mut self, line: &str) {
        self.device.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_audio_frame(&mut self, payload: &[u8]) {
        let header = protocol::encode_audio_header(payload.len() as u32);
        self.device.write_all(&header).await.unwrap();
        self.device.write_all(payload).await.unwrap();
    }

    /// Reads and asserts the `START <rate> <ch> <bits> <count>` line, then
    /// consumes exactly that many PCM bytes plus the trailing `END` line.
    async fn expect_playback_job(&mut self) {
        let start = self.read_line().await;
        let fields: Vec<&str> = start.split_whitespace().collect();
        assert_eq!(fields[0], "START", "expected START line, got {start:?}");
        let sample_count: u32 = fields[4].parse().expect("sample count");
        let _payload = self.read_exact_bytes(sample_count as usize * 2).await;
        let end = self.read_line().await;
        assert_eq!(end, "END");
    }

    async fn shutdown(mut self) {
        self.reader_task.abort();
        self.ingest_task.abort();
        let _ = self.controller_task.await;
        let _ = tokio::fs::remove_file(&self.log_path).await;
    }
}

fn silence_payload(samples: usize) -> Vec<u8> {
    vec![0u8; samples * 2]
}

fn tone_payload(samples: usize, amplitude: i16) -> Vec<u8> {
    (0..samples)
        .map(|i| {
            let phase = (i as f64) * 2.0 * std::f64::consts::PI * 440.0 / SAMPLE_RATE_HZ as f64;
            (phase.sin() * amplitude as f64) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

async fn send_one_utterance(harness: &mut Harness) {
    harness.send_audio_frame(&silence_payload(SUB_FRAME_SAMPLES * 5)).await;
    harness.send_audio_frame(&tone_payload(SUB_FRAME_SAMPLES * 100, 8000)).await;
    harness.send_audio_frame(&silence_payload(SUB_FRAME_SAMPLES * 30)).await;
}

#[tokio::test]
async fn happy_path_cycle_plays_back_and_returns_to_idle() {
    let config = base_config(
        unique_log_path(),
        Arc::new(EchoRecognizer),
        Arc::new(UppercaseRewriter),
        Arc::new(ToneSynthesizer),
    );
    let mut harness = start_session(config).await;

    harness.send_line("READY\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    send_one_utterance(&mut harness).await;

    assert_eq!(harness.read_line().await, "PAUSE");
    harness.expect_playback_job().await;

    harness.send_line("PLAYBACK_DONE\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    tokio::time::timeout(Duration::from_secs(5), &mut harness.controller_task)
        .await
        .expect("controller should finish after max_cycles")
        .unwrap();

    harness.shutdown().await;
}

#[tokio::test]
async fn empty_transcript_short_circuits_without_synthesis() {
    let config = base_config(
        unique_log_path(),
        Arc::new(EmptyRecognizer),
        Arc::new(UppercaseRewriter),
        Arc::new(ToneSynthesizer),
    );
    let mut harness = start_session(config).await;

    harness.send_line("READY\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    send_one_utterance(&mut harness).await;

    // An empty transcript skips straight to cleanup: the very next line the
    // device sees is another RESUME, never a PAUSE/START playback job.
    assert_eq!(harness.read_line().await, "RESUME");

    tokio::time::timeout(Duration::from_secs(5), &mut harness.controller_task)
        .await
        .expect("controller should finish after max_cycles")
        .unwrap();

    harness.shutdown().await;
}

#[tokio::test]
async fn recognizer_timeout_enters_error_timeout_and_recovers() {
    let mut config = base_config(
        unique_log_path(),
        Arc::new(HangingRecognizer),
        Arc::new(UppercaseRewriter),
        Arc::new(ToneSynthesizer),
    );
    config.watchdogs.recognizer = Duration::from_millis(30);
    let mut harness = start_session(config).await;

    harness.send_line("READY\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    send_one_utterance(&mut harness).await;

    // A recognizer timeout routes through error-timeout recovery: PAUSE,
    // END (best-effort release, even though nothing was ever buffered for
    // playback), then RESUME once the guard delay elapses.
    assert_eq!(harness.read_line().await, "PAUSE");
    assert_eq!(harness.read_line().await, "END");
    assert_eq!(harness.read_line().await, "RESUME");

    tokio::time::timeout(Duration::from_secs(5), &mut harness.controller_task)
        .await
        .expect("controller should finish after max_cycles")
        .unwrap();

    let log = tokio::fs::read_to_string(&harness.log_path).await.unwrap();
    assert!(log.contains("recognizer_timed_out"), "log was: {log}");

    harness.shutdown().await;
}

#[tokio::test]
async fn presence_gating_suppresses_capture_until_presence_on() {
    let mut config = base_config(
        unique_log_path(),
        Arc::new(EchoRecognizer),
        Arc::new(UppercaseRewriter),
        Arc::new(ToneSynthesizer),
    );
    config.gate_on_presence = true;
    let mut harness = start_session(config).await;

    harness.send_line("READY\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    harness.send_line("PRESENCE OFF\n").await;
    send_one_utterance(&mut harness).await;

    // Gated: nothing should arrive on the device's inbound side for a
    // while, since the segment start is silently dropped.
    let gated = tokio::time::timeout(Duration::from_millis(300), harness.read_line()).await;
    assert!(gated.is_err(), "expected no device output while gated, got a line instead");

    harness.send_line("PRESENCE ON\n").await;
    send_one_utterance(&mut harness).await;

    assert_eq!(harness.read_line().await, "PAUSE");
    harness.expect_playback_job().await;
    harness.send_line("PLAYBACK_DONE\n").await;
    assert_eq!(harness.read_line().await, "RESUME");

    tokio::time::timeout(Duration::from_secs(5), &mut harness.controller_task)
        .await
        .expect("controller should finish after max_cycles")
        .unwrap();

    harness.shutdown().await;
}

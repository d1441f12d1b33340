//! Manual driver for a single voxbridge session against a real serial
//! device, using minimal stand-in collaborators. The recognizer, rewriter,
//! and synthesizer are out of scope for the core; this binary wires in
//! placeholder adapters so the controller can be exercised end-to-end
//! against real device hardware.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use voxbridge::config::SessionConfig;
use voxbridge::session::Session;
use voxbridge::stages::{Recognizer, Rewriter, SynthesisChunk, SynthesisStream, Synthesizer};

struct Args {
    device: String,
    log_path: PathBuf,
    max_cycles: Option<u64>,
}

fn parse_args() -> Args {
    let raw: Vec<String> = std::env::args().collect();
    let mut result = Args {
        device: "/dev/ttyACM0".to_string(),
        log_path: PathBuf::from("session.log.jsonl"),
        max_cycles: None,
    };

    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--device" if i + 1 < raw.len() => {
                result.device = raw[i + 1].clone();
                i += 2;
            }
            "--log" if i + 1 < raw.len() => {
                result.log_path = PathBuf::from(&raw[i + 1]);
                i += 2;
            }
            "--max-cycles" if i + 1 < raw.len() => {
                result.max_cycles = raw[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => i += 1,
        }
    }

    result
}

fn print_usage() {
    println!("voxbridge demo session driver");
    println!();
    println!("Usage: demo-session [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --device <path>       Serial device path (default: /dev/ttyACM0)");
    println!("  --log <path>          Transition log path (default: session.log.jsonl)");
    println!("  --max-cycles <n>      Stop after n cycles (default: unbounded)");
}

/// Stand-in recognizer that reports the sample count it was handed; real
/// deployments replace this with a speech-recognition client.
struct PlaceholderRecognizer;

#[async_trait]
impl Recognizer for PlaceholderRecognizer {
    async fn recognize(&self, pcm: &[i16], sample_rate: u32) -> anyhow::Result<String> {
        Ok(format!("[{} samples at {}Hz]", pcm.len(), sample_rate))
    }
}

/// Stand-in rewriter that passes the transcript through unchanged; real
/// deployments replace this with a language-model client.
struct PlaceholderRewriter;

#[async_trait]
impl Rewriter for PlaceholderRewriter {
    async fn rewrite(&self, text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }
}

/// Stand-in synthesizer emitting a short fixed-tone reply so the playback
/// path can be exercised without a text-to-speech backend.
struct PlaceholderSynthesizer;

struct ToneStream {
    remaining_chunks: u32,
}

#[async_trait]
impl SynthesisStream for ToneStream {
    async fn next_chunk(&mut self) -> anyhow::Result<Option<SynthesisChunk>> {
        if self.remaining_chunks == 0 {
            return Ok(None);
        }
        self.remaining_chunks -= 1;
        let samples: Vec<i16> = (0..2_205)
            .map(|i| {
                let phase = (i as f64) * 2.0 * std::f64::consts::PI * 440.0 / 22_050.0;
                (phase.sin() * 8000.0) as i16
            })
            .collect();
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(Some(SynthesisChunk {
            bytes,
            sample_rate: 22_050,
            bits: 16,
            channels: 1,
        }))
    }
}

#[async_trait]
impl Synthesizer for PlaceholderSynthesizer {
    async fn synthesize(&self, _text: &str) -> anyhow::Result<Box<dyn SynthesisStream>> {
        Ok(Box::new(ToneStream { remaining_chunks: 3 }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args();

    let mut config = SessionConfig::new(
        &args.device,
        Arc::new(PlaceholderRecognizer),
        Arc::new(PlaceholderRewriter),
        Arc::new(PlaceholderSynthesizer),
        args.log_path,
    );
    config.max_cycles = args.max_cycles;
    config.capture_watchdog = Duration::from_secs(30);

    let session = Session::new(config);
    tracing::info!(session = session.id(), device = %args.device, "starting session");
    session.run().await
}

//! Pipeline Stages: thin watchdogged adapters over the external
//! recognition/rewrite/synthesis collaborators. Stages run sequentially;
//! only one is active per cycle.

use std::time::Duration;

use async_trait::async_trait;

/// A single chunk of a lazily-produced synthesis stream.
#[derive(Debug, Clone)]
pub struct SynthesisChunk {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub bits: u8,
    pub channels: u8,
}

/// A lazy finite sequence of synthesis chunks. Implementors signal
/// end-of-stream by returning `Ok(None)`.
#[async_trait]
pub trait SynthesisStream: Send {
    async fn next_chunk(&mut self) -> anyhow::Result<Option<SynthesisChunk>>;
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, pcm: &[i16], sample_rate: u32) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, text: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Box<dyn SynthesisStream>>;
}

pub struct StageWatchdogs {
    pub recognizer: Duration,
    pub rewriter: Duration,
    pub synthesis_first_chunk: Duration,
    pub playback: Duration,
}

impl Default for StageWatchdogs {
    fn default() -> Self {
        Self {
            recognizer: Duration::from_secs(15),
            rewriter: Duration::from_secs(20),
            synthesis_first_chunk: Duration::from_secs(5),
            playback: Duration::from_secs(20),
        }
    }
}

pub async fn recognize_with_watchdog(
    recognizer: &dyn Recognizer,
    pcm: &[i16],
    sample_rate: u32,
    watchdog: Duration,
) -> crate::error::Result<String> {
    match tokio::time::timeout(watchdog, recognizer.recognize(pcm, sample_rate)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(crate::error::VoxError::RecognizerFailed(e)),
        Err(_) => Err(crate::error::VoxError::RecognizerTimedOut {
            elapsed_ms: watchdog.as_millis() as u64,
        }),
    }
}

pub async fn rewrite_with_watchdog(
    rewriter: &dyn Rewriter,
    text: &str,
    watchdog: Duration,
) -> crate::error::Result<String> {
    if text.is_empty() {
        return Ok(String::new());
    }
    match tokio::time::timeout(watchdog, rewriter.rewrite(text)).await {
        Ok(Ok(rewritten)) => Ok(rewritten),
        Ok(Err(e)) => Err(crate::error::VoxError::RewriterFailed(e)),
        Err(_) => Err(crate::error::VoxError::RewriterTimedOut {
            elapsed_ms: watchdog.as_millis() as u64,
        }),
    }
}

/// Start synthesis and wait for the first chunk under its own watchdog.
/// Returns the opened stream plus the first chunk, so the playback pump can
/// derive the wire format without re-fetching it.
pub async fn synthesize_first_chunk(
    synthesizer: &dyn Synthesizer,
    text: &str,
    watchdog: Duration,
) -> crate::error::Result<(Box<dyn SynthesisStream>, SynthesisChunk)> {
    let mut stream = synthesizer
        .synthesize(text)
        .await
        .map_err(crate::error::VoxError::SynthesisInterrupted)?;

    let first = tokio::time::timeout(watchdog, stream.next_chunk()).await;
    match first {
        Ok(Ok(Some(chunk))) => Ok((stream, chunk)),
        Ok(Ok(None)) => Err(crate::error::VoxError::SynthesisInterrupted(anyhow::anyhow!(
            "synthesis stream ended before any chunk"
        ))),
        Ok(Err(e)) => Err(crate::error::VoxError::SynthesisInterrupted(e)),
        Err(_) => Err(crate::error::VoxError::SynthesisFirstChunkTimedOut {
            elapsed_ms: watchdog.as_millis() as u64,
        }),
    }
}

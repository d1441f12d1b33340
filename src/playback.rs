//! Playback Pump: streams a SynthesisStream to the device. Completion
//! detection (waiting for the device's `PLAYBACK_DONE` line) happens in the
//! Session Controller, since that wait is itself just one more event on the
//! controller's single-consumer queue.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Result, VoxError};
use crate::protocol::{self, start_line};
use crate::serial_link::{self, LinkWriter};
use crate::stages::{SynthesisChunk, SynthesisStream};

pub struct BufferedPlayback {
    pub payload: Vec<u8>,
    pub sample_rate: u32,
}

/// Buffer the entire lazy synthesis stream, since the total sample count
/// isn't known from the first chunk alone and the wire protocol's `START`
/// line needs it up front. A known-total streaming mode is allowed by the
/// contract but not required.
pub async fn buffer_stream(
    mut stream: Box<dyn SynthesisStream>,
    first_chunk: SynthesisChunk,
) -> Result<BufferedPlayback> {
    if first_chunk.channels != 1 {
        return Err(VoxError::SynthesisInterrupted(anyhow::anyhow!(
            "synthesis stream is not mono (channels={})",
            first_chunk.channels
        )));
    }
    if first_chunk.bits != 16 {
        return Err(VoxError::SynthesisInterrupted(anyhow::anyhow!(
            "synthesis stream is not 16-bit (bits={})",
            first_chunk.bits
        )));
    }

    let sample_rate = first_chunk.sample_rate;
    let mut payload = first_chunk.bytes;

    loop {
        match stream.next_chunk().await {
            Ok(Some(chunk)) => {
                if chunk.sample_rate != sample_rate || chunk.bits != 16 || chunk.channels != 1 {
                    return Err(VoxError::SynthesisInterrupted(anyhow::anyhow!(
                        "synthesis stream changed format mid-stream"
                    )));
                }
                payload.extend_from_slice(&chunk.bytes);
            }
            Ok(None) => break,
            Err(e) => return Err(VoxError::SynthesisInterrupted(e)),
        }
    }

    Ok(BufferedPlayback { payload, sample_rate })
}

/// Send `PAUSE`, `START <fmt>`, the paced PCM payload, and `END` while
/// holding the writer for the whole job so nothing else can interleave.
pub async fn send_playback_job(writer: &Arc<Mutex<LinkWriter>>, job: &BufferedPlayback) -> Result<()> {
    let sample_count = (job.payload.len() / 2) as u32;
    let mut w = writer.lock().await;
    w.write_str(protocol::PAUSE_LINE).await.map_err(VoxError::WriteFailed)?;
    w.write_str(&start_line(job.sample_rate, 1, 16, sample_count))
        .await
        .map_err(VoxError::WriteFailed)?;
    serial_link::write_paced(&mut w, &job.payload)
        .await
        .map_err(VoxError::WriteFailed)?;
    w.write_str(protocol::END_LINE).await.map_err(VoxError::WriteFailed)?;
    Ok(())
}

/// Emit `END\n` best-effort, ignoring write failures, for abandonment paths
/// where a stage already failed and release is all that's left to do.
pub async fn best_effort_end(writer: &Arc<Mutex<LinkWriter>>) {
    let mut w = writer.lock().await;
    let _ = w.write_str(protocol::END_LINE).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedStream {
        chunks: Vec<SynthesisChunk>,
        idx: usize,
    }

    #[async_trait]
    impl SynthesisStream for FixedStream {
        async fn next_chunk(&mut self) -> anyhow::Result<Option<SynthesisChunk>> {
            if self.idx >= self.chunks.len() {
                return Ok(None);
            }
            let c = self.chunks[self.idx].clone();
            self.idx += 1;
            Ok(Some(c))
        }
    }

    #[tokio::test]
    async fn buffers_all_chunks_in_order() {
        let first = SynthesisChunk {
            bytes: vec![1, 2, 3, 4],
            sample_rate: 22_050,
            bits: 16,
            channels: 1,
        };
        let rest = FixedStream {
            chunks: vec![SynthesisChunk {
                bytes: vec![5, 6],
                sample_rate: 22_050,
                bits: 16,
                channels: 1,
            }],
            idx: 0,
        };
        let buffered = buffer_stream(Box::new(rest), first).await.unwrap();
        assert_eq!(buffered.payload, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buffered.sample_rate, 22_050);
    }

    #[tokio::test]
    async fn rejects_stereo_first_chunk() {
        let first = SynthesisChunk {
            bytes: vec![1, 2],
            sample_rate: 22_050,
            bits: 16,
            channels: 2,
        };
        let rest = FixedStream { chunks: vec![], idx: 0 };
        let err = buffer_stream(Box::new(rest), first).await.unwrap_err();
        assert!(matches!(err, VoxError::SynthesisInterrupted(_)));
    }
}

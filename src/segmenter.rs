//! Segmenter: a voice-activity detector over fixed-duration sub-frames that
//! cuts the continuous mic stream into utterance boundaries, with hangover,
//! minimum-duration, and minimum-energy policies.
//!
//! Voiced/unvoiced classification is a simple RMS-energy threshold per
//! sub-frame, in the vein of `calculate_rms` style energy gating rather than
//! a dedicated VAD codec — the pack carries no VAD crate, so this builds the
//! same technique the corpus already uses for audio-presence detection.

use crate::mic_ingest::RollingBuffer;

pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const SUB_FRAME_MS: u32 = 20;
pub const SUB_FRAME_SAMPLES: usize = (SAMPLE_RATE_HZ as usize * SUB_FRAME_MS as usize) / 1000; // 320

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Silence,
    Voiced,
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// VAD aggressiveness, 0 (least aggressive) to 3 (most aggressive);
    /// scales the RMS threshold.
    pub aggressiveness: u8,
    pub start_trigger_frames: u32,
    pub stop_trigger_frames: u32,
    pub pre_roll_ms: u32,
    pub post_roll_ms: u32,
    pub min_gap_ms: u32,
    pub min_segment_duration_ms: u32,
    pub min_segment_mean_abs: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 1,
            start_trigger_frames: 3,
            stop_trigger_frames: 20,
            pre_roll_ms: 200,
            post_roll_ms: 200,
            min_gap_ms: 60,
            min_segment_duration_ms: 200,
            min_segment_mean_abs: 150.0,
        }
    }
}

impl SegmenterConfig {
    fn rms_threshold(&self) -> f64 {
        // Higher aggressiveness requires louder sub-frames to count as
        // voiced, mirroring webrtc-vad's aggressiveness knob.
        match self.aggressiveness {
            0 => 250.0,
            1 => 400.0,
            2 => 650.0,
            _ => 900.0,
        }
    }

    fn pre_roll_samples(&self) -> u64 {
        (self.pre_roll_ms as u64 * SAMPLE_RATE_HZ as u64) / 1000
    }

    fn post_roll_samples(&self) -> u64 {
        (self.post_roll_ms as u64 * SAMPLE_RATE_HZ as u64) / 1000
    }

    fn min_gap_samples(&self) -> u64 {
        (self.min_gap_ms as u64 * SAMPLE_RATE_HZ as u64) / 1000
    }

    fn min_segment_duration_samples(&self) -> u64 {
        (self.min_segment_duration_ms as u64 * SAMPLE_RATE_HZ as u64) / 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start_index: u64,
    pub end_index: u64,
}

impl Segment {
    pub fn duration_samples(&self) -> u64 {
        self.end_index - self.start_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterEvent {
    SegmentStart { start_index: u64 },
    SegmentEnd(Segment),
}

/// Incremental VAD segmenter. Fed sub-frame-sized windows of the rolling
/// buffer as new samples arrive; emits start/end events directly in terms of
/// absolute sample indices.
pub struct Segmenter {
    config: SegmenterConfig,
    state: VadState,
    consecutive_voiced: u32,
    consecutive_unvoiced: u32,
    /// Sample index where the current (or most recently closed) voiced run
    /// began, before pre-roll.
    voiced_run_start: Option<u64>,
    /// Pending merge: the end of a just-closed segment, held back in case
    /// the next voiced run starts within `min_gap_samples`.
    pending_close: Option<Segment>,
    /// Sample index at which `pending_close` was staged; once silence has
    /// run `min_gap_samples` past this with no new voiced run, it flushes
    /// unconditionally instead of waiting for the next SegmentStart.
    pending_close_since: Option<u64>,
    next_sub_frame_index: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: VadState::Silence,
            consecutive_voiced: 0,
            consecutive_unvoiced: 0,
            voiced_run_start: None,
            pending_close: None,
            pending_close_since: None,
            next_sub_frame_index: 0,
        }
    }

    /// Advance the segmenter over every complete sub-frame available in
    /// `buffer` since the last call, emitting zero or more events.
    pub fn poll(&mut self, buffer: &RollingBuffer) -> Vec<SegmenterEvent> {
        let mut events = Vec::new();
        loop {
            let frame_end = self.next_sub_frame_index + SUB_FRAME_SAMPLES as u64;
            if frame_end > buffer.highest_index() {
                break;
            }
            let start = self.next_sub_frame_index;
            let mean_abs = buffer.mean_abs(start, frame_end);
            let voiced = mean_abs >= self.config.rms_threshold();
            events.extend(self.classify(voiced, start, frame_end, buffer));
            self.next_sub_frame_index = frame_end;
        }
        events
    }

    fn classify(
        &mut self,
        voiced: bool,
        frame_start: u64,
        frame_end: u64,
        buffer: &RollingBuffer,
    ) -> Vec<SegmenterEvent> {
        let mut events = Vec::new();
        match self.state {
            VadState::Silence => {
                if voiced {
                    self.consecutive_voiced += 1;
                    if self.voiced_run_start.is_none() {
                        self.voiced_run_start = Some(frame_start);
                    }
                    if self.consecutive_voiced >= self.config.start_trigger_frames {
                        self.state = VadState::Voiced;
                        self.consecutive_unvoiced = 0;
                        let raw_start = self.voiced_run_start.unwrap();
                        let pre_roll = self.config.pre_roll_samples();
                        let start_index = raw_start.saturating_sub(pre_roll).max(buffer.base_index());

                        if let Some(pending) = self.pending_close.take() {
                            if start_index.saturating_sub(pending.end_index) < self.config.min_gap_samples() {
                                // Merge: suppress both the prior SegmentEnd and
                                // this SegmentStart; the run continues under
                                // the original start index.
                                self.voiced_run_start = Some(pending.start_index);
                                self.pending_close_since = None;
                                return events;
                            }
                            events.push(SegmenterEvent::SegmentEnd(pending));
                            self.pending_close_since = None;
                        }

                        // The Segment eventually built at the Voiced->Silence
                        // transition uses voiced_run_start as its start_index;
                        // keep it in sync with the pre-roll-adjusted value just
                        // announced, not the raw pre-pre-roll sample index.
                        self.voiced_run_start = Some(start_index);
                        events.push(SegmenterEvent::SegmentStart { start_index });
                    }
                } else {
                    self.consecutive_voiced = 0;
                    self.voiced_run_start = None;
                    if let Some(since) = self.pending_close_since {
                        if frame_start.saturating_sub(since) >= self.config.min_gap_samples() {
                            if let Some(pending) = self.pending_close.take() {
                                events.push(SegmenterEvent::SegmentEnd(pending));
                            }
                            self.pending_close_since = None;
                        }
                    }
                }
            }
            VadState::Voiced => {
                if voiced {
                    self.consecutive_unvoiced = 0;
                } else {
                    self.consecutive_unvoiced += 1;
                    if self.consecutive_unvoiced >= self.config.stop_trigger_frames {
                        self.state = VadState::Silence;
                        self.consecutive_voiced = 0;
                        let last_voiced_end = frame_end
                            - (self.consecutive_unvoiced as u64 * SUB_FRAME_SAMPLES as u64);
                        let post_roll = self.config.post_roll_samples();
                        let end_index = (last_voiced_end + post_roll).min(buffer.highest_index());
                        let start_index = self.voiced_run_start.unwrap_or(last_voiced_end);
                        self.voiced_run_start = None;

                        let seg = Segment {
                            start_index,
                            end_index,
                        };
                        if self.passes_filters(&seg, buffer) {
                            self.pending_close = Some(seg);
                            self.pending_close_since = Some(end_index);
                        }
                    }
                }
            }
        }
        events
    }

    fn passes_filters(&self, seg: &Segment, buffer: &RollingBuffer) -> bool {
        if seg.end_index <= seg.start_index {
            return false;
        }
        if seg.duration_samples() < self.config.min_segment_duration_samples() {
            return false;
        }
        if buffer.mean_abs(seg.start_index, seg.end_index) < self.config.min_segment_mean_abs {
            return false;
        }
        true
    }

    /// Force any segment held back for a potential merge to close. Call
    /// this once no more samples are expected imminently (e.g. at shutdown,
    /// or when the controller has confirmed silence has persisted well past
    /// `min_gap_ms`).
    pub fn flush_pending(&mut self) -> Option<SegmenterEvent> {
        self.pending_close_since = None;
        self.pending_close.take().map(SegmenterEvent::SegmentEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_silence(buffer: &mut RollingBuffer, samples: usize) {
        let frame: Vec<u8> = std::iter::repeat(0i16)
            .take(samples)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        buffer.push_frame(&frame, 0).unwrap();
    }

    fn push_tone(buffer: &mut RollingBuffer, samples: usize, amplitude: i16) {
        let frame: Vec<u8> = (0..samples)
            .map(|i| {
                let phase = (i as f64) * 2.0 * std::f64::consts::PI * 440.0 / SAMPLE_RATE_HZ as f64;
                (phase.sin() * amplitude as f64) as i16
            })
            .flat_map(|s| s.to_le_bytes())
            .collect();
        buffer.push_frame(&frame, 0).unwrap();
    }

    #[test]
    fn short_voiced_burst_is_discarded() {
        let mut buffer = RollingBuffer::new(1 << 20);
        let mut seg = Segmenter::new(SegmenterConfig::default());

        push_silence(&mut buffer, SUB_FRAME_SAMPLES * 5);
        push_tone(&mut buffer, SUB_FRAME_SAMPLES * 2, 8000); // 40ms, below min duration
        push_silence(&mut buffer, SUB_FRAME_SAMPLES * 30);

        let events = seg.poll(&buffer);
        let ends: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SegmenterEvent::SegmentEnd(_)))
            .collect();
        assert!(ends.is_empty(), "sub-threshold segment must be discarded");
    }

    #[test]
    fn sustained_voiced_run_emits_start_and_end() {
        let mut buffer = RollingBuffer::new(1 << 20);
        let mut seg = Segmenter::new(SegmenterConfig::default());

        push_silence(&mut buffer, SUB_FRAME_SAMPLES * 5);
        push_tone(&mut buffer, SUB_FRAME_SAMPLES * 100, 8000); // 2s voiced
        push_silence(&mut buffer, SUB_FRAME_SAMPLES * 30);

        let events = seg.poll(&buffer);
        assert!(events
            .iter()
            .any(|e| matches!(e, SegmenterEvent::SegmentStart { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SegmenterEvent::SegmentEnd(_))));
    }
}

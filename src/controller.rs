//! Session Controller: owns the state machine, the resource ownership
//! ledger, the single-consumer event queue, cross-stage timeouts,
//! cancellation, structured logging, and the cycle counter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::VoxError;
use crate::event::Event;
use crate::ledger::{ResourceLedger, ResourceState};
use crate::mic_ingest::RollingBuffer;
use crate::playback;
use crate::segmenter::Segment;
use crate::serial_link::LinkWriter;
use crate::stages;
use crate::telemetry::{TelemetrySink, TransitionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Capturing,
    Recognizing,
    Rewriting,
    Synthesizing,
    PlayingBack,
    Cleanup,
    ErrorTimeout,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Capturing => "capturing",
            State::Recognizing => "recognizing",
            State::Rewriting => "rewriting",
            State::Synthesizing => "synthesizing",
            State::PlayingBack => "playing_back",
            State::Cleanup => "cleanup",
            State::ErrorTimeout => "error_timeout",
        }
    }
}

pub struct Controller {
    session_id: String,
    cycle: u64,
    state: State,
    ledger: ResourceLedger,
    config: SessionConfig,
    rx: mpsc::UnboundedReceiver<Event>,
    writer: Arc<Mutex<LinkWriter>>,
    buffer: Arc<Mutex<RollingBuffer>>,
    telemetry: TelemetrySink,
    /// Tracks the device's last reported presence state, for
    /// `gate_on_presence`. Assumed `true` until a `PRESENCE OFF` line is
    /// observed, so a device without the presence-sensor firmware variant
    /// never gets spuriously gated.
    presence_on: bool,
}

impl Controller {
    pub fn new(
        session_id: String,
        config: SessionConfig,
        rx: mpsc::UnboundedReceiver<Event>,
        writer: Arc<Mutex<LinkWriter>>,
        buffer: Arc<Mutex<RollingBuffer>>,
        telemetry: TelemetrySink,
    ) -> Self {
        Self {
            session_id,
            cycle: 0,
            state: State::Idle,
            ledger: ResourceLedger::default(),
            config,
            rx,
            writer,
            buffer,
            telemetry,
            presence_on: true,
        }
    }

    /// Drive the controller until the configured cycle count is reached (if
    /// any) or a `Shutdown` event arrives.
    pub async fn run(mut self) {
        // Initial handshake: wait for the device's READY line, then resume
        // mic forwarding before entering the steady-state loop.
        self.await_ready().await;
        let _ = self.writer.lock().await.write_str(crate::protocol::RESUME_LINE).await;

        loop {
            if let Some(max) = self.config.max_cycles {
                if self.cycle >= max {
                    break;
                }
            }
            match self.rx.recv().await {
                Some(Event::Shutdown) | None => break,
                Some(Event::SegmentStart { start_index }) => self.on_segment_start(start_index).await,
                Some(Event::DeviceLine(line)) => self.on_device_line(&line),
                Some(_) => {
                    // FrameArrived / stray SegmentEnd / PlaybackAck while
                    // Idle: nothing to do, the mic path owns them.
                }
            }
        }
    }

    async fn await_ready(&mut self) {
        while let Some(event) = self.rx.recv().await {
            if let Event::DeviceLine(line) = &event {
                if line == "READY" {
                    return;
                }
            }
        }
    }

    fn on_device_line(&mut self, line: &str) {
        match line {
            "PRESENCE ON" => {
                self.presence_on = true;
                tracing::info!(presence = %line, "presence line observed");
            }
            "PRESENCE OFF" => {
                self.presence_on = false;
                tracing::info!(presence = %line, "presence line observed");
            }
            other if other.starts_with("LOG") => {
                tracing::debug!(device_log = %other, "device log line");
            }
            _ => {}
        }
    }

    async fn on_segment_start(&mut self, start_index: u64) {
        if self.config.gate_on_presence && !self.presence_on {
            // Presence sensor reports the operator absent; suppress capture
            // per the configured choice in spec.md §9.
            return;
        }
        if self.state != State::Idle || self.ledger.mic != ResourceState::Available {
            // Guard failed: at most one cycle active (P2). Silently ignore;
            // the device is mid-cycle and shouldn't be sending another
            // SegmentStart while one is outstanding.
            return;
        }

        self.ledger.mic = ResourceState::OwnedByController;
        self.cycle += 1;
        self.transition(State::Capturing, "segment_start", None, None).await;

        let capture_deadline = self.config.capture_watchdog;
        match tokio::time::timeout(capture_deadline, self.await_segment_end(start_index)).await {
            Ok(Some(segment)) => self.on_segment_end(segment).await,
            Ok(None) => self.enter_error_timeout("capture_aborted").await,
            Err(_) => self.enter_error_timeout("capture_timed_out").await,
        }
    }

    /// Wait for the `SegmentEnd` that closes the segment started at
    /// `start_index`, tolerating interleaved `FrameArrived`/`DeviceLine`
    /// events in between.
    async fn await_segment_end(&mut self, start_index: u64) -> Option<Segment> {
        loop {
            match self.rx.recv().await? {
                Event::SegmentEnd(segment) if segment.start_index == start_index => {
                    return Some(segment);
                }
                Event::DeviceLine(line) => self.on_device_line(&line),
                Event::Shutdown => return None,
                _ => {}
            }
        }
    }

    async fn on_segment_end(&mut self, segment: Segment) {
        let min_duration_samples = (self.config.segmenter.min_segment_duration_ms as u64
            * crate::segmenter::SAMPLE_RATE_HZ as u64)
            / 1000;
        let duration_ok = segment.duration_samples() >= min_duration_samples;
        let mean_abs_ok = {
            let buf = self.buffer.lock().await;
            buf.mean_abs(segment.start_index, segment.end_index) >= self.config.segmenter.min_segment_mean_abs
        };

        if !duration_ok || !mean_abs_ok {
            self.ledger.mic = ResourceState::Available;
            let reason = if !duration_ok {
                "segment shorter than minimum duration"
            } else {
                "segment quieter than minimum energy"
            };
            let err = VoxError::SegmentRejected { reason: reason.to_string() };
            self.transition_with_error(State::Idle, "segment_rejected", None, None, Some(err.kind().to_string()))
                .await;
            return;
        }

        self.transition(State::Recognizing, "segment_end", None, None).await;

        let pcm = {
            let buf = self.buffer.lock().await;
            buf.slice(segment.start_index, segment.end_index)
        };

        match stages::recognize_with_watchdog(
            self.config.recognizer.as_ref(),
            &pcm,
            crate::segmenter::SAMPLE_RATE_HZ,
            self.config.watchdogs.recognizer,
        )
        .await
        {
            Ok(transcript) if transcript.is_empty() => {
                self.ledger.mic = ResourceState::Available;
                self.transition(State::Cleanup, "empty_transcript", None, None).await;
                self.run_cleanup().await;
            }
            Ok(transcript) => self.run_rewrite(transcript).await,
            Err(e) => self.enter_error_timeout_with(e).await,
        }
    }

    async fn run_rewrite(&mut self, transcript: String) {
        self.transition(State::Rewriting, "transcript_ready", None, Some(transcript.len())).await;

        let mut attempt = stages::rewrite_with_watchdog(
            self.config.rewriter.as_ref(),
            &transcript,
            self.config.watchdogs.rewriter,
        )
        .await;

        if let Ok(rewritten) = &attempt {
            if rewritten.is_empty() {
                // One empty-output retry before falling back to the
                // original transcript verbatim.
                attempt = stages::rewrite_with_watchdog(
                    self.config.rewriter.as_ref(),
                    &transcript,
                    self.config.watchdogs.rewriter,
                )
                .await;
            }
        }

        match attempt {
            Ok(rewritten) => {
                let final_text = if rewritten.is_empty() { transcript.clone() } else { rewritten };
                self.maybe_persist_transcript(&transcript, &final_text).await;
                self.run_synthesis(final_text).await;
            }
            Err(e) => self.enter_error_timeout_with(e).await,
        }
    }

    async fn maybe_persist_transcript(&self, transcript: &str, rewritten: &str) {
        let Some(dir) = &self.config.transcript_dir else { return };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(error = %e, "failed to create transcript directory");
            return;
        }
        let path = dir.join(format!("{}.txt", self.cycle));
        let contents = format!("transcript: {transcript}\nrewritten: {rewritten}\n");
        if let Err(e) = tokio::fs::write(&path, contents).await {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist transcript");
        }
    }

    async fn run_synthesis(&mut self, text: String) {
        self.transition(State::Synthesizing, "rewrite_ready", None, None).await;

        match stages::synthesize_first_chunk(
            self.config.synthesizer.as_ref(),
            &text,
            self.config.watchdogs.synthesis_first_chunk,
        )
        .await
        {
            Ok((stream, first_chunk)) => self.run_playback(stream, first_chunk).await,
            Err(e) => self.enter_error_timeout_with(e).await,
        }
    }

    async fn run_playback(
        &mut self,
        stream: Box<dyn stages::SynthesisStream>,
        first_chunk: stages::SynthesisChunk,
    ) {
        self.ledger.spk = ResourceState::OwnedByDevice;
        self.transition(State::PlayingBack, "first_chunk", None, None).await;

        let watchdog = self.config.watchdogs.playback;
        let deadline = Instant::now() + watchdog;

        let job = match stages_timeout(deadline, playback::buffer_stream(stream, first_chunk)).await {
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(e).await;
                return;
            }
            None => {
                playback::best_effort_end(&self.writer).await;
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(VoxError::PlaybackTimedOut {
                    elapsed_ms: watchdog.as_millis() as u64,
                })
                .await;
                return;
            }
        };
        let size = job.payload.len();

        match stages_timeout(deadline, playback::send_playback_job(&self.writer, &job)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(e).await;
                return;
            }
            None => {
                playback::best_effort_end(&self.writer).await;
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(VoxError::PlaybackTimedOut {
                    elapsed_ms: watchdog.as_millis() as u64,
                })
                .await;
                return;
            }
        }

        match tokio::time::timeout_at(deadline, self.await_playback_ack()).await {
            Ok(true) => {
                self.ledger.spk = ResourceState::Available;
                self.transition(State::Cleanup, "playback_ack", None, Some(size)).await;
                self.run_cleanup().await;
            }
            Ok(false) => {
                // Shutdown/channel closure while waiting for the device's
                // PLAYBACK_DONE, distinct from the watchdog firing below.
                playback::best_effort_end(&self.writer).await;
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(VoxError::DeviceAckMissing(
                    "playback acknowledgement channel closed before PLAYBACK_DONE".to_string(),
                ))
                .await;
            }
            Err(_) => {
                playback::best_effort_end(&self.writer).await;
                self.ledger.spk = ResourceState::Available;
                self.enter_error_timeout_with(VoxError::PlaybackTimedOut {
                    elapsed_ms: watchdog.as_millis() as u64,
                })
                .await;
            }
        }
    }

    async fn await_playback_ack(&mut self) -> bool {
        loop {
            match self.rx.recv().await {
                Some(Event::PlaybackAck) => return true,
                Some(Event::DeviceLine(line)) => self.on_device_line(&line),
                Some(Event::Shutdown) | None => return false,
                Some(_) => {}
            }
        }
    }

    async fn run_cleanup(&mut self) {
        tokio::time::sleep(self.config.playback_guard_delay).await;
        let _ = self.writer.lock().await.write_str(crate::protocol::RESUME_LINE).await;
        self.ledger = ResourceLedger::default();
        self.transition(State::Idle, "guard_elapsed", None, None).await;
    }

    async fn enter_error_timeout_with(&mut self, error: VoxError) {
        self.enter_error_timeout(error.kind()).await;
    }

    async fn enter_error_timeout(&mut self, cause: &str) {
        self.transition(State::ErrorTimeout, "error", None, None).await;
        tracing::error!(cause, "error_timeout");

        {
            let mut w = self.writer.lock().await;
            let _ = w.write_str(crate::protocol::PAUSE_LINE).await;
            let _ = w.write_str(crate::protocol::END_LINE).await;
        }
        tokio::time::sleep(self.config.playback_guard_delay).await;
        {
            let mut w = self.writer.lock().await;
            let _ = w.write_str(crate::protocol::RESUME_LINE).await;
        }

        self.ledger = ResourceLedger::default();
        self.transition_with_error(State::Idle, "guard_elapsed", None, None, Some(cause.to_string()))
            .await;
    }

    async fn transition(&mut self, next: State, event_name: &str, latency_ms: Option<u64>, size: Option<usize>) {
        self.transition_with_error(next, event_name, latency_ms, size, None).await
    }

    async fn transition_with_error(
        &mut self,
        next: State,
        event_name: &str,
        latency_ms: Option<u64>,
        size: Option<usize>,
        error: Option<String>,
    ) {
        if let Err(msg) = self.ledger.check_invariant() {
            VoxError::abort_on_invariant_violation(msg);
        }

        self.state = next;
        let record = TransitionRecord {
            ts: format!("{:?}", std::time::SystemTime::now()),
            session: self.session_id.clone(),
            cycle: self.cycle,
            state: next.as_str().to_string(),
            event: event_name.to_string(),
            resources: self.ledger.clone(),
            latency_ms,
            size,
            error,
        };
        if let Err(e) = self.telemetry.record(&record).await {
            tracing::warn!(error = %e, "failed to persist transition record");
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }
}

/// Run `fut` but bail out with `None` once `deadline` has already passed,
/// for nesting a sub-step inside the overall playback watchdog window.
async fn stages_timeout<T>(deadline: Instant, fut: impl std::future::Future<Output = T>) -> Option<T> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining == Duration::ZERO {
        return None;
    }
    tokio::time::timeout_at(deadline, fut).await.ok()
}

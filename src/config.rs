//! `SessionConfig`: the single constructor input for a controller, following
//! the teacher's plain-struct-with-`new()` convention (see `SerialConfig`,
//! `CanConfig`) rather than a builder macro or an external config crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::segmenter::SegmenterConfig;
use crate::stages::{Recognizer, Rewriter, StageWatchdogs, Synthesizer};

pub struct SessionConfig {
    pub device_path: String,
    pub baud_rate: u32,

    pub recognizer: Arc<dyn Recognizer>,
    pub rewriter: Arc<dyn Rewriter>,
    pub synthesizer: Arc<dyn Synthesizer>,

    pub segmenter: SegmenterConfig,
    pub watchdogs: StageWatchdogs,
    pub capture_watchdog: Duration,
    pub playback_guard_delay: Duration,

    pub max_cycles: Option<u64>,
    pub log_path: PathBuf,

    /// See `SPEC_FULL.md` §"Open questions": suppress `SegmentStart` while
    /// the device reports `PRESENCE OFF`. Defaults to `false`, matching the
    /// "informational only" reading of the presence line.
    pub gate_on_presence: bool,

    /// Per-cycle transcript retention directory; a validation convenience,
    /// not part of the correctness contract. `None` disables it.
    pub transcript_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Construct a config with the defaults from the core contract (VAD
    /// thresholds, stage watchdogs, playback guard delay), overriding only
    /// what every deployment must supply: the device path and the three
    /// collaborator adapters.
    pub fn new(
        device_path: &str,
        recognizer: Arc<dyn Recognizer>,
        rewriter: Arc<dyn Rewriter>,
        synthesizer: Arc<dyn Synthesizer>,
        log_path: PathBuf,
    ) -> Self {
        Self {
            device_path: device_path.to_string(),
            baud_rate: crate::serial_link::BAUD_RATE,
            recognizer,
            rewriter,
            synthesizer,
            segmenter: SegmenterConfig::default(),
            watchdogs: StageWatchdogs::default(),
            capture_watchdog: Duration::from_secs(30),
            playback_guard_delay: Duration::from_millis(200),
            max_cycles: None,
            log_path,
            gate_on_presence: false,
            transcript_dir: None,
        }
    }
}

//! The controller's event vocabulary. Producers upstream of the controller
//! (serial reader, mic ingest/segmenter) push typed events onto the
//! single-consumer queue; the controller never polls them directly. Pipeline
//! stage completion and stage/playback watchdogs are *not* routed through
//! this queue — see `DESIGN.md` for why.

use crate::segmenter::Segment;

#[derive(Debug, Clone)]
pub enum Event {
    FrameArrived,
    SegmentStart { start_index: u64 },
    SegmentEnd(Segment),
    PlaybackAck,
    DeviceLine(String),
    OperatorReset,
    Shutdown,
}

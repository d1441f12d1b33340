//! voxbridge: the desktop session controller for a half-duplex
//! speech-mediation loop against a USB-attached microcontroller audio
//! bridge. See `SPEC_FULL.md` for the full contract; this crate implements
//! the controller state machine and device I/O multiplexer only — the
//! recognizer, rewriter, and synthesizer are external collaborators
//! supplied through the [`stages`] adapter traits.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod ledger;
pub mod mic_ingest;
pub mod playback;
pub mod protocol;
pub mod segmenter;
pub mod serial;
pub mod serial_link;
pub mod session;
pub mod stages;
pub mod telemetry;

pub use config::SessionConfig;
pub use session::Session;

//! Session: the unit of work for a single operator run. Owns all mutable
//! state and wires the cooperating tasks together — this replaces the
//! module-level mutable globals a naive port of the device-side firmware
//! pattern would otherwise carry over.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::controller::Controller;
use crate::event::Event;
use crate::mic_ingest::{self, RollingBuffer};
use crate::serial_link::SerialLink;
use crate::telemetry::TelemetrySink;

/// Capacity of the rolling buffer, sized well past the ingest task's
/// retention floor so ordinary operation never hits `BufferPressure`.
const ROLLING_BUFFER_CAPACITY: usize =
    (mic_ingest::RETENTION_SECONDS as usize + 10) * crate::segmenter::SAMPLE_RATE_HZ as usize;

pub struct Session {
    id: String,
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the device, spawn Mic Ingest, and run the Session Controller to
    /// completion (either the configured cycle count or a `Shutdown`
    /// event).
    pub async fn run(self) -> anyhow::Result<()> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let (link, reader_handle) = SerialLink::open(&self.config.device_path, event_tx.clone(), frame_tx)?;
        let writer = link.writer_handle();

        let buffer = Arc::new(Mutex::new(RollingBuffer::new(ROLLING_BUFFER_CAPACITY)));
        let ingest_handle = tokio::spawn(mic_ingest::run_mic_ingest(
            buffer.clone(),
            self.config.segmenter.clone(),
            frame_rx,
            event_tx.clone(),
        ));

        let telemetry = TelemetrySink::open(&self.config.log_path).await?;
        let controller = Controller::new(self.id.clone(), self.config, event_rx, writer, buffer, telemetry);

        controller.run().await;

        reader_handle.abort();
        ingest_handle.abort();
        Ok(())
    }
}

//! Serial Link: framed bidirectional transport over the device's USB CDC
//! endpoint. The reader runs continuously and independently, publishing
//! `AudioFrame` payloads and `DeviceLine`/`PlaybackAck` events; the writer is
//! a single mutually-exclusive owner so a playback job's paced payload never
//! interleaves with a short outbound command.
//!
//! The link is generic over its transport (`tokio::io::AsyncRead +
//! AsyncWrite`) rather than hardcoded to [`tokio_serial::SerialStream`], so
//! tests can drive the controller against an in-memory `tokio::io::duplex`
//! pair standing in for the device.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::event::Event;
use crate::protocol::{self, Demuxer, InboundItem};
use crate::serial::{SerialConfig, SerialPort};

pub const BAUD_RATE: u32 = 921_600;

/// The write half of a transport, boxed so the controller and playback pump
/// don't need to be generic themselves. Mirrors `SerialWriter`'s small API.
pub struct LinkWriter {
    inner: Box<dyn AsyncWrite + Unpin + Send>,
}

impl LinkWriter {
    fn new(inner: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        Ok(())
    }

    pub async fn write_str(&mut self, data: &str) -> Result<()> {
        self.write_all(data.as_bytes()).await
    }
}

/// Frames coming out of the demuxer that Mic Ingest cares about; lines and
/// acks are routed straight onto the controller's event queue by the reader
/// loop, so only audio payloads need their own channel.
pub struct SerialLink {
    writer: Arc<Mutex<LinkWriter>>,
}

impl SerialLink {
    /// Open the real device and spawn its reader loop. `events` receives
    /// `DeviceLine`/`PlaybackAck` events; `frames` receives raw PCM payloads
    /// for Mic Ingest. Returns the link (for outbound writes) plus the
    /// reader task's join handle.
    pub fn open(
        device_path: &str,
        events: mpsc::UnboundedSender<Event>,
        frames: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>)> {
        let config = SerialConfig::new(device_path, BAUD_RATE);
        let port = SerialPort::open(&config)?;
        Ok(Self::from_io(port.into_inner(), events, frames))
    }

    /// Build a link over an arbitrary `AsyncRead + AsyncWrite` transport,
    /// e.g. one half of `tokio::io::duplex` in tests, without touching any
    /// real hardware.
    pub fn from_io<T>(
        io: T,
        events: mpsc::UnboundedSender<Event>,
        frames: mpsc::UnboundedSender<Vec<u8>>,
    ) -> (Self, tokio::task::JoinHandle<()>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let handle = tokio::spawn(reader_loop(reader, events, frames));
        (
            Self {
                writer: Arc::new(Mutex::new(LinkWriter::new(writer))),
            },
            handle,
        )
    }

    pub fn writer_handle(&self) -> Arc<Mutex<LinkWriter>> {
        self.writer.clone()
    }

    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.write_str(line).await?;
        Ok(())
    }
}

async fn reader_loop(
    mut reader: impl AsyncRead + Unpin,
    events: mpsc::UnboundedSender<Event>,
    frames: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut demux = Demuxer::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::warn!("serial reader observed EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "serial reader I/O error");
                break;
            }
        };
        demux.feed(&buf[..n]);
        for item in demux.drain_items() {
            match item {
                InboundItem::Audio(payload) => {
                    if frames.send(payload).is_err() {
                        return;
                    }
                    let _ = events.send(Event::FrameArrived);
                }
                InboundItem::Line(line) => {
                    let event = classify_line(&line);
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn classify_line(line: &str) -> Event {
    match line {
        "PLAYBACK_DONE" => Event::PlaybackAck,
        other => Event::DeviceLine(other.to_string()),
    }
}

/// Write the raw PCM bytes of a playback payload in bounded chunks so the
/// device's receive DMA isn't starved and the host's send buffer doesn't
/// overflow. Caller already holds the writer lock for the duration of the
/// job.
pub async fn write_paced(writer: &mut LinkWriter, payload: &[u8]) -> Result<()> {
    for chunk in payload.chunks(protocol::PLAYBACK_CHUNK_BYTES) {
        writer.write_all(chunk).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_done_line_becomes_ack_event() {
        match classify_line("PLAYBACK_DONE") {
            Event::PlaybackAck => {}
            other => panic!("expected PlaybackAck, got {other:?}"),
        }
    }

    #[test]
    fn unknown_line_is_forwarded() {
        match classify_line("LOG something happened") {
            Event::DeviceLine(text) => assert_eq!(text, "LOG something happened"),
            other => panic!("expected DeviceLine, got {other:?}"),
        }
    }

    #[test]
    fn chunking_covers_payload_with_bounded_chunks() {
        let payload = vec![0xAAu8; protocol::PLAYBACK_CHUNK_BYTES * 3 + 17];
        let chunks: Vec<_> = payload.chunks(protocol::PLAYBACK_CHUNK_BYTES).collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= protocol::PLAYBACK_CHUNK_BYTES));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), payload.len());
    }

    #[tokio::test]
    async fn from_io_round_trips_a_line_over_a_duplex_pair() {
        let (device_side, host_side) = tokio::io::duplex(4096);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (frames_tx, _frames_rx) = mpsc::unbounded_channel();
        let (link, handle) = SerialLink::from_io(host_side, events_tx, frames_tx);

        link.send_line("RESUME\n").await.unwrap();

        let mut device_side = device_side;
        let mut buf = [0u8; 16];
        let n = device_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"RESUME\n");

        device_side.write_all(b"READY\n").await.unwrap();
        match events_rx.recv().await {
            Some(Event::DeviceLine(line)) => assert_eq!(line, "READY"),
            other => panic!("expected DeviceLine(\"READY\"), got {other:?}"),
        }

        handle.abort();
    }
}

//! Microphone capture pipeline
//!
//! Captures mono 16 kHz audio from the default PulseAudio source, frames it
//! into fixed 4096-sample chunks and converts each chunk into the outbound
//! wire payload (base64 16-bit PCM). Blocking device reads happen on a
//! dedicated thread; frames are pushed fire-and-forget onto an unbounded
//! channel, decoupling the capture cadence from session backpressure.

use crate::codec;
use crate::error::{LiveError, Result};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Fixed capture sample rate.
pub const CAPTURE_RATE: u32 = 16_000;
/// Samples per outbound frame (~256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;
/// MIME tag identifying sample format and rate on the wire.
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";

/// One outbound media payload: text-encoded PCM plus its MIME tag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub data: String,
    pub mime_type: String,
}

/// Convert one captured frame of float samples to the wire payload.
///
/// Each sample is scaled by 32768 with no clamping: values outside [-1, 1]
/// wrap rather than saturate. This is a long-standing quirk of the capture
/// path and must not change without a product decision, as clamping would
/// alter audible output.
pub fn frame_to_payload(samples: &[f32]) -> MediaPayload {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s * 32768.0) as i32 as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    MediaPayload {
        data: codec::encode(&bytes),
        mime_type: CAPTURE_MIME.to_string(),
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Ask the capture thread to exit and release the microphone. Idempotent.
    /// The thread observes the flag after its current blocking read, so the
    /// device is released within one frame interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Open the default microphone and stream fixed-size frames as wire payloads.
///
/// Fails with [`LiveError::PermissionDenied`] when no capture device can be
/// opened. The thread exits on its own when the payload receiver is dropped.
pub fn spawn_capture(tx: UnboundedSender<MediaPayload>) -> Result<CaptureHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    // The PulseAudio handle is not Send, so it is created and used on the
    // capture thread; the open result is reported back synchronously.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let spec = Spec {
            format: Format::F32le,
            channels: 1,
            rate: CAPTURE_RATE,
        };
        let simple = match Simple::new(
            None,      // default server
            "livecall",
            Direction::Record,
            None,      // default device
            "capture",
            &spec,
            None,      // default channel map
            None,      // default buffering
        ) {
            Ok(simple) => {
                let _ = ready_tx.send(Ok(()));
                simple
            }
            Err(e) => {
                let _ = ready_tx.send(Err(LiveError::PermissionDenied(format!("{e}"))));
                return;
            }
        };

        info!(
            "microphone capture started: {} Hz mono, {}-sample frames",
            CAPTURE_RATE, FRAME_SAMPLES
        );
        let mut buffer = vec![0u8; FRAME_SAMPLES * 4];
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = simple.read(&mut buffer) {
                warn!("microphone read error: {}", e);
                break;
            }

            let mut samples = Vec::with_capacity(FRAME_SAMPLES);
            for chunk in buffer.chunks_exact(4) {
                samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }

            if tx.send(frame_to_payload(&samples)).is_err() {
                debug!("payload receiver dropped, stopping capture");
                break;
            }
        }
        info!("microphone capture stopped");
    });

    ready_rx
        .recv()
        .map_err(|_| LiveError::PermissionDenied("capture thread exited".to_string()))??;
    Ok(CaptureHandle { stop })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_pcm(payload: &MediaPayload) -> Vec<i16> {
        codec::decode(&payload.data)
            .unwrap()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_frame_to_payload_scales_and_tags() {
        let payload = frame_to_payload(&[0.0, 0.5, -0.5, -1.0]);
        assert_eq!(payload.mime_type, CAPTURE_MIME);
        assert_eq!(payload_pcm(&payload), vec![0, 16384, -16384, -32768]);
    }

    #[test]
    fn test_frame_to_payload_wraps_out_of_range_samples() {
        // 1.5 * 32768 == 49152, which wraps to -16384 in 16 bits. The
        // pipeline intentionally does not saturate.
        let payload = frame_to_payload(&[1.5]);
        assert_eq!(payload_pcm(&payload), vec![-16384]);
    }

    #[test]
    fn test_frame_payload_is_valid_wire_json() {
        let payload = frame_to_payload(&[0.25; 8]);
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("data").is_some());
        assert_eq!(value["mimeType"], "audio/pcm;rate=16000");
    }
}

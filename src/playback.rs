//! Gapless playback scheduling
//!
//! Decoded audio buffers arrive asynchronously and must play strictly
//! back-to-back. A monotone cursor tracks the next available start time on
//! the output clock: every scheduled buffer starts at `max(cursor, now)` and
//! advances the cursor by its own duration, so buffers in call order never
//! overlap. When the pipeline falls behind, subsequent buffers still queue
//! back-to-back at the cost of added end-to-end latency rather than
//! corrupting audio.

use crate::codec::AudioBuffer;
use crate::error::{LiveError, Result};
use futures_util::future::{AbortHandle, Abortable};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fixed playback sample rate for model audio.
pub const OUTPUT_RATE: u32 = 24_000;

/// Read-only clock the scheduler measures start times against. One clock is
/// created per conversation and released on teardown.
pub trait AudioClock: Send + Sync + 'static {
    /// Seconds since the clock was created.
    fn now(&self) -> f64;
}

/// Wall-clock time since construction.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Destination for scheduled audio.
pub trait OutputSink: Send + Sync + 'static {
    fn write(&self, buffer: &AudioBuffer);
}

/// Schedules decoded buffers for strictly sequential playback and tracks
/// in-flight sources for cancellation.
pub struct PlaybackScheduler<C: AudioClock, S: OutputSink> {
    clock: Arc<C>,
    sink: Arc<S>,
    cursor: f64,
    next_id: u64,
    active: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl<C: AudioClock, S: OutputSink> PlaybackScheduler<C, S> {
    pub fn new(clock: Arc<C>, sink: Arc<S>) -> Self {
        Self {
            clock,
            sink,
            cursor: 0.0,
            next_id: 0,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `buffer` for gapless sequential playback and return the
    /// start time chosen on the clock.
    ///
    /// Buffers scheduled in call order play in call order; callers must call
    /// this in the order buffers should play, not the order their decode
    /// happened to finish.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> f64 {
        let now = self.clock.now();
        let start = self.cursor.max(now);
        let duration = buffer.duration();

        let id = self.next_id;
        self.next_id += 1;

        // Registered in the active set before the task runs, so teardown can
        // never miss a source that is about to start.
        let (abort, registration) = AbortHandle::new_pair();
        self.active.lock().unwrap().insert(id, abort);

        let clock = self.clock.clone();
        let sink = self.sink.clone();
        let active = self.active.clone();
        let playback = Abortable::new(
            async move {
                let delay = start - clock.now();
                if delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
                sink.write(&buffer);
            },
            registration,
        );
        tokio::spawn(async move {
            let _ = playback.await;
            // A source removes itself at most once; aborted entries are
            // drained by teardown first, so this becomes a no-op for them.
            active.lock().unwrap().remove(&id);
        });

        self.cursor = start + duration;
        debug!(
            "scheduled source {} at {:.3}s for {:.3}s (cursor {:.3}s)",
            id, start, duration, self.cursor
        );
        start
    }

    /// Force-stop every in-flight source, clear the set and reset the cursor
    /// to zero. Safe when no playback occurred and safe to call repeatedly.
    pub fn teardown(&mut self) {
        let mut active = self.active.lock().unwrap();
        for (_, handle) in active.drain() {
            handle.abort();
        }
        self.cursor = 0.0;
    }

    /// Next available start time on the output clock.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of scheduled sources that have not finished playing.
    pub fn active_sources(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

/// PulseAudio playback sink at the fixed 24 kHz mono output rate.
///
/// Writes are handed off to a dedicated thread because the device write
/// blocks until the server has consumed the buffer; the scheduler's timing
/// stays on the async side.
pub struct PulseSink {
    tx: std::sync::mpsc::Sender<AudioBuffer>,
}

impl PulseSink {
    pub fn new() -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel::<AudioBuffer>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let spec = Spec {
                format: Format::F32le,
                channels: 1,
                rate: OUTPUT_RATE,
            };
            let simple = match Simple::new(
                None,
                "livecall",
                Direction::Playback,
                None,
                "playback",
                &spec,
                None,
                None,
            ) {
                Ok(simple) => {
                    let _ = ready_tx.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(LiveError::Setup(format!(
                        "audio output unavailable: {e}"
                    ))));
                    return;
                }
            };

            while let Ok(buffer) = rx.recv() {
                let mut bytes = Vec::with_capacity(buffer.samples().len() * 4);
                for &s in buffer.samples() {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                if let Err(e) = simple.write(&bytes) {
                    warn!("playback write error: {}", e);
                    break;
                }
            }
            debug!("playback thread stopped");
        });

        ready_rx
            .recv()
            .map_err(|_| LiveError::Setup("playback thread exited".to_string()))??;
        Ok(Self { tx })
    }
}

impl OutputSink for PulseSink {
    fn write(&self, buffer: &AudioBuffer) {
        if self.tx.send(buffer.clone()).is_err() {
            warn!("playback sink closed, dropping buffer");
        }
    }
}

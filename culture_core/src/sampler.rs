//! Background telemetry sampling.
//!
//! Spawns a thread that owns the `TelemetrySource`, stamps each frame with
//! experiment time and hands it to the runner over a bounded channel. It
//! tracks the last successful read for stall detection.
//!
//! Each `TelemetrySampler` spawns exactly one thread, shut down and joined
//! when the sampler is dropped.
use crate::collab_error::map_collab_error;
use crate::error::CultureError;
use crossbeam_channel as xch;
use culture_traits::clock::Clock;
use culture_traits::{TelemetryFrame, TelemetrySource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A frame (or an incomplete broadcast) stamped with experiment time.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped {
    pub at_h: f64,
    pub frame: Option<TelemetryFrame>,
}

pub type Sample = Result<Stamped, CultureError>;

pub struct TelemetrySampler {
    rx: xch::Receiver<Sample>,
    last_ok: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TelemetrySampler {
    /// Spawn the sampling thread. Experiment time is `offset_h` plus the
    /// hours elapsed on `clock` since spawning, so a resumed run continues
    /// where its journal stopped.
    pub fn spawn<T, C>(mut source: T, timeout: Duration, offset_h: f64, clock: C) -> Self
    where
        T: TelemetrySource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                let sample = match source.read_frame(timeout) {
                    Ok(frame) => {
                        last_ok_clone.store(clock.ms_since(epoch), Ordering::Relaxed);
                        Ok(Stamped {
                            at_h: offset_h + clock.hours_since(epoch),
                            frame,
                        })
                    }
                    Err(e) => {
                        let mapped = map_collab_error(e.as_ref());
                        tracing::debug!(error = %mapped, "telemetry read failed");
                        Err(mapped)
                    }
                };

                // Block until the runner takes it; exit once it is gone.
                // Poll so a drop during a full channel still gets noticed.
                let mut pending = sample;
                loop {
                    match tx.send_timeout(pending, Duration::from_millis(50)) {
                        Ok(()) => break,
                        Err(xch::SendTimeoutError::Timeout(back)) => {
                            if shutdown_clone.load(Ordering::Relaxed) {
                                tracing::trace!("sampler thread exiting with a pending frame");
                                return;
                            }
                            pending = back;
                        }
                        Err(xch::SendTimeoutError::Disconnected(_)) => {
                            tracing::debug!("sampler consumer disconnected, exiting thread");
                            return;
                        }
                    }
                }
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Wait up to `timeout` for the next sample.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Sample> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Milliseconds since the last successful read, relative to `now_ms`
    /// on the sampler's clock.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// Stall measured against a real monotonic clock.
    pub fn stalled_for_now(&self) -> u64 {
        let ms = Instant::now().saturating_duration_since(self.epoch).as_millis();
        self.stalled_for(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits after its current read (bounded by the source
        // timeout) or within one send poll.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("sampler thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "sampler thread panicked during shutdown");
                }
            }
        }
    }
}

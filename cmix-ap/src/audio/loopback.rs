//! In-process output backend
//!
//! `LoopbackOutput` has no device. Periods are requested explicitly through
//! a `LoopbackHandle` (`pull`), or by an optional pacing thread that pulls
//! one period per period duration to stand in for a device clock. Every
//! transport call is counted so tests can assert on side effects.
//!
//! Pulled bytes are appended to a pending buffer that models samples
//! written to the device but not yet played: `flush` discards it, `play_out`
//! consumes it, and `drain` waits for it to empty.

use crate::audio::output::OutputStream;
use crate::audio::types::AudioSpec;
use crate::error::{Error, Result};
use crate::playback::driver::FrameRenderer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counts of transport calls made on a loopback stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportCounts {
    pub cork: u64,
    pub uncork: u64,
    pub flush: u64,
    pub drain: u64,
    pub close: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cork: AtomicU64,
    uncork: AtomicU64,
    flush: AtomicU64,
    drain: AtomicU64,
    close: AtomicU64,
}

#[derive(Debug)]
struct LoopbackShared {
    renderer: Mutex<Option<FrameRenderer>>,
    pending: Mutex<Vec<u8>>,
    corked: AtomicBool,
    closed: AtomicBool,
    capture: bool,
    counters: Counters,
}

impl LoopbackShared {
    fn pending(&self) -> MutexGuard<'_, Vec<u8>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Test/headless handle for driving a `LoopbackOutput`
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    shared: Arc<LoopbackShared>,
}

impl LoopbackHandle {
    /// Run one callback for `requested_bytes`
    ///
    /// Returns `None` while corked, closed, or before `start`, since a
    /// corked stream delivers no callbacks.
    pub fn pull(&self, requested_bytes: usize) -> Option<Vec<u8>> {
        if self.shared.corked.load(Ordering::Acquire) || self.shared.closed.load(Ordering::Acquire) {
            return None;
        }
        let mut out = vec![0u8; requested_bytes];
        {
            let mut renderer = self.shared.renderer.lock().unwrap_or_else(|p| p.into_inner());
            renderer.as_mut()?.render(&mut out);
        }
        if self.shared.capture {
            self.shared.pending().extend_from_slice(&out);
        }
        Some(out)
    }

    /// Written-but-unplayed bytes
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending().len()
    }

    /// Simulate the device playing `bytes` of pending output
    pub fn play_out(&self, bytes: usize) -> Vec<u8> {
        let mut pending = self.shared.pending();
        let n = bytes.min(pending.len());
        pending.drain(..n).collect()
    }

    pub fn is_corked(&self) -> bool {
        self.shared.corked.load(Ordering::Acquire)
    }

    pub fn counts(&self) -> TransportCounts {
        let c = &self.shared.counters;
        TransportCounts {
            cork: c.cork.load(Ordering::Relaxed),
            uncork: c.uncork.load(Ordering::Relaxed),
            flush: c.flush.load(Ordering::Relaxed),
            drain: c.drain.load(Ordering::Relaxed),
            close: c.close.load(Ordering::Relaxed),
        }
    }
}

/// Device-less `OutputStream`
#[derive(Debug)]
pub struct LoopbackOutput {
    shared: Arc<LoopbackShared>,
    /// Period size and duration for the pacing thread
    pacing: Option<(usize, Duration)>,
    pacer: Option<JoinHandle<()>>,
}

impl LoopbackOutput {
    /// Manually pulled loopback that keeps pulled bytes as pending output
    pub fn new() -> (Self, LoopbackHandle) {
        Self::build(true, None)
    }

    /// Loopback pulled in real time by a background thread
    ///
    /// Output is discarded; `pending_bytes` stays 0.
    pub fn paced(spec: AudioSpec, period_frames: u32) -> (Self, LoopbackHandle) {
        let frames = period_frames.max(1);
        let bytes = frames as usize * spec.frame_bytes();
        let period = Duration::from_secs_f64(frames as f64 / spec.sample_rate() as f64);
        Self::build(false, Some((bytes, period)))
    }

    fn build(capture: bool, pacing: Option<(usize, Duration)>) -> (Self, LoopbackHandle) {
        let shared = Arc::new(LoopbackShared {
            renderer: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            corked: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            capture,
            counters: Counters::default(),
        });
        let handle = LoopbackHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                pacing,
                pacer: None,
            },
            handle,
        )
    }

    fn spawn_pacer(&mut self, period_bytes: usize, period: Duration) -> Result<()> {
        let handle = LoopbackHandle {
            shared: Arc::clone(&self.shared),
        };
        let thread = std::thread::Builder::new()
            .name("cmix-loopback".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while !handle.shared.closed.load(Ordering::Acquire) {
                    handle.pull(period_bytes);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })?;
        self.pacer = Some(thread);
        Ok(())
    }
}

impl OutputStream for LoopbackOutput {
    fn name(&self) -> &str {
        "loopback"
    }

    fn start(&mut self, renderer: FrameRenderer) -> Result<()> {
        {
            let mut slot = self.shared.renderer.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_some() {
                return Err(Error::AudioOutput("stream already started".to_string()));
            }
            *slot = Some(renderer);
        }
        if let Some((bytes, period)) = self.pacing {
            self.spawn_pacer(bytes, period)?;
        }
        info!("Loopback output started");
        Ok(())
    }

    fn cork(&mut self) -> Result<()> {
        self.shared.counters.cork.fetch_add(1, Ordering::Relaxed);
        self.shared.corked.store(true, Ordering::Release);
        Ok(())
    }

    fn uncork(&mut self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::AudioOutput("loopback closed".to_string()));
        }
        self.shared.counters.uncork.fetch_add(1, Ordering::Relaxed);
        self.shared.corked.store(false, Ordering::Release);
        Ok(())
    }

    fn is_corked(&self) -> bool {
        self.shared.corked.load(Ordering::Acquire)
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        self.shared.counters.flush.fetch_add(1, Ordering::Relaxed);
        let discarded = {
            let mut pending = self.shared.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        debug!("Loopback flush discarded {} bytes", discarded);
        Ok(())
    }

    fn drain(&mut self, timeout: Duration) -> Result<()> {
        self.shared.counters.drain.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        while !self.shared.pending().is_empty() {
            if Instant::now() >= deadline {
                warn!("Loopback drain timed out");
                return Err(Error::Timeout("drain".to_string()));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.counters.close.fetch_add(1, Ordering::Relaxed);
        self.shared.corked.store(true, Ordering::Release);
        if let Some(pacer) = self.pacer.take() {
            let _ = pacer.join();
        }
        self.shared
            .renderer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        debug!("Loopback output closed");
    }
}

impl Drop for LoopbackOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_before_start_returns_none() {
        let (mut output, handle) = LoopbackOutput::new();
        output.uncork().unwrap();
        assert!(handle.pull(16).is_none());
    }

    #[test]
    fn test_flush_discards_pending() {
        let (mut output, handle) = LoopbackOutput::new();
        output.shared.pending().extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(handle.pending_bytes(), 4);
        output.flush(Duration::from_millis(10)).unwrap();
        assert_eq!(handle.pending_bytes(), 0);
        assert_eq!(handle.counts().flush, 1);
    }

    #[test]
    fn test_drain_times_out_with_pending_output() {
        let (mut output, _handle) = LoopbackOutput::new();
        output.shared.pending().extend_from_slice(&[0; 8]);
        let result = output.drain(Duration::from_millis(5));
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut output, handle) = LoopbackOutput::new();
        output.close();
        output.close();
        assert_eq!(handle.counts().close, 1);
        assert!(output.uncork().is_err());
    }
}

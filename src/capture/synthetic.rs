// Synthetic capture device
//
// Produces frames on its own thread at a fixed rate, the way a camera preview
// callback would. Used by the demo binary and the test harness.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CaptureDevice, CaptureError, Frame, FrameReadySignal, Transform, VERTICAL_FLIP_TRANSFORM};
use crate::render::TextureId;

/// How the producer thread spaces out frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep one frame interval between frames, like a real camera
    Realtime,
    /// Emit the next frame only after the previous one was latched
    Lockstep,
}

#[derive(Debug, Clone, Copy)]
struct Latest {
    sequence: u64,
    timestamp_nanos: i64,
}

pub struct SyntheticCamera {
    framerate: u32,
    pacing: Pacing,
    frame_limit: Option<u64>,
    start_nanos: i64,
    transform: Transform,
    texture: Option<TextureId>,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Latest>>>,
    ack_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(framerate: u32, pacing: Pacing) -> Self {
        Self {
            framerate: framerate.max(1),
            pacing,
            frame_limit: None,
            start_nanos: 0,
            transform: VERTICAL_FLIP_TRANSFORM,
            texture: None,
            running: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(Mutex::new(None)),
            ack_tx: None,
            worker: None,
        }
    }

    /// Stop producing after `limit` frames
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Timestamp of the first frame, in nanoseconds
    pub fn with_start_time(mut self, start_nanos: i64) -> Self {
        self.start_nanos = start_nanos;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.framerate as u64)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }
}

struct Producer {
    interval: Duration,
    pacing: Pacing,
    frame_limit: Option<u64>,
    start_nanos: i64,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Latest>>>,
    signal: Arc<FrameReadySignal>,
    ack_rx: Receiver<()>,
}

impl Producer {
    fn run(self) {
        let interval_nanos = self.interval.as_nanos() as i64;
        let mut sequence = 0u64;

        while self.running.load(Ordering::SeqCst) {
            if self.frame_limit.is_some_and(|limit| sequence >= limit) {
                log::debug!("[Capture] Synthetic camera reached its frame limit ({})", sequence);
                break;
            }

            *self.latest.lock() = Some(Latest {
                sequence,
                timestamp_nanos: self.start_nanos + sequence as i64 * interval_nanos,
            });
            self.signal.notify();
            sequence += 1;

            match self.pacing {
                Pacing::Realtime => std::thread::sleep(self.interval),
                Pacing::Lockstep => {
                    if !self.wait_for_latch() {
                        break;
                    }
                }
            }
        }

        log::debug!("[Capture] Synthetic camera thread exiting after {} frames", sequence);
    }

    /// Returns false once the camera has been stopped
    fn wait_for_latch(&self) -> bool {
        loop {
            match self.ack_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::SeqCst) {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

impl CaptureDevice for SyntheticCamera {
    fn start(&mut self, texture: TextureId, signal: Arc<FrameReadySignal>) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::Device("synthetic camera already started".into()));
        }

        let (ack_tx, ack_rx) = bounded(1);
        self.running.store(true, Ordering::SeqCst);
        *self.latest.lock() = None;

        let producer = Producer {
            interval: self.frame_interval(),
            pacing: self.pacing,
            frame_limit: self.frame_limit,
            start_nanos: self.start_nanos,
            running: self.running.clone(),
            latest: self.latest.clone(),
            signal,
            ack_rx,
        };

        let worker = std::thread::Builder::new()
            .name("chunkrec-camera".into())
            .spawn(move || producer.run())
            .map_err(|e| CaptureError::Device(format!("failed to spawn camera thread: {}", e)))?;

        log::info!(
            "[Capture] Synthetic camera started: {} fps, {:?} pacing, texture {}",
            self.framerate, self.pacing, texture.0
        );

        self.texture = Some(texture);
        self.ack_tx = Some(ack_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn latch(&mut self) -> Result<Frame, CaptureError> {
        let latest = (*self.latest.lock())
            .ok_or_else(|| CaptureError::Device("no frame has been produced yet".into()))?;

        if let Some(ack) = &self.ack_tx {
            // A full channel means an ack is already queued.
            let _ = ack.try_send(());
        }

        Ok(Frame {
            sequence: latest.sequence,
            timestamp_nanos: latest.timestamp_nanos,
            transform: self.transform,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        self.ack_tx = None;

        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CaptureError::Device("camera thread panicked".into()))?;
            log::info!("[Capture] Synthetic camera stopped");
        }
        self.texture = None;
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockstep_emits_one_frame_per_latch() {
        let signal = Arc::new(FrameReadySignal::new());
        let mut camera = SyntheticCamera::new(30, Pacing::Lockstep).with_start_time(1_000);
        camera.start(TextureId(7), signal.clone()).unwrap();

        let mut timestamps = Vec::new();
        for _ in 0..5 {
            signal.await_and_clear(Duration::from_secs(2)).unwrap();
            timestamps.push(camera.latch().unwrap().timestamp_nanos);
        }
        camera.stop().unwrap();

        let interval = 1_000_000_000i64 / 30;
        let expected: Vec<i64> = (0..5).map(|i| 1_000 + i * interval).collect();
        assert_eq!(timestamps, expected);
        assert_eq!(signal.drop_count(), 0);
    }

    #[test]
    fn frame_limit_stops_production() {
        let signal = Arc::new(FrameReadySignal::new());
        let mut camera = SyntheticCamera::new(60, Pacing::Lockstep).with_frame_limit(2);
        camera.start(TextureId(1), signal.clone()).unwrap();

        for _ in 0..2 {
            signal.await_and_clear(Duration::from_secs(2)).unwrap();
            camera.latch().unwrap();
        }
        assert!(signal.await_and_clear(Duration::from_millis(100)).is_err());
        camera.stop().unwrap();
    }

    #[test]
    fn latch_before_first_frame_fails() {
        let mut camera = SyntheticCamera::new(30, Pacing::Lockstep);
        assert!(matches!(camera.latch(), Err(CaptureError::Device(_))));
    }

    #[test]
    fn stop_is_idempotent() {
        let signal = Arc::new(FrameReadySignal::new());
        let mut camera = SyntheticCamera::new(30, Pacing::Realtime);
        camera.start(TextureId(3), signal).unwrap();
        camera.stop().unwrap();
        camera.stop().unwrap();
        assert!(!camera.is_running());
    }
}

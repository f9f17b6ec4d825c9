// Recorder: the render loop
//
// One thread owns the render stage, the encoder session and the chunk
// controller. Per frame: rotate or drain, wait for the camera, draw, publish.
// The capture device notifies from its own thread through FrameReadySignal.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::backend::MediaBackend;
use super::chunk::ChunkController;
use super::summary::{RecordingStats, RecordingSummary};
use super::{RecorderError, RecorderStatus, Result};
use crate::capture::{CaptureDevice, CaptureError, FrameReadySignal};
use crate::config::RecorderConfig;
use crate::render::shaders::SWAPPED_FRAGMENT_SHADER;
use crate::render::{GraphicsApi, TextureRenderStage};

/// Asks a running recorder to stop after the current frame
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Recorder<C, G, B>
where
    C: CaptureDevice,
    G: GraphicsApi,
    B: MediaBackend,
{
    config: RecorderConfig,
    capture: C,
    render: TextureRenderStage<G>,
    backend: Option<B>,
    signal: Arc<FrameReadySignal>,
    stop: StopHandle,
    status: Arc<RwLock<RecorderStatus>>,
    stats: RecordingStats,
}

impl<C, G, B> Recorder<C, G, B>
where
    C: CaptureDevice,
    G: GraphicsApi,
    B: MediaBackend,
{
    pub fn new(config: RecorderConfig, capture: C, graphics: G, backend: B) -> Result<Self> {
        config.validate().map_err(|e| RecorderError::Config(e.to_string()))?;
        Ok(Self {
            config,
            capture,
            render: TextureRenderStage::new(graphics),
            backend: Some(backend),
            signal: Arc::new(FrameReadySignal::new()),
            stop: StopHandle::new(),
            status: Arc::new(RwLock::new(RecorderStatus::Idle)),
            stats: RecordingStats::default(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn status(&self) -> RecorderStatus {
        *self.status.read()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record until stopped, `max_frames` is reached, or an error occurs.
    ///
    /// Resources are released in every case; the last chunk is finalized
    /// only when recording ended without error.
    pub fn run(mut self) -> Result<RecordingSummary> {
        let recording_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        *self.status.write() = RecorderStatus::Starting;
        log::info!(
            "[Chunk] Recording {} to {} ({} frames per chunk)",
            recording_id,
            self.config.output_dir.display(),
            self.config.frames_per_chunk()
        );

        let mut controller = match self.start_chunks() {
            Ok(controller) => controller,
            Err(e) => {
                *self.status.write() = RecorderStatus::Failed;
                return Err(e);
            }
        };

        // The first chunk's target is current now, so GL objects can be created
        let setup = self
            .render
            .configure()
            .map_err(RecorderError::from)
            .and_then(|texture| self.capture.start(texture, self.signal.clone()).map_err(RecorderError::from));

        let outcome = match setup {
            Ok(()) => self.record_frames(&mut controller),
            Err(e) => Err(e),
        };

        let teardown = controller.stop(&mut self.capture, &mut self.render, outcome.is_ok());
        self.stats.dropped_notifications = self.signal.drop_count();
        self.stats.rotations = controller.rotations();
        self.stats.unexpected_end_of_stream = controller.unexpected_end_of_stream_count();

        if let Err(e) = outcome {
            log::error!("[Chunk] Recording failed in {}: {}", e.component(), e);
            if !teardown.is_clean() {
                log::error!("[Chunk] Teardown after failure: {}", teardown);
            }
            *self.status.write() = RecorderStatus::Failed;
            return Err(e);
        }
        if !teardown.is_clean() {
            *self.status.write() = RecorderStatus::Failed;
            return Err(RecorderError::Teardown(teardown));
        }

        let summary = RecordingSummary {
            recording_id,
            started_at,
            finished_at: Utc::now(),
            output_dir: self.config.output_dir.clone(),
            format: controller.format().clone(),
            chunks: controller.into_completed(),
            stats: self.stats.clone(),
        };

        if self.config.write_manifest {
            match summary.write_manifest() {
                Ok(path) => log::info!("[Chunk] Wrote manifest {}", path.display()),
                Err(e) => log::warn!("[Chunk] Failed to write manifest: {}", e),
            }
        }

        log::info!(
            "[Chunk] Recording finished: {} frames in {} chunks",
            summary.stats.frames_rendered,
            summary.chunks.len()
        );
        Ok(summary)
    }

    fn start_chunks(&mut self) -> Result<ChunkController<B>> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let backend = self.backend.take().ok_or(RecorderError::Config("recorder already ran".into()))?;

        ChunkController::start(
            backend,
            self.config.format_spec(),
            self.config.chunk_layout(),
            self.config.drain_settings(),
            self.config.frames_per_chunk(),
            self.status.clone(),
        )
    }

    fn record_frames(&mut self, controller: &mut ChunkController<B>) -> Result<()> {
        let timeout = self.config.frame_wait_timeout();
        let mut frame_count: u64 = 0;
        let mut consecutive_timeouts = 0u32;

        loop {
            if self.stop.is_stop_requested() {
                log::info!("[Chunk] Stop requested after {} frames", frame_count);
                break;
            }
            if self.config.max_frames.is_some_and(|max| frame_count >= max) {
                log::info!("[Chunk] Reached frame limit ({})", frame_count);
                break;
            }

            if controller.should_rotate(frame_count) {
                controller.rotate(frame_count, &mut self.render)?;
            } else {
                controller.drain()?;
            }

            match self.signal.await_and_clear(timeout) {
                Ok(()) => consecutive_timeouts = 0,
                Err(CaptureError::WaitTimeout(waited)) => {
                    self.stats.frame_wait_timeouts += 1;
                    consecutive_timeouts += 1;
                    log::warn!(
                        "[Capture] No frame after {:?} ({} in a row)",
                        waited, consecutive_timeouts
                    );
                    if consecutive_timeouts >= self.config.max_frame_wait_timeouts {
                        return Err(CaptureError::WaitTimeout(waited).into());
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let frame = self.capture.latch()?;

            if let Some(interval) = self.config.color_tweak_interval {
                if frame_count % interval as u64 == 0 {
                    let fragment = if frame_count & 1 != 0 { Some(SWAPPED_FRAGMENT_SHADER) } else { None };
                    self.render.replace_shader(fragment)?;
                }
            }

            self.render.draw(&frame)?;
            controller.publish(frame.timestamp_nanos)?;

            frame_count += 1;
            self.stats.frames_rendered = frame_count;
            log::trace!("[Render] Frame {} published at {}ns", frame_count, frame.timestamp_nanos);
        }

        Ok(())
    }
}

impl<C, G, B> Recorder<C, G, B>
where
    C: CaptureDevice + Send + 'static,
    G: GraphicsApi + Send + 'static,
    B: MediaBackend + Send + 'static,
{
    /// Run on a dedicated render thread.
    ///
    /// The graphics backend moves to that thread, so it must not be bound to
    /// the calling thread's context.
    pub fn spawn(self) -> Result<RecorderHandle> {
        let stop = self.stop_handle();
        let status = self.status.clone();
        let thread = std::thread::Builder::new()
            .name("chunkrec-render".into())
            .spawn(move || self.run())?;

        Ok(RecorderHandle { stop, status, thread: Some(thread) })
    }
}

/// Controls a recorder running on its own thread
pub struct RecorderHandle {
    stop: StopHandle,
    status: Arc<RwLock<RecorderStatus>>,
    thread: Option<JoinHandle<Result<RecordingSummary>>>,
}

impl RecorderHandle {
    /// Ask the recorder to stop. Returns immediately; use `join` to wait.
    pub fn stop(&self) {
        self.stop.request_stop();
    }

    pub fn status(&self) -> RecorderStatus {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn join(mut self) -> Result<RecordingSummary> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RecorderError::ThreadPanicked)?,
            None => Err(RecorderError::NotRecording),
        }
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.request_stop();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Pacing, SyntheticCamera};
    use crate::encoding::EncoderError;
    use crate::render::shaders::FRAGMENT_SHADER;
    use crate::render::HeadlessGraphics;
    use crate::test_harness::fake_gl::{fragment_compiles, RecordingGraphics};
    use crate::test_harness::loopback::{JournalEvent, LoopbackBackend};
    use std::time::Duration;

    fn config(dir: &std::path::Path, max_frames: u64) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            file_prefix: "chunktest".into(),
            frame_wait_timeout_ms: 2000,
            max_frames: Some(max_frames),
            ..Default::default()
        }
    }

    #[test]
    fn ten_seconds_at_thirty_fps_makes_two_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackBackend::new(3).with_files(true);
        let journal = backend.journal();
        let camera = SyntheticCamera::new(30, Pacing::Lockstep).with_frame_limit(300);

        let recorder = Recorder::new(config(dir.path(), 300), camera, HeadlessGraphics::new(), backend).unwrap();
        let summary = recorder.run().unwrap();

        assert_eq!(summary.chunks.len(), 2);
        assert_eq!(summary.stats.frames_rendered, 300);
        assert_eq!(summary.stats.rotations, 1);
        assert_eq!(summary.chunks[0].frames, 150);
        assert_eq!(summary.chunks[1].frames, 150);
        assert_eq!(summary.chunks[0].samples, 150);
        assert_eq!(summary.chunks[1].samples, 150);
        assert_eq!(summary.chunks[0].first_pts_us, Some(0));
        assert_eq!(summary.chunks[0].last_pts_us, Some(149 * 33_333_333 / 1000));
        assert_eq!(summary.chunks[1].first_pts_us, Some(150 * 33_333_333 / 1000));
        assert_eq!(summary.chunks[1].last_pts_us, Some(299 * 33_333_333 / 1000));
        assert!(summary.chunks.iter().all(|c| c.finalized && c.size_bytes > 0));
        assert!(dir.path().join("chunktest.640x480.1.mp4").exists());
        assert!(dir.path().join("chunktest.640x480.2.mp4").exists());
        assert!(summary.manifest_path().exists());

        let journal = journal.lock();
        assert_eq!(journal.sinks.len(), 2);
        for sink in &journal.sinks {
            assert_eq!(sink.count(|e| matches!(e, JournalEvent::AddTrack { .. })), 1);
            assert_eq!(sink.count(|e| matches!(e, JournalEvent::Start)), 1);
            assert_eq!(sink.count(|e| matches!(e, JournalEvent::Stop)), 1);
            assert_eq!(sink.count(|e| matches!(e, JournalEvent::Release)), 1);
        }
        assert!(journal.encoders.iter().all(|e| e.stops == 1 && e.outstanding_at_stop == 0));
    }

    #[test]
    fn color_tweak_alternates_shader_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SyntheticCamera::new(30, Pacing::Lockstep).with_frame_limit(45);
        let config = RecorderConfig { color_tweak_interval: Some(15), ..config(dir.path(), 45) };

        let graphics = RecordingGraphics::new();
        let calls = graphics.log_handle();

        let recorder = Recorder::new(config, camera, graphics, LoopbackBackend::new(0)).unwrap();
        let summary = recorder.run().unwrap();

        // Frames 0 and 30 use the default shader, frame 15 the swapped one
        assert_eq!(summary.stats.frames_rendered, 45);
        assert_eq!(summary.chunks.len(), 1);
        let calls = calls.lock();
        assert_eq!(fragment_compiles(&calls, SWAPPED_FRAGMENT_SHADER), 1);
        assert_eq!(fragment_compiles(&calls, FRAGMENT_SHADER), 2);
    }

    #[test]
    fn failed_rotation_keeps_finished_chunk_and_releases_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackBackend::new(2).with_files(true).with_encoder_failure_at(2);
        let journal = backend.journal();
        let camera = SyntheticCamera::new(30, Pacing::Lockstep).with_frame_limit(300);

        let recorder = Recorder::new(config(dir.path(), 300), camera, HeadlessGraphics::new(), backend).unwrap();
        let err = recorder.run().unwrap_err();

        assert!(matches!(err, RecorderError::Encoder(EncoderError::Configure(_))));
        let journal = journal.lock();
        assert_eq!(journal.sinks.len(), 2);
        assert_eq!(journal.encoders.len(), 1);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::WriteSample { .. })), 150);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Release)), 1);
        assert_eq!(journal.sinks[1].count(|e| matches!(e, JournalEvent::Release)), 1);
        assert_eq!(journal.sinks[1].count(|e| matches!(e, JournalEvent::Start)), 0);
        assert!(dir.path().join("chunktest.640x480.1.mp4").exists());
    }

    #[test]
    fn camera_silence_fails_and_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackBackend::new(0);
        let journal = backend.journal();
        let camera = SyntheticCamera::new(30, Pacing::Lockstep).with_frame_limit(3);
        let config = RecorderConfig {
            frame_wait_timeout_ms: 50,
            max_frames: None,
            ..config(dir.path(), 0)
        };

        let recorder = Recorder::new(config, camera, HeadlessGraphics::new(), backend).unwrap();
        let status = recorder.status.clone();
        let err = recorder.run().unwrap_err();

        assert!(matches!(err, RecorderError::Capture(CaptureError::WaitTimeout(_))));
        assert_eq!(err.component(), "capture");
        assert_eq!(*status.read(), RecorderStatus::Failed);

        let journal = journal.lock();
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Release)), 1);
        assert_eq!(journal.encoders[0].stops, 1);
        assert_eq!(journal.encoders[0].target_releases, 1);
    }

    #[test]
    fn stop_handle_ends_a_spawned_recording() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SyntheticCamera::new(120, Pacing::Realtime);
        let config = RecorderConfig { max_frames: None, ..config(dir.path(), 0) };

        let recorder = Recorder::new(config, camera, HeadlessGraphics::new(), LoopbackBackend::new(2)).unwrap();
        let handle = recorder.spawn().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(handle.is_running());

        handle.stop();
        handle.stop();
        let summary = handle.join().unwrap();

        assert!(summary.stats.frames_rendered > 0);
        assert_eq!(summary.chunks.len(), 1);
        assert_eq!(summary.chunks[0].samples, summary.stats.frames_rendered);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig { framerate: 0, ..config(dir.path(), 1) };
        let camera = SyntheticCamera::new(30, Pacing::Lockstep);

        let result = Recorder::new(config, camera, HeadlessGraphics::new(), LoopbackBackend::new(0));
        assert!(matches!(result, Err(RecorderError::Config(_))));
    }
}

// Chunk controller
//
// Decides when to rotate to a new output file and does the rotation: finalize
// the encoder, close the old file, open the next one and rebind the render
// stage to the new target. Also owns the ordered shutdown.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use super::backend::MediaBackend;
use super::drain::{DrainReport, DrainSettings};
use super::session::ChunkSession;
use super::summary::ChunkFileInfo;
use super::teardown::TeardownReport;
use super::{RecorderError, RecorderStatus};
use crate::capture::CaptureDevice;
use crate::container::chunk_path;
use crate::encoding::{ContainerFormat, FormatSpec};
use crate::render::{GraphicsApi, TextureRenderStage};

/// Where chunk files go and how they are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub container: ContainerFormat,
}

pub struct ChunkController<B: MediaBackend> {
    backend: B,
    spec: FormatSpec,
    layout: ChunkLayout,
    settings: DrainSettings,
    frames_per_chunk: u64,
    status: Arc<RwLock<RecorderStatus>>,
    session: Option<ChunkSession<B>>,
    next_index: u32,
    last_rotation_at: Option<u64>,
    completed: Vec<ChunkFileInfo>,
    rotations: u64,
    unexpected_eos: u64,
    stopped: bool,
}

impl<B: MediaBackend> ChunkController<B> {
    /// Open chunk 1 and make its target current
    pub fn start(
        backend: B,
        spec: FormatSpec,
        layout: ChunkLayout,
        settings: DrainSettings,
        frames_per_chunk: u64,
        status: Arc<RwLock<RecorderStatus>>,
    ) -> Result<Self, RecorderError> {
        if frames_per_chunk == 0 {
            return Err(RecorderError::Config("frames per chunk must be at least 1".into()));
        }

        let mut controller = Self {
            backend,
            spec,
            layout,
            settings,
            frames_per_chunk,
            status,
            session: None,
            next_index: 1,
            last_rotation_at: None,
            completed: Vec::new(),
            rotations: 0,
            unexpected_eos: 0,
            stopped: false,
        };
        controller.open_next()?;
        *controller.status.write() = RecorderStatus::Recording;
        Ok(controller)
    }

    fn open_next(&mut self) -> Result<(), RecorderError> {
        let index = self.next_index;
        let path = chunk_path(
            &self.layout.output_dir,
            &self.layout.file_prefix,
            &self.spec,
            self.layout.container,
            index,
        );
        let session = ChunkSession::open(&mut self.backend, &self.spec, index, path, self.settings)?;
        self.next_index += 1;
        self.session = Some(session);
        Ok(())
    }

    fn active(&mut self) -> Result<&mut ChunkSession<B>, RecorderError> {
        self.session.as_mut().ok_or(RecorderError::NotRecording)
    }

    fn note(&mut self, report: &DrainReport) {
        if report.unexpected_end_of_stream {
            self.unexpected_eos += 1;
        }
    }

    /// True when `frame_count` frames have been published and the current
    /// chunk is full
    pub fn should_rotate(&self, frame_count: u64) -> bool {
        frame_count != 0
            && frame_count % self.frames_per_chunk == 0
            && self.last_rotation_at != Some(frame_count)
    }

    /// Forward whatever the encoder has ready without waiting
    pub fn drain(&mut self) -> Result<(), RecorderError> {
        let report = self.active()?.drain(false)?;
        self.note(&report);
        Ok(())
    }

    pub fn publish(&mut self, timestamp_nanos: i64) -> Result<(), RecorderError> {
        self.active()?.publish(timestamp_nanos)
    }

    /// Close the current chunk and continue in a new one.
    ///
    /// On error the controller may be left without an active chunk; `stop()`
    /// still releases whatever is live.
    pub fn rotate<G: GraphicsApi>(
        &mut self,
        frame_count: u64,
        render: &mut TextureRenderStage<G>,
    ) -> Result<(), RecorderError> {
        *self.status.write() = RecorderStatus::Rotating;
        log::info!("[Chunk] Rotating after {} frames", frame_count);

        let report = self.active()?.drain(true)?;
        self.note(&report);

        if let Some(session) = self.session.take() {
            let (info, teardown) = session.close();
            self.completed.push(info);
            if !teardown.is_clean() {
                return Err(RecorderError::Teardown(teardown));
            }
        }

        self.open_next()?;
        render.rebind()?;

        self.rotations += 1;
        self.last_rotation_at = Some(frame_count);
        *self.status.write() = RecorderStatus::Recording;
        Ok(())
    }

    /// Release the camera, the render stage and the active chunk, in that order.
    ///
    /// With `flush` the encoder is finalized first so the last chunk is
    /// complete. Every step runs regardless of earlier failures. Calling this
    /// again does nothing.
    pub fn stop<C: CaptureDevice, G: GraphicsApi>(
        &mut self,
        capture: &mut C,
        render: &mut TextureRenderStage<G>,
        flush: bool,
    ) -> TeardownReport {
        let mut report = TeardownReport::new();
        if self.stopped {
            log::debug!("[Chunk] Already stopped");
            return report;
        }
        self.stopped = true;
        *self.status.write() = RecorderStatus::Stopping;

        if flush {
            if let Some(session) = self.session.as_mut() {
                match session.drain(true) {
                    Ok(drained) => self.note(&drained),
                    Err(e) => report.attempt("final drain", Err::<(), _>(e)),
                }
            }
        }

        report.attempt("camera", capture.stop());
        render.release();

        if let Some(session) = self.session.take() {
            let (info, teardown) = session.close();
            self.completed.push(info);
            report.merge(teardown);
        }

        *self.status.write() = RecorderStatus::Stopped;
        log::info!("[Chunk] Stopped after {} chunks", self.completed.len());
        report
    }

    pub fn completed(&self) -> &[ChunkFileInfo] {
        &self.completed
    }

    pub fn into_completed(self) -> Vec<ChunkFileInfo> {
        self.completed
    }

    pub fn current_chunk(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.index())
    }

    pub fn frames_per_chunk(&self) -> u64 {
        self.frames_per_chunk
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn unexpected_end_of_stream_count(&self) -> u64 {
        self.unexpected_eos
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn format(&self) -> &FormatSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticCamera;
    use crate::capture::Pacing;
    use crate::render::HeadlessGraphics;
    use crate::test_harness::loopback::{JournalEvent, LoopbackBackend};
    use crate::test_harness::scripted::test_format;

    fn layout() -> ChunkLayout {
        ChunkLayout {
            output_dir: PathBuf::from("/tmp/chunkrec-test"),
            file_prefix: "chunktest".into(),
            container: ContainerFormat::Mp4,
        }
    }

    fn controller(backend: LoopbackBackend, frames_per_chunk: u64) -> ChunkController<LoopbackBackend> {
        let status = Arc::new(RwLock::new(RecorderStatus::Starting));
        ChunkController::start(backend, test_format(), layout(), DrainSettings::default(), frames_per_chunk, status)
            .unwrap()
    }

    fn publish_frames(controller: &mut ChunkController<LoopbackBackend>, range: std::ops::Range<i64>) {
        for i in range {
            controller.drain().unwrap();
            controller.publish(i * 33_333_333).unwrap();
        }
    }

    #[test]
    fn rotation_boundaries() {
        let backend = LoopbackBackend::new(2);
        let controller = controller(backend, 150);

        assert!(!controller.should_rotate(0));
        assert!(!controller.should_rotate(149));
        assert!(controller.should_rotate(150));
        assert!(controller.should_rotate(300));
    }

    #[test]
    fn rotate_closes_chunk_and_rebinds_render_stage() {
        let backend = LoopbackBackend::new(3);
        let journal = backend.journal();
        let mut controller = controller(backend, 10);
        let mut render = TextureRenderStage::new(HeadlessGraphics::new());
        let texture = render.configure().unwrap();

        publish_frames(&mut controller, 0..10);
        controller.rotate(10, &mut render).unwrap();

        assert!(!controller.should_rotate(10));
        assert_eq!(controller.current_chunk(), Some(2));
        assert_eq!(controller.rotations(), 1);
        assert_eq!(render.texture(), Some(texture));
        assert_eq!(render.graphics().live_programs(), 1);

        let first = &controller.completed()[0];
        assert_eq!(first.index, 1);
        assert_eq!(first.filename, "chunktest.640x480.1.mp4");
        assert_eq!(first.frames, 10);
        assert_eq!(first.samples, 10);
        assert!(first.finalized);

        let journal = journal.lock();
        assert_eq!(journal.sinks.len(), 2);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Release)), 1);
        assert_eq!(journal.encoders[0].stops, 1);
        assert_eq!(journal.encoders[0].target_releases, 1);
        assert_eq!(journal.encoders[0].outstanding_at_stop, 0);
    }

    #[test]
    fn stop_twice_releases_once() {
        let backend = LoopbackBackend::new(1);
        let journal = backend.journal();
        let mut controller = controller(backend, 100);
        let mut render = TextureRenderStage::new(HeadlessGraphics::new());
        render.configure().unwrap();
        let mut camera = SyntheticCamera::new(30, Pacing::Lockstep);

        publish_frames(&mut controller, 0..5);

        let first = controller.stop(&mut camera, &mut render, true);
        let second = controller.stop(&mut camera, &mut render, true);
        assert!(first.is_clean());
        assert!(second.is_clean());
        assert!(controller.is_stopped());
        assert_eq!(*controller.status.read(), RecorderStatus::Stopped);
        assert_eq!(render.graphics().live_programs(), 0);

        let journal = journal.lock();
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Stop)), 1);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Release)), 1);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::WriteSample { .. })), 5);
        assert_eq!(journal.encoders[0].stops, 1);
        assert_eq!(controller.completed().len(), 1);
    }

    #[test]
    fn stop_without_flush_still_releases_session() {
        let backend = LoopbackBackend::new(4);
        let journal = backend.journal();
        let mut controller = controller(backend, 100);
        let mut render = TextureRenderStage::new(HeadlessGraphics::new());
        render.configure().unwrap();
        let mut camera = SyntheticCamera::new(30, Pacing::Lockstep);

        publish_frames(&mut controller, 0..3);
        let report = controller.stop(&mut camera, &mut render, false);

        assert!(report.is_clean());
        assert!(!controller.completed()[0].finalized);
        let journal = journal.lock();
        assert_eq!(journal.encoders[0].stops, 1);
        assert_eq!(journal.sinks[0].count(|e| matches!(e, JournalEvent::Release)), 1);
    }

    #[test]
    fn zero_frames_per_chunk_is_rejected() {
        let status = Arc::new(RwLock::new(RecorderStatus::Starting));
        let result = ChunkController::start(
            LoopbackBackend::new(0),
            test_format(),
            layout(),
            DrainSettings::default(),
            0,
            status,
        );
        assert!(matches!(result, Err(RecorderError::Config(_))));
    }
}

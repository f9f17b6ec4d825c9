// One chunk's worth of encoder, render target and container sink

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::backend::MediaBackend;
use super::drain::{DrainReport, DrainSequencer, DrainSettings, DrainState};
use super::summary::ChunkFileInfo;
use super::teardown::TeardownReport;
use super::RecorderError;
use crate::container::ContainerSink;
use crate::encoding::{EncoderPort, FormatSpec, RenderTarget};

pub struct ChunkSession<B: MediaBackend> {
    index: u32,
    path: PathBuf,
    encoder: B::Encoder,
    target: B::Target,
    sink: B::Sink,
    sequencer: DrainSequencer,
    frames_published: u64,
    started_at: DateTime<Utc>,
}

impl<B: MediaBackend> ChunkSession<B> {
    /// Open the sink, start the encoder and make its target current.
    ///
    /// Anything already acquired is released again if a later step fails.
    pub fn open(
        backend: &mut B,
        spec: &FormatSpec,
        index: u32,
        path: PathBuf,
        settings: DrainSettings,
    ) -> Result<Self, RecorderError> {
        let mut sink = backend.open_sink(&path)?;

        let (encoder, target) = match backend.start_encoder(spec) {
            Ok(started) => started,
            Err(e) => {
                let mut report = TeardownReport::new();
                report.attempt("sink", sink.release());
                return Err(e.into());
            }
        };

        let mut session = Self {
            index,
            path,
            encoder,
            target,
            sink,
            sequencer: DrainSequencer::new(settings),
            frames_published: 0,
            started_at: Utc::now(),
        };

        if let Err(e) = session.target.make_current() {
            session.release_all();
            return Err(e.into());
        }

        log::info!("[Chunk] Chunk {} recording to {}", index, session.path.display());
        Ok(session)
    }

    pub fn publish(&mut self, timestamp_nanos: i64) -> Result<(), RecorderError> {
        self.encoder.publish(&mut self.target, timestamp_nanos)?;
        self.frames_published += 1;
        Ok(())
    }

    pub fn drain(&mut self, end_of_stream: bool) -> Result<DrainReport, RecorderError> {
        self.sequencer.drain(&mut self.encoder, &mut self.sink, end_of_stream)
    }

    /// Release everything in encoder, target, sink order and describe the file
    pub fn close(mut self) -> (ChunkFileInfo, TeardownReport) {
        let report = self.release_all();
        let info = self.file_info();
        log::info!(
            "[Chunk] Chunk {} closed: {} frames, {} samples",
            self.index, self.frames_published, info.samples
        );
        (info, report)
    }

    fn release_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();
        report.attempt("encoder", self.encoder.stop());
        report.attempt("render target", self.target.release());
        report.attempt("container sink stop", self.sink.stop());
        report.attempt("container sink", self.sink.release());
        report
    }

    fn file_info(&self) -> ChunkFileInfo {
        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let filename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        ChunkFileInfo {
            index: self.index,
            filename,
            path: self.path.clone(),
            started_at: self.started_at,
            frames: self.frames_published,
            samples: self.sequencer.samples_written(),
            first_pts_us: self.sequencer.first_pts_us(),
            last_pts_us: self.sequencer.last_pts_us(),
            size_bytes,
            finalized: self.sequencer.state() == DrainState::Finished,
            unexpected_end_of_stream: self.sequencer.saw_unexpected_end_of_stream(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    pub fn sequencer(&self) -> &DrainSequencer {
        &self.sequencer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncoderError;
    use crate::test_harness::loopback::LoopbackBackend;
    use crate::test_harness::scripted::test_format;

    #[test]
    fn publish_after_stop_is_fatal() {
        let mut backend = LoopbackBackend::new(0);
        let (mut encoder, mut target) = backend.start_encoder(&test_format()).unwrap();

        encoder.publish(&mut target, 0).unwrap();
        encoder.stop().unwrap();

        let err = encoder.publish(&mut target, 33_333_333).unwrap_err();
        assert!(matches!(err, EncoderError::UsedAfterStop("publish")));
    }

    #[test]
    fn session_publish_after_release_surfaces_encoder_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LoopbackBackend::new(1);
        let journal = backend.journal();
        let path = dir.path().join("chunk.640x480.1.mp4");

        let mut session =
            ChunkSession::open(&mut backend, &test_format(), 1, path, DrainSettings::default()).unwrap();
        session.publish(0).unwrap();
        assert!(session.release_all().is_clean());

        let err = session.publish(33_333_333).unwrap_err();
        assert!(matches!(err, RecorderError::Encoder(EncoderError::UsedAfterStop("publish"))));
        assert_eq!(err.component(), "encoder");
        assert_eq!(session.frames_published(), 1);
        assert_eq!(journal.lock().encoders[0].published, 1);
    }
}

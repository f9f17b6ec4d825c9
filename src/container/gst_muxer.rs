// Container sink backed by a GStreamer muxer
//
// Pipeline: appsrc -> muxer -> filesink
//
// The pipeline is built when the track is added, since the appsrc caps need
// the encoder's reported format (including codec data).

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{ContainerError, ContainerSink, Result, SampleInfo, TrackIndex};
use crate::encoding::{ContainerFormat, FormatSpec};

struct MuxPipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
}

pub struct GstMuxerSink {
    path: PathBuf,
    container: ContainerFormat,
    mux: Option<MuxPipeline>,
    frame_duration_ns: u64,
    first_pts_us: Option<i64>,
    started: bool,
    stopped: bool,
    samples_written: u64,
}

impl GstMuxerSink {
    pub fn open(path: &Path, container: ContainerFormat) -> Result<Self> {
        crate::gstreamer_init::init_gstreamer().map_err(|e| ContainerError::Backend(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        log::debug!("[Muxer] Opened {} sink at {}", container.extension(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            container,
            mux: None,
            frame_duration_ns: 0,
            first_pts_us: None,
            started: false,
            stopped: false,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn build_pipeline(&self, format: &FormatSpec) -> Result<MuxPipeline> {
        let pipeline = gst::Pipeline::new();

        let mut caps = gst::Caps::builder(format.codec.gst_caps_name())
            .field("stream-format", format.codec.gst_stream_format())
            .field("alignment", "au")
            .field("width", format.width as i32)
            .field("height", format.height as i32)
            .field("framerate", gst::Fraction::new(format.framerate as i32, 1));
        if let Some(codec_data) = &format.codec_data {
            caps = caps.field("codec_data", gst::Buffer::from_slice(codec_data.clone()));
        }

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps.build())
            .format(gst::Format::Time)
            .build();

        let muxer = gst::ElementFactory::make(self.container.gst_muxer())
            .build()
            .map_err(|e| {
                ContainerError::Backend(format!("Failed to create {}: {}", self.container.gst_muxer(), e))
            })?;

        if self.container == ContainerFormat::Mkv {
            muxer.set_property("writing-app", "chunkrec");
        }

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", self.path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| ContainerError::Backend(format!("Failed to create filesink: {}", e)))?;

        pipeline
            .add_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| ContainerError::Backend(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| ContainerError::Backend(format!("Failed to link elements: {}", e)))?;

        Ok(MuxPipeline { pipeline, appsrc })
    }

    /// Send EOS and wait for the muxer to write its trailer
    fn finish(mux: &MuxPipeline) -> Result<()> {
        if let Err(e) = mux.appsrc.end_of_stream() {
            log::warn!("[Muxer] Failed to send EOS: {:?}", e);
        }

        let mut pipeline_error = None;
        if let Some(bus) = mux.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(5)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => break,
                    gst::MessageView::Error(err) => {
                        pipeline_error = Some(format!("Pipeline error: {} ({:?})", err.error(), err.debug()));
                        break;
                    }
                    _ => {}
                }
            }
        }

        let _ = mux.pipeline.set_state(gst::State::Null);
        match pipeline_error {
            Some(err) => Err(ContainerError::Backend(err)),
            None => Ok(()),
        }
    }
}

impl ContainerSink for GstMuxerSink {
    fn add_track(&mut self, format: &FormatSpec) -> Result<TrackIndex> {
        if self.started {
            return Err(ContainerError::InvalidState("add_track after start"));
        }
        if self.mux.is_some() {
            return Err(ContainerError::InvalidState("sink holds a single video track"));
        }

        self.mux = Some(self.build_pipeline(format)?);
        self.frame_duration_ns = format.frame_duration().as_nanos() as u64;
        log::info!("[Muxer] Added {} track to {}", format.mime_type(), self.path.display());
        Ok(TrackIndex(0))
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ContainerError::InvalidState("start called twice"));
        }
        let mux = self.mux.as_ref().ok_or(ContainerError::InvalidState("start without tracks"))?;
        mux.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ContainerError::Backend(format!("Failed to start muxer: {:?}", e)))?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: TrackIndex, payload: &[u8], info: &SampleInfo) -> Result<()> {
        if !self.started || self.stopped {
            return Err(ContainerError::NotStarted);
        }
        if track != TrackIndex(0) {
            return Err(ContainerError::UnknownTrack(track));
        }
        let mux = self.mux.as_ref().ok_or(ContainerError::NotStarted)?;

        let first = *self.first_pts_us.get_or_insert(info.presentation_time_us);
        let pts_us = info.presentation_time_us.saturating_sub(first).max(0) as u64;

        let mut buffer = gst::Buffer::from_slice(payload.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_useconds(pts_us));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_duration_ns));
            if !info.key_frame {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        mux.appsrc
            .push_buffer(buffer)
            .map_err(|e| ContainerError::Backend(format!("Failed to push buffer: {:?}", e)))?;
        self.samples_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if !self.started {
            log::debug!("[Muxer] Stopping sink that never started: {}", self.path.display());
            return Ok(());
        }

        let Some(mux) = self.mux.as_ref() else {
            return Ok(());
        };
        Self::finish(mux)?;
        log::info!(
            "[Muxer] Finalized {} ({} samples)",
            self.path.display(),
            self.samples_written
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mux) = self.mux.take() {
            mux.pipeline
                .set_state(gst::State::Null)
                .map_err(|e| ContainerError::Backend(format!("Failed to release muxer: {:?}", e)))?;
        }
        Ok(())
    }
}

impl Drop for GstMuxerSink {
    fn drop(&mut self) {
        if let Some(mux) = &self.mux {
            let _ = mux.pipeline.set_state(gst::State::Null);
        }
    }
}

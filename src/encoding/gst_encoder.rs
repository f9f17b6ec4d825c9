//! GStreamer encoder port
//!
//! Pipeline: `appsrc -> queue -> videoconvert -> encoder -> parser -> capsfilter -> appsink`
//!
//! The render target is a CPU staging surface: publishing a frame runs the
//! readback callback to fill it with the drawn pixels, then pushes the copy
//! into `appsrc`. `appsrc` blocks when its queue is full, which is the
//! encoder's backpressure. Output is pulled synchronously from `appsink`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{
    AccessUnit, AccessUnitFlags, ColorFormat, EncoderError, EncoderOutput, EncoderPort,
    FormatSpec, RenderTarget, Result, TimelineOrigin, VideoCodec,
};

/// Fills an RGBA frame of the given width and height
pub type ReadbackFn = Arc<dyn Fn(u32, u32, &mut [u8]) -> std::result::Result<(), String> + Send + Sync>;

/// Readback that paints a moving color bar instead of reading GPU memory.
///
/// Used when the render stage runs headless and there are no real pixels.
pub fn test_pattern_readback() -> ReadbackFn {
    let frame = Arc::new(AtomicU64::new(0));
    Arc::new(move |width, height, rgba| {
        let expected = width as usize * height as usize * 4;
        if rgba.len() < expected {
            return Err(format!("staging buffer holds {} bytes, need {}", rgba.len(), expected));
        }
        let n = frame.fetch_add(1, Ordering::Relaxed);
        let bar = (n % width.max(1) as u64) as u32;
        for (i, pixel) in rgba[..expected].chunks_exact_mut(4).enumerate() {
            let x = i as u32 % width;
            let lit = x.abs_diff(bar) < 8;
            pixel.copy_from_slice(&[if lit { 255 } else { 0 }, (x * 255 / width.max(1)) as u8, 64, 255]);
        }
        Ok(())
    })
}

/// Type of hardware encoder available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEncoderType {
    /// NVIDIA NVENC
    Nvenc,
    /// Intel QuickSync
    Qsv,
    /// VA-API (Linux)
    VaApi,
    /// Software fallback
    Software,
}

impl HardwareEncoderType {
    pub fn encoder_element(&self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (HardwareEncoderType::Nvenc, VideoCodec::H264) => "nvh264enc",
            (HardwareEncoderType::Nvenc, VideoCodec::H265) => "nvh265enc",
            (HardwareEncoderType::Qsv, VideoCodec::H264) => "qsvh264enc",
            (HardwareEncoderType::Qsv, VideoCodec::H265) => "qsvh265enc",
            (HardwareEncoderType::VaApi, VideoCodec::H264) => "vah264enc",
            (HardwareEncoderType::VaApi, VideoCodec::H265) => "vah265enc",
            (HardwareEncoderType::Software, VideoCodec::H264) => "x264enc",
            (HardwareEncoderType::Software, VideoCodec::H265) => "x265enc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HardwareEncoderType::Nvenc => "NVIDIA NVENC",
            HardwareEncoderType::Qsv => "Intel QuickSync",
            HardwareEncoderType::VaApi => "VA-API",
            HardwareEncoderType::Software => "Software",
        }
    }
}

/// Pick the best encoder present for `codec`, preferring hardware
pub fn detect_best_encoder(codec: VideoCodec) -> Option<HardwareEncoderType> {
    [
        HardwareEncoderType::Nvenc,
        HardwareEncoderType::Qsv,
        HardwareEncoderType::VaApi,
        HardwareEncoderType::Software,
    ]
    .into_iter()
    .find(|hw| gst::ElementFactory::find(hw.encoder_element(codec)).is_some())
}

/// CPU staging surface the frame is read back into before encoding
pub struct GstSurface {
    width: u32,
    height: u32,
    staging: Vec<u8>,
    readback: ReadbackFn,
    released: bool,
}

impl GstSurface {
    fn new(width: u32, height: u32, readback: ReadbackFn) -> Self {
        Self {
            width,
            height,
            staging: vec![0; width as usize * height as usize * 4],
            readback,
            released: false,
        }
    }

    fn capture(&mut self) -> Result<&[u8]> {
        if self.released {
            return Err(EncoderError::Surface("surface already released".into()));
        }
        (self.readback)(self.width, self.height, &mut self.staging).map_err(EncoderError::Surface)?;
        Ok(&self.staging)
    }
}

impl RenderTarget for GstSurface {
    fn make_current(&mut self) -> Result<()> {
        if self.released {
            return Err(EncoderError::Surface("surface already released".into()));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.staging = Vec::new();
        }
        Ok(())
    }
}

pub struct GstEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    spec: FormatSpec,
    /// Shared with the encoders of the other chunks; output PTS never restart
    origin: TimelineOrigin,
    /// First sample, held back while its format is reported
    held: Option<gst::Sample>,
    format_reported: bool,
    next_index: usize,
    outstanding: HashSet<usize>,
    stopped: bool,
}

impl GstEncoder {
    pub fn start(spec: &FormatSpec, readback: ReadbackFn, origin: TimelineOrigin) -> Result<(Self, GstSurface)> {
        crate::gstreamer_init::init_gstreamer()?;

        let hw_type = detect_best_encoder(spec.codec).ok_or_else(|| {
            EncoderError::Configure(format!("No encoder available for {}", spec.codec.display_name()))
        })?;
        log::info!(
            "[Encoder] Using {} for {} ({}x{} @ {}fps, {} bps)",
            hw_type.display_name(),
            spec.codec.display_name(),
            spec.width,
            spec.height,
            spec.framerate,
            spec.bitrate
        );

        let (pipeline, appsrc, appsink) = Self::create_pipeline(spec, hw_type)?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Configure(format!("Failed to start encoder pipeline: {:?}", e)))?;

        let mut reported = spec.clone();
        reported.color_format = ColorFormat::Rgba;

        let encoder = Self {
            pipeline,
            appsrc,
            appsink,
            spec: reported,
            origin,
            held: None,
            format_reported: false,
            next_index: 0,
            outstanding: HashSet::new(),
            stopped: false,
        };
        Ok((encoder, GstSurface::new(spec.width, spec.height, readback)))
    }

    fn create_pipeline(
        spec: &FormatSpec,
        hw_type: HardwareEncoderType,
    ) -> Result<(gst::Pipeline, gst_app::AppSrc, gst_app::AppSink)> {
        let pipeline = gst::Pipeline::new();
        let frame_bytes = spec.width as u64 * spec.height as u64 * 4;

        let caps = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgba, spec.width, spec.height)
            .fps(gst::Fraction::new(spec.framerate as i32, 1))
            .build()
            .map_err(|e| EncoderError::Configure(format!("Invalid raw video format: {}", e)))?
            .to_caps()
            .map_err(|e| EncoderError::Configure(format!("Failed to build raw caps: {}", e)))?;

        // Blocks publish() once a few frames are queued
        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .block(true)
            .max_bytes(frame_bytes * 4)
            .stream_type(gst_app::AppStreamType::Stream)
            .build();

        let queue = gst::ElementFactory::make("queue")
            .property("max-size-buffers", 8u32)
            .property("max-size-time", 0u64)
            .property("max-size-bytes", 0u32)
            .build()
            .map_err(|e| EncoderError::Configure(format!("Failed to create queue: {}", e)))?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| EncoderError::Configure(format!("Failed to create videoconvert: {}", e)))?;

        let encoder = Self::create_encoder(hw_type, spec)?;

        let parser = gst::ElementFactory::make(spec.codec.gst_parser())
            .build()
            .map_err(|e| {
                EncoderError::Configure(format!("Failed to create {}: {}", spec.codec.gst_parser(), e))
            })?;

        let out_caps = gst::Caps::builder(spec.codec.gst_caps_name())
            .field("stream-format", spec.codec.gst_stream_format())
            .field("alignment", "au")
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &out_caps)
            .build()
            .map_err(|e| EncoderError::Configure(format!("Failed to create capsfilter: {}", e)))?;

        let appsink = gst_app::AppSink::builder()
            .name("enc_sink")
            .sync(false)
            .build();

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &queue,
                &videoconvert,
                &encoder,
                &parser,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| EncoderError::Configure(format!("Failed to add elements: {}", e)))?;

        gst::Element::link_many([
            appsrc.upcast_ref(),
            &queue,
            &videoconvert,
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| EncoderError::Configure(format!("Failed to link elements: {}", e)))?;

        Ok((pipeline, appsrc, appsink))
    }

    fn create_encoder(hw_type: HardwareEncoderType, spec: &FormatSpec) -> Result<gst::Element> {
        let name = hw_type.encoder_element(spec.codec);
        let encoder = gst::ElementFactory::make(name)
            .build()
            .map_err(|e| EncoderError::Configure(format!("Failed to create {}: {}", name, e)))?;

        let kbps = (spec.bitrate / 1000).max(1);
        let gop = spec.keyframe_interval_frames();

        match hw_type {
            HardwareEncoderType::Nvenc => {
                encoder.set_property("bitrate", kbps);
                encoder.set_property("gop-size", gop as i32);
            }
            HardwareEncoderType::Qsv | HardwareEncoderType::VaApi => {
                encoder.set_property("bitrate", kbps);
            }
            HardwareEncoderType::Software => {
                encoder.set_property("bitrate", kbps);
                encoder.set_property("key-int-max", gop);
                encoder.set_property_from_str("speed-preset", "ultrafast");
                encoder.set_property_from_str("tune", "zerolatency");
            }
        }

        Ok(encoder)
    }

    fn format_from_sample(&self, sample: &gst::Sample) -> FormatSpec {
        let mut spec = self.spec.clone();
        let Some(structure) = sample.caps().and_then(|caps| caps.structure(0)) else {
            return spec;
        };

        if let Some(codec) = VideoCodec::from_gst_caps_name(structure.name().as_str()) {
            spec.codec = codec;
        }
        if let Ok(width) = structure.get::<i32>("width") {
            spec.width = width as u32;
        }
        if let Ok(height) = structure.get::<i32>("height") {
            spec.height = height as u32;
        }
        if let Ok(codec_data) = structure.get::<gst::Buffer>("codec_data") {
            if let Ok(map) = codec_data.map_readable() {
                spec.codec_data = Some(map.as_slice().to_vec());
            }
        }
        spec
    }

    fn access_unit(&mut self, sample: &gst::Sample) -> Result<AccessUnit> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| EncoderError::Backend("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| EncoderError::Backend("could not map encoded buffer".into()))?;
        let data = map.as_slice().to_vec();
        let flags = buffer.flags();

        let index = self.next_index;
        self.next_index += 1;
        self.outstanding.insert(index);

        Ok(AccessUnit {
            buffer_index: index,
            size: data.len(),
            data,
            offset: 0,
            presentation_time_us: buffer.pts().map(|t| t.useconds() as i64).unwrap_or(0),
            flags: AccessUnitFlags {
                key_frame: !flags.contains(gst::BufferFlags::DELTA_UNIT),
                codec_config: flags.contains(gst::BufferFlags::HEADER),
                end_of_stream: false,
            },
        })
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(EncoderError::Backend(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
        }
        Ok(())
    }
}

impl EncoderPort for GstEncoder {
    type Target = GstSurface;

    fn publish(&mut self, target: &mut GstSurface, timestamp_nanos: i64) -> Result<()> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("publish"));
        }

        let pts = self.origin.offset_nanos(timestamp_nanos);

        let mut buffer = gst::Buffer::from_slice(target.capture()?.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.spec.frame_duration().as_nanos() as u64));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Backend(format!("Failed to push buffer: {:?}", e)))?;
        Ok(())
    }

    fn poll_output(&mut self, timeout: Duration) -> Result<EncoderOutput> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("poll_output"));
        }

        if let Some(sample) = self.held.take() {
            return self.access_unit(&sample).map(EncoderOutput::BufferReady);
        }

        let pulled = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_useconds(timeout.as_micros() as u64));

        let Some(sample) = pulled else {
            self.check_bus()?;
            return Ok(if self.appsink.is_eos() {
                EncoderOutput::EndOfStream
            } else {
                EncoderOutput::NoOutputYet
            });
        };

        if !self.format_reported {
            self.format_reported = true;
            let format = self.format_from_sample(&sample);
            log::info!(
                "[Encoder] Output format: {} {}x{} (codec data: {} bytes)",
                format.mime_type(),
                format.width,
                format.height,
                format.codec_data.as_ref().map_or(0, Vec::len)
            );
            self.held = Some(sample);
            return Ok(EncoderOutput::FormatChanged(format));
        }

        self.access_unit(&sample).map(EncoderOutput::BufferReady)
    }

    fn release_output(&mut self, buffer_index: usize) -> Result<()> {
        if self.outstanding.remove(&buffer_index) {
            Ok(())
        } else {
            Err(EncoderError::Backend(format!("release of unknown output buffer {}", buffer_index)))
        }
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("signal_end_of_input"));
        }
        log::debug!("[Encoder] Sending EOS");
        self.appsrc
            .end_of_stream()
            .map_err(|e| EncoderError::Backend(format!("Failed to send EOS: {:?}", e)))?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if !self.outstanding.is_empty() {
            log::warn!("[Encoder] Stopping with {} unreleased output buffers", self.outstanding.len());
            self.outstanding.clear();
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| EncoderError::Backend(format!("Failed to stop encoder pipeline: {:?}", e)))?;
        Ok(())
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

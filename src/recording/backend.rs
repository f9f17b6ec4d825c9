// Media backend: the factory for encoders and container sinks
//
// Each chunk gets a fresh encoder, render target and sink from the backend.

use std::path::Path;

use crate::container::{ContainerError, ContainerSink};
use crate::encoding::{EncoderError, EncoderPort, FormatSpec, RenderTarget};

pub trait MediaBackend {
    type Target: RenderTarget;
    type Encoder: EncoderPort<Target = Self::Target>;
    type Sink: ContainerSink;

    /// Configure and start an encoder, returning it with its input target
    fn start_encoder(&mut self, spec: &FormatSpec) -> Result<(Self::Encoder, Self::Target), EncoderError>;

    /// Open a container sink writing to `path`
    fn open_sink(&mut self, path: &Path) -> Result<Self::Sink, ContainerError>;
}

#[cfg(feature = "gst")]
pub use self::gst_backend::GstBackend;

#[cfg(feature = "gst")]
mod gst_backend {
    use std::path::Path;

    use super::MediaBackend;
    use crate::container::{ContainerError, GstMuxerSink};
    use crate::encoding::{
        ContainerFormat, EncoderError, FormatSpec, GstEncoder, GstSurface, ReadbackFn, TimelineOrigin,
    };

    /// GStreamer encoders and muxers, with frames read back through `readback`.
    ///
    /// Every encoder it starts shares one timeline origin.
    pub struct GstBackend {
        container: ContainerFormat,
        readback: ReadbackFn,
        origin: TimelineOrigin,
    }

    impl GstBackend {
        pub fn new(container: ContainerFormat, readback: ReadbackFn) -> Self {
            Self { container, readback, origin: TimelineOrigin::new() }
        }
    }

    impl MediaBackend for GstBackend {
        type Target = GstSurface;
        type Encoder = GstEncoder;
        type Sink = GstMuxerSink;

        fn start_encoder(&mut self, spec: &FormatSpec) -> Result<(GstEncoder, GstSurface), EncoderError> {
            GstEncoder::start(spec, self.readback.clone(), self.origin.clone())
        }

        fn open_sink(&mut self, path: &Path) -> Result<GstMuxerSink, ContainerError> {
            GstMuxerSink::open(path, self.container)
        }
    }
}

//! GStreamer initialization
//!
//! Every GStreamer-backed encoder and muxer calls `init_gstreamer()` before
//! building a pipeline. Initialization runs once per process; its outcome is
//! cached so later callers see the same error.

use std::sync::OnceLock;

use crate::encoding::EncoderError;

static GSTREAMER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize GStreamer if it has not been initialized yet
pub fn init_gstreamer() -> Result<(), EncoderError> {
    GSTREAMER_INIT
        .get_or_init(|| match gstreamer::init() {
            Ok(()) => {
                log::info!("GStreamer initialized successfully");
                log_gstreamer_version();
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                Err(e.to_string())
            }
        })
        .clone()
        .map_err(EncoderError::Backend)
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    let nano_str = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    log::info!("GStreamer version: {}.{}.{}{}", major, minor, micro, nano_str);
}

/// Information about the GStreamer installation for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
pub struct GStreamerInfo {
    pub is_available: bool,
    pub version: Option<String>,
    pub plugin_path: Option<String>,
}

pub fn gstreamer_info() -> GStreamerInfo {
    let version = init_gstreamer().ok().map(|()| {
        let (major, minor, micro, _) = gstreamer::version();
        format!("{}.{}.{}", major, minor, micro)
    });

    GStreamerInfo {
        is_available: version.is_some(),
        version,
        plugin_path: std::env::var("GST_PLUGIN_PATH").ok(),
    }
}

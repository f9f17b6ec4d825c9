// Encoder that replays a fixed list of outputs

use std::collections::VecDeque;
use std::time::Duration;

use crate::encoding::{
    ColorFormat, EncoderError, EncoderOutput, EncoderPort, FormatSpec, RenderTarget, VideoCodec,
};

/// 640x480 H.264 at 30 fps, 6 Mbps
pub fn test_format() -> FormatSpec {
    FormatSpec {
        codec: VideoCodec::H264,
        width: 640,
        height: 480,
        bitrate: 6_000_000,
        framerate: 30,
        keyframe_interval_secs: 5,
        color_format: ColorFormat::Surface,
        codec_data: None,
    }
}

#[derive(Debug, Default)]
pub struct NullTarget;

impl RenderTarget for NullTarget {
    fn make_current(&mut self) -> Result<(), EncoderError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        Ok(())
    }
}

/// Returns the scripted outputs in order, then `NoOutputYet` forever
pub struct ScriptedEncoder {
    script: VecDeque<EncoderOutput>,
    polls: usize,
    released: Vec<usize>,
    end_of_input: bool,
    stopped: bool,
}

impl ScriptedEncoder {
    pub fn new(script: Vec<EncoderOutput>) -> Self {
        Self {
            script: script.into(),
            polls: 0,
            released: Vec::new(),
            end_of_input: false,
            stopped: false,
        }
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn released(&self) -> Vec<usize> {
        self.released.clone()
    }

    pub fn end_of_input_signalled(&self) -> bool {
        self.end_of_input
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl EncoderPort for ScriptedEncoder {
    type Target = NullTarget;

    fn publish(&mut self, _target: &mut NullTarget, _timestamp_nanos: i64) -> Result<(), EncoderError> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("publish"));
        }
        Ok(())
    }

    fn poll_output(&mut self, _timeout: Duration) -> Result<EncoderOutput, EncoderError> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("poll_output"));
        }
        self.polls += 1;
        Ok(self.script.pop_front().unwrap_or(EncoderOutput::NoOutputYet))
    }

    fn release_output(&mut self, buffer_index: usize) -> Result<(), EncoderError> {
        self.released.push(buffer_index);
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<(), EncoderError> {
        self.end_of_input = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.stopped = true;
        Ok(())
    }
}

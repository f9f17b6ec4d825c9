// In-memory media backend
//
// The encoder turns each published frame into a fake access unit after a
// configurable latency, the way a hardware encoder holds a few frames back.
// Sinks enforce the container contract and record every call in a shared
// journal; optionally they dump that record to the chunk path on stop so the
// validators can check files on disk.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::container::{ContainerError, ContainerSink, SampleInfo, TrackIndex};
use crate::encoding::{
    AccessUnit, AccessUnitFlags, EncoderError, EncoderOutput, EncoderPort, FormatSpec, RenderTarget,
};
use crate::recording::MediaBackend;

/// Decoder configuration the loopback encoder reports
pub const LOOPBACK_CODEC_DATA: &[u8] = &[0x01, 0x42, 0xc0, 0x1e, 0xff, 0xe1];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    AddTrack { mime: String, width: u32, height: u32, codec_data_len: usize },
    Start,
    WriteSample { track: usize, pts_us: i64, size: usize, key_frame: bool },
    Stop,
    Release,
}

/// Everything one sink was asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub path: PathBuf,
    pub events: Vec<JournalEvent>,
}

impl SinkRecord {
    pub fn count(&self, pred: impl Fn(&JournalEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn sample_pts(&self) -> Vec<i64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::WriteSample { pts_us, .. } => Some(*pts_us),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderRecord {
    pub published: u64,
    pub stops: u32,
    pub target_releases: u32,
    pub outstanding_at_stop: usize,
    pub end_of_input: bool,
}

#[derive(Debug, Default)]
pub struct LoopbackJournal {
    pub sinks: Vec<SinkRecord>,
    pub encoders: Vec<EncoderRecord>,
}

pub struct LoopbackSink {
    slot: usize,
    path: PathBuf,
    journal: Arc<Mutex<LoopbackJournal>>,
    write_file: bool,
    tracks: usize,
    started: bool,
    stopped: bool,
}

impl LoopbackSink {
    pub fn new(path: &Path, journal: Arc<Mutex<LoopbackJournal>>, write_file: bool) -> Self {
        let slot = {
            let mut journal = journal.lock();
            journal.sinks.push(SinkRecord { path: path.to_path_buf(), events: Vec::new() });
            journal.sinks.len() - 1
        };
        Self {
            slot,
            path: path.to_path_buf(),
            journal,
            write_file,
            tracks: 0,
            started: false,
            stopped: false,
        }
    }

    fn record(&self, event: JournalEvent) {
        self.journal.lock().sinks[self.slot].events.push(event);
    }

    fn dump(&self) -> Result<(), ContainerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = self.journal.lock().sinks[self.slot].clone();
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| ContainerError::Backend(format!("Failed to serialize chunk: {}", e)))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ContainerSink for LoopbackSink {
    fn add_track(&mut self, format: &FormatSpec) -> Result<TrackIndex, ContainerError> {
        if self.started {
            return Err(ContainerError::InvalidState("add_track after start"));
        }
        self.record(JournalEvent::AddTrack {
            mime: format.mime_type().to_string(),
            width: format.width,
            height: format.height,
            codec_data_len: format.codec_data.as_ref().map_or(0, Vec::len),
        });
        self.tracks += 1;
        Ok(TrackIndex(self.tracks - 1))
    }

    fn start(&mut self) -> Result<(), ContainerError> {
        if self.started {
            return Err(ContainerError::InvalidState("start called twice"));
        }
        if self.tracks == 0 {
            return Err(ContainerError::InvalidState("start without tracks"));
        }
        self.record(JournalEvent::Start);
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: TrackIndex, payload: &[u8], info: &SampleInfo) -> Result<(), ContainerError> {
        if !self.started || self.stopped {
            return Err(ContainerError::NotStarted);
        }
        if track.0 >= self.tracks {
            return Err(ContainerError::UnknownTrack(track));
        }
        self.record(JournalEvent::WriteSample {
            track: track.0,
            pts_us: info.presentation_time_us,
            size: payload.len(),
            key_frame: info.key_frame,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ContainerError> {
        self.record(JournalEvent::Stop);
        let first_stop = !self.stopped;
        self.stopped = true;
        if first_stop && self.started && self.write_file {
            self.dump()?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), ContainerError> {
        self.record(JournalEvent::Release);
        Ok(())
    }
}

pub struct LoopbackTarget {
    slot: usize,
    journal: Arc<Mutex<LoopbackJournal>>,
    released: bool,
}

impl LoopbackTarget {
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl RenderTarget for LoopbackTarget {
    fn make_current(&mut self) -> Result<(), EncoderError> {
        if self.released {
            return Err(EncoderError::Surface("target already released".into()));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), EncoderError> {
        self.journal.lock().encoders[self.slot].target_releases += 1;
        self.released = true;
        Ok(())
    }
}

pub struct LoopbackEncoder {
    slot: usize,
    journal: Arc<Mutex<LoopbackJournal>>,
    spec: FormatSpec,
    latency_frames: usize,
    pending: VecDeque<EncoderOutput>,
    delayed: VecDeque<AccessUnit>,
    format_sent: bool,
    frames: u64,
    next_index: usize,
    outstanding: HashSet<usize>,
    end_of_input: bool,
    stopped: bool,
}

impl LoopbackEncoder {
    fn next_index(&mut self) -> usize {
        self.next_index += 1;
        self.next_index - 1
    }

    fn frame_unit(&mut self, timestamp_nanos: i64) -> AccessUnit {
        let key_frame = self.frames % self.spec.keyframe_interval_frames() as u64 == 0;
        let mut data = vec![0, 0, 0, 1, if key_frame { 0x65 } else { 0x41 }];
        data.extend_from_slice(&timestamp_nanos.to_be_bytes());

        AccessUnit {
            buffer_index: self.next_index(),
            size: data.len(),
            data,
            offset: 0,
            presentation_time_us: timestamp_nanos / 1000,
            flags: AccessUnitFlags { key_frame, ..Default::default() },
        }
    }

    fn report_format(&mut self) {
        let mut format = self.spec.clone();
        format.codec_data = Some(LOOPBACK_CODEC_DATA.to_vec());
        self.pending.push_back(EncoderOutput::FormatChanged(format));

        let config = AccessUnit {
            buffer_index: self.next_index(),
            data: LOOPBACK_CODEC_DATA.to_vec(),
            offset: 0,
            size: LOOPBACK_CODEC_DATA.len(),
            presentation_time_us: 0,
            flags: AccessUnitFlags { codec_config: true, ..Default::default() },
        };
        self.pending.push_back(EncoderOutput::BufferReady(config));
        self.format_sent = true;
    }
}

impl EncoderPort for LoopbackEncoder {
    type Target = LoopbackTarget;

    fn publish(&mut self, target: &mut LoopbackTarget, timestamp_nanos: i64) -> Result<(), EncoderError> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("publish"));
        }
        if self.end_of_input {
            return Err(EncoderError::Backend("publish after end of input".into()));
        }
        if target.is_released() {
            return Err(EncoderError::Surface("publish to released target".into()));
        }

        if !self.format_sent {
            self.report_format();
        }

        let unit = self.frame_unit(timestamp_nanos);
        self.delayed.push_back(unit);
        while self.delayed.len() > self.latency_frames {
            if let Some(unit) = self.delayed.pop_front() {
                self.pending.push_back(EncoderOutput::BufferReady(unit));
            }
        }

        self.frames += 1;
        self.journal.lock().encoders[self.slot].published += 1;
        Ok(())
    }

    fn poll_output(&mut self, _timeout: Duration) -> Result<EncoderOutput, EncoderError> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("poll_output"));
        }
        match self.pending.pop_front() {
            Some(EncoderOutput::BufferReady(unit)) => {
                self.outstanding.insert(unit.buffer_index);
                Ok(EncoderOutput::BufferReady(unit))
            }
            Some(output) => Ok(output),
            None => Ok(EncoderOutput::NoOutputYet),
        }
    }

    fn release_output(&mut self, buffer_index: usize) -> Result<(), EncoderError> {
        if self.outstanding.remove(&buffer_index) {
            Ok(())
        } else {
            Err(EncoderError::Backend(format!("release of unknown output buffer {}", buffer_index)))
        }
    }

    fn signal_end_of_input(&mut self) -> Result<(), EncoderError> {
        if self.stopped {
            return Err(EncoderError::UsedAfterStop("signal_end_of_input"));
        }
        if self.end_of_input {
            return Ok(());
        }
        self.end_of_input = true;

        while let Some(unit) = self.delayed.pop_front() {
            self.pending.push_back(EncoderOutput::BufferReady(unit));
        }
        let eos = AccessUnit {
            buffer_index: self.next_index(),
            data: Vec::new(),
            offset: 0,
            size: 0,
            presentation_time_us: 0,
            flags: AccessUnitFlags { end_of_stream: true, ..Default::default() },
        };
        self.pending.push_back(EncoderOutput::BufferReady(eos));
        self.journal.lock().encoders[self.slot].end_of_input = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        let mut journal = self.journal.lock();
        let record = &mut journal.encoders[self.slot];
        record.stops += 1;
        if !self.stopped {
            record.outstanding_at_stop = self.outstanding.len();
        }
        self.stopped = true;
        Ok(())
    }
}

/// Backend handing out loopback encoders and sinks
pub struct LoopbackBackend {
    journal: Arc<Mutex<LoopbackJournal>>,
    latency_frames: usize,
    write_files: bool,
    fail_encoder_at: Option<usize>,
}

impl LoopbackBackend {
    pub fn new(latency_frames: usize) -> Self {
        Self {
            journal: Arc::new(Mutex::new(LoopbackJournal::default())),
            latency_frames,
            write_files: false,
            fail_encoder_at: None,
        }
    }

    /// Write each finished chunk's record to its path
    pub fn with_files(mut self, write_files: bool) -> Self {
        self.write_files = write_files;
        self
    }

    /// Make the `n`th encoder start (1-based) fail
    pub fn with_encoder_failure_at(mut self, n: usize) -> Self {
        self.fail_encoder_at = Some(n);
        self
    }

    pub fn journal(&self) -> Arc<Mutex<LoopbackJournal>> {
        self.journal.clone()
    }
}

impl MediaBackend for LoopbackBackend {
    type Target = LoopbackTarget;
    type Encoder = LoopbackEncoder;
    type Sink = LoopbackSink;

    fn start_encoder(&mut self, spec: &FormatSpec) -> Result<(LoopbackEncoder, LoopbackTarget), EncoderError> {
        let slot = {
            let mut journal = self.journal.lock();
            if self.fail_encoder_at == Some(journal.encoders.len() + 1) {
                return Err(EncoderError::Configure("injected encoder start failure".into()));
            }
            journal.encoders.push(EncoderRecord::default());
            journal.encoders.len() - 1
        };

        let encoder = LoopbackEncoder {
            slot,
            journal: self.journal.clone(),
            spec: spec.clone(),
            latency_frames: self.latency_frames,
            pending: VecDeque::new(),
            delayed: VecDeque::new(),
            format_sent: false,
            frames: 0,
            next_index: 0,
            outstanding: HashSet::new(),
            end_of_input: false,
            stopped: false,
        };
        let target = LoopbackTarget { slot, journal: self.journal.clone(), released: false };
        Ok((encoder, target))
    }

    fn open_sink(&mut self, path: &Path) -> Result<LoopbackSink, ContainerError> {
        Ok(LoopbackSink::new(path, self.journal.clone(), self.write_files))
    }
}

// Drain sequencer
//
// Moves everything the encoder has produced into the container sink. Called
// once per frame with `end_of_stream = false` (returns as soon as the encoder
// has nothing ready), and once per chunk with `end_of_stream = true` (signals
// end of input and spins until the encoder reports end of stream).
//
// The sink is started only after every expected track has been added, and no
// sample is written before that.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RecorderError;
use crate::container::{ContainerSink, SampleInfo, TrackIndex};
use crate::encoding::{AccessUnit, EncoderOutput, EncoderPort, FormatSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    /// Never drained
    Idle,
    /// Inside a drain call
    Draining,
    /// Drained, but the encoder has not reported its output format yet
    AwaitingFormat,
    /// Tracks added and sink started
    Muxing,
    /// The encoder reported end of stream
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainSettings {
    /// How long a single output poll may wait
    pub poll_timeout: Duration,
    /// Empty polls tolerated while finalizing before giving up
    pub finalize_max_polls: u32,
    /// Treat an end of stream nobody asked for as an error
    pub unexpected_eos_fatal: bool,
    pub expected_tracks: usize,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_micros(100),
            finalize_max_polls: 10_000,
            unexpected_eos_fatal: false,
            expected_tracks: 1,
        }
    }
}

/// What a single drain call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub samples_written: u64,
    pub config_discarded: u64,
    pub reached_end_of_stream: bool,
    pub unexpected_end_of_stream: bool,
}

pub struct DrainSequencer {
    settings: DrainSettings,
    state: DrainState,
    track: Option<TrackIndex>,
    tracks_added: usize,
    muxer_started: bool,
    format: Option<FormatSpec>,
    samples_written: u64,
    config_discarded: u64,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
    unexpected_end_of_stream: bool,
}

impl DrainSequencer {
    pub fn new(settings: DrainSettings) -> Self {
        Self {
            settings,
            state: DrainState::Idle,
            track: None,
            tracks_added: 0,
            muxer_started: false,
            format: None,
            samples_written: 0,
            config_discarded: 0,
            first_pts_us: None,
            last_pts_us: None,
            unexpected_end_of_stream: false,
        }
    }

    pub fn drain<E, S>(&mut self, encoder: &mut E, sink: &mut S, end_of_stream: bool) -> Result<DrainReport, RecorderError>
    where
        E: EncoderPort,
        S: ContainerSink,
    {
        let mut report = DrainReport::default();
        if self.state == DrainState::Finished {
            log::debug!("[Drain] Encoder already at end of stream, nothing to drain");
            return Ok(report);
        }

        log::trace!("[Drain] drain({})", end_of_stream);
        if end_of_stream {
            log::debug!("[Drain] Sending EOS to encoder");
            encoder.signal_end_of_input()?;
        }

        self.state = DrainState::Draining;
        let mut empty_polls = 0u32;

        loop {
            match encoder.poll_output(self.settings.poll_timeout)? {
                EncoderOutput::NoOutputYet => {
                    if !end_of_stream {
                        break;
                    }
                    empty_polls += 1;
                    if empty_polls >= self.settings.finalize_max_polls {
                        return Err(RecorderError::FinalizeTimeout { polls: empty_polls });
                    }
                    log::trace!("[Drain] No output available, spinning to await EOS");
                }
                EncoderOutput::FormatChanged(format) => {
                    empty_polls = 0;
                    self.on_format_changed(sink, format)?;
                }
                EncoderOutput::BufferReady(unit) => {
                    empty_polls = 0;
                    let eos = unit.flags.end_of_stream;
                    let forwarded = self.forward(sink, &unit, &mut report);
                    let released = encoder.release_output(unit.buffer_index);
                    forwarded?;
                    released?;

                    if eos {
                        self.on_end_of_stream(end_of_stream, &mut report)?;
                        break;
                    }
                }
                EncoderOutput::EndOfStream => {
                    self.on_end_of_stream(end_of_stream, &mut report)?;
                    break;
                }
            }
        }

        self.state = if report.reached_end_of_stream {
            DrainState::Finished
        } else if self.muxer_started {
            DrainState::Muxing
        } else {
            DrainState::AwaitingFormat
        };
        Ok(report)
    }

    fn on_format_changed<S: ContainerSink>(&mut self, sink: &mut S, format: FormatSpec) -> Result<(), RecorderError> {
        if self.format.is_some() {
            return Err(RecorderError::DuplicateFormatChange);
        }
        log::info!("[Drain] Encoder output format changed: {} {}x{}", format.mime_type(), format.width, format.height);

        let track = sink.add_track(&format)?;
        self.track = Some(track);
        self.format = Some(format);
        self.tracks_added += 1;

        if self.tracks_added >= self.settings.expected_tracks {
            sink.start()?;
            self.muxer_started = true;
            log::info!("[Drain] All tracks added. Muxer started");
        }
        Ok(())
    }

    fn forward<S: ContainerSink>(
        &mut self,
        sink: &mut S,
        unit: &AccessUnit,
        report: &mut DrainReport,
    ) -> Result<(), RecorderError> {
        if unit.flags.codec_config {
            // Already delivered to the sink through the format's codec data
            log::debug!("[Drain] Ignoring codec config buffer ({} bytes)", unit.size);
            self.config_discarded += 1;
            report.config_discarded += 1;
            return Ok(());
        }

        let payload = unit.payload();
        if payload.is_empty() {
            return Ok(());
        }

        let track = match (self.muxer_started, self.track) {
            (true, Some(track)) => track,
            _ => return Err(RecorderError::SamplesBeforeMuxerStart),
        };

        sink.write_sample(
            track,
            payload,
            &SampleInfo { presentation_time_us: unit.presentation_time_us, key_frame: unit.flags.key_frame },
        )?;

        self.samples_written += 1;
        report.samples_written += 1;
        self.first_pts_us.get_or_insert(unit.presentation_time_us);
        self.last_pts_us = Some(unit.presentation_time_us);
        log::trace!("[Drain] Sent {} bytes to muxer (pts {}us)", payload.len(), unit.presentation_time_us);
        Ok(())
    }

    fn on_end_of_stream(&mut self, requested: bool, report: &mut DrainReport) -> Result<(), RecorderError> {
        report.reached_end_of_stream = true;
        if requested {
            log::debug!("[Drain] End of stream reached");
            return Ok(());
        }

        log::warn!("[Drain] Reached end of stream unexpectedly");
        report.unexpected_end_of_stream = true;
        self.unexpected_end_of_stream = true;
        if self.settings.unexpected_eos_fatal {
            return Err(RecorderError::UnexpectedEndOfStream);
        }
        Ok(())
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn muxer_started(&self) -> bool {
        self.muxer_started
    }

    pub fn format(&self) -> Option<&FormatSpec> {
        self.format.as_ref()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn config_discarded(&self) -> u64 {
        self.config_discarded
    }

    pub fn first_pts_us(&self) -> Option<i64> {
        self.first_pts_us
    }

    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }

    pub fn saw_unexpected_end_of_stream(&self) -> bool {
        self.unexpected_end_of_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::AccessUnitFlags;
    use crate::test_harness::loopback::{JournalEvent, LoopbackJournal, LoopbackSink};
    use crate::test_harness::scripted::{test_format, ScriptedEncoder};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;

    fn unit(index: usize, pts: i64, flags: AccessUnitFlags) -> AccessUnit {
        AccessUnit {
            buffer_index: index,
            data: vec![0, 0, 0, 1, index as u8],
            offset: 0,
            size: 5,
            presentation_time_us: pts,
            flags,
        }
    }

    fn sink() -> (LoopbackSink, Arc<Mutex<LoopbackJournal>>) {
        let journal = Arc::new(Mutex::new(LoopbackJournal::default()));
        (LoopbackSink::new(Path::new("/tmp/chunk.1.mp4"), journal.clone(), false), journal)
    }

    #[test]
    fn finalize_forwards_everything_after_single_start() {
        let mut script = vec![EncoderOutput::NoOutputYet; 5];
        script.push(EncoderOutput::FormatChanged(test_format()));
        for i in 0..10 {
            script.push(EncoderOutput::BufferReady(unit(i, i as i64 * 33_333, AccessUnitFlags::default())));
        }
        script.push(EncoderOutput::EndOfStream);

        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        let report = drain.drain(&mut encoder, &mut sink, true).unwrap();

        assert_eq!(report.samples_written, 10);
        assert!(report.reached_end_of_stream);
        assert!(!report.unexpected_end_of_stream);
        assert_eq!(drain.state(), DrainState::Finished);
        assert!(encoder.end_of_input_signalled());
        assert_eq!(encoder.released(), (0..10).collect::<Vec<_>>());

        let journal = journal.lock();
        let events = &journal.sinks[0].events;
        assert_eq!(events.iter().filter(|e| matches!(e, JournalEvent::AddTrack { .. })).count(), 1);
        assert_eq!(events.iter().filter(|e| matches!(e, JournalEvent::Start)).count(), 1);
        assert_eq!(events.iter().filter(|e| matches!(e, JournalEvent::WriteSample { .. })).count(), 10);
        let start = events.iter().position(|e| matches!(e, JournalEvent::Start)).unwrap();
        let first_write = events.iter().position(|e| matches!(e, JournalEvent::WriteSample { .. })).unwrap();
        assert!(start < first_write);
    }

    #[test]
    fn non_final_drain_returns_on_first_empty_poll() {
        let script = vec![
            EncoderOutput::FormatChanged(test_format()),
            EncoderOutput::BufferReady(unit(0, 0, AccessUnitFlags::default())),
            EncoderOutput::NoOutputYet,
            EncoderOutput::BufferReady(unit(1, 33_333, AccessUnitFlags::default())),
        ];
        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        let report = drain.drain(&mut encoder, &mut sink, false).unwrap();
        assert_eq!(report.samples_written, 1);
        assert_eq!(drain.state(), DrainState::Muxing);
        assert!(!encoder.end_of_input_signalled());

        let report = drain.drain(&mut encoder, &mut sink, false).unwrap();
        assert_eq!(report.samples_written, 1);
        assert_eq!(drain.samples_written(), 2);
        assert_eq!(drain.first_pts_us(), Some(0));
        assert_eq!(drain.last_pts_us(), Some(33_333));
    }

    #[test]
    fn codec_config_buffers_are_discarded_and_released() {
        let config = AccessUnitFlags { codec_config: true, ..Default::default() };
        let script = vec![
            EncoderOutput::BufferReady(unit(0, 0, config)),
            EncoderOutput::FormatChanged(test_format()),
            EncoderOutput::BufferReady(unit(1, 0, AccessUnitFlags { key_frame: true, ..Default::default() })),
        ];
        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        let report = drain.drain(&mut encoder, &mut sink, false).unwrap();
        assert_eq!(report.config_discarded, 1);
        assert_eq!(report.samples_written, 1);
        assert_eq!(encoder.released(), vec![0, 1]);
    }

    #[test]
    fn second_format_change_is_fatal() {
        let script = vec![
            EncoderOutput::FormatChanged(test_format()),
            EncoderOutput::FormatChanged(test_format()),
        ];
        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        let err = drain.drain(&mut encoder, &mut sink, false).unwrap_err();
        assert!(matches!(err, RecorderError::DuplicateFormatChange));
    }

    #[test]
    fn media_before_format_is_fatal_but_buffer_is_released() {
        let script = vec![EncoderOutput::BufferReady(unit(4, 0, AccessUnitFlags::default()))];
        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        let err = drain.drain(&mut encoder, &mut sink, false).unwrap_err();
        assert!(matches!(err, RecorderError::SamplesBeforeMuxerStart));
        assert_eq!(encoder.released(), vec![4]);
        assert!(journal.lock().sinks[0].events.is_empty());
    }

    #[test]
    fn unexpected_end_of_stream_is_a_warning_by_default() {
        let eos = AccessUnitFlags { end_of_stream: true, ..Default::default() };
        let mut empty_eos = unit(0, 0, eos);
        empty_eos.size = 0;
        let script = vec![EncoderOutput::FormatChanged(test_format()), EncoderOutput::BufferReady(empty_eos)];

        let mut encoder = ScriptedEncoder::new(script.clone());
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());
        let report = drain.drain(&mut encoder, &mut sink, false).unwrap();
        assert!(report.unexpected_end_of_stream);
        assert_eq!(report.samples_written, 0);
        assert!(drain.saw_unexpected_end_of_stream());
        assert_eq!(drain.state(), DrainState::Finished);

        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, _journal) = self::sink();
        let mut drain = DrainSequencer::new(DrainSettings { unexpected_eos_fatal: true, ..Default::default() });
        let err = drain.drain(&mut encoder, &mut sink, false).unwrap_err();
        assert!(matches!(err, RecorderError::UnexpectedEndOfStream));
    }

    #[test]
    fn finalize_gives_up_after_poll_budget() {
        let mut encoder = ScriptedEncoder::new(Vec::new());
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings {
            poll_timeout: Duration::ZERO,
            finalize_max_polls: 25,
            ..Default::default()
        });

        let err = drain.drain(&mut encoder, &mut sink, true).unwrap_err();
        assert!(matches!(err, RecorderError::FinalizeTimeout { polls: 25 }));
    }

    #[test]
    fn poll_budget_counts_only_consecutive_silence() {
        // 20 empty polls between each output: more than the budget in total,
        // never more than it in a row
        let mut script = vec![EncoderOutput::NoOutputYet; 20];
        script.push(EncoderOutput::FormatChanged(test_format()));
        for i in 0..3 {
            script.extend(vec![EncoderOutput::NoOutputYet; 20]);
            script.push(EncoderOutput::BufferReady(unit(i, i as i64 * 33_333, AccessUnitFlags::default())));
        }
        script.extend(vec![EncoderOutput::NoOutputYet; 20]);
        script.push(EncoderOutput::EndOfStream);

        let mut encoder = ScriptedEncoder::new(script);
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings {
            poll_timeout: Duration::ZERO,
            finalize_max_polls: 25,
            ..Default::default()
        });

        let report = drain.drain(&mut encoder, &mut sink, true).unwrap();
        assert!(report.reached_end_of_stream);
        assert_eq!(drain.samples_written(), 3);
        assert_eq!(drain.state(), DrainState::Finished);
    }

    #[test]
    fn drain_after_finish_is_a_no_op() {
        let mut encoder = ScriptedEncoder::new(vec![EncoderOutput::EndOfStream]);
        let (mut sink, _journal) = sink();
        let mut drain = DrainSequencer::new(DrainSettings::default());

        drain.drain(&mut encoder, &mut sink, true).unwrap();
        let report = drain.drain(&mut encoder, &mut sink, true).unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(encoder.polls(), 1);
    }
}

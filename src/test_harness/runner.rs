use std::path::Path;
use std::time::Instant;

use crate::capture::{Pacing, SyntheticCamera};
use crate::config::RecorderConfig;
use crate::recording::{Recorder, RecordingSummary};
use crate::render::shaders::SWAPPED_FRAGMENT_SHADER;

use super::fake_gl::{fragment_compiles, RecordingGraphics};
use super::loopback::LoopbackBackend;
use super::validators;

// ── Test case types ──────────────────────────────────────────────────

/// What outputs we expect from a test.
#[derive(Debug, Clone)]
pub struct Expected {
    /// Frames in each chunk, in order
    pub chunk_frames: Vec<u64>,
    /// Whether the swapped fragment shader must have been compiled
    pub swapped_shader: bool,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    /// Recorder settings; `output_dir` and `max_frames` are filled in per run
    pub config: RecorderConfig,
    /// Frames the synthetic camera produces
    pub frames: u64,
    /// Frames the loopback encoder holds back
    pub latency_frames: usize,
    pub expected: Expected,
}

/// Result of a single test run.
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

// ── Test execution ───────────────────────────────────────────────────

pub fn run_test(case: &TestCase, keep_outputs: bool) -> TestResult {
    let start = Instant::now();
    let mut errors: Vec<String> = Vec::new();

    let dir = match tempfile::Builder::new().prefix("chunkrec-it-").tempdir() {
        Ok(dir) => dir,
        Err(e) => return failed(case, start, format!("Failed to create output dir: {}", e)),
    };

    // 1. Build the recorder
    let config = RecorderConfig {
        output_dir: dir.path().to_path_buf(),
        max_frames: Some(case.frames),
        ..case.config.clone()
    };
    let camera = SyntheticCamera::new(config.framerate, Pacing::Lockstep).with_frame_limit(case.frames);
    let graphics = RecordingGraphics::new();
    let calls = graphics.log_handle();
    let backend = LoopbackBackend::new(case.latency_frames).with_files(true);
    let journal = backend.journal();

    let recorder = match Recorder::new(config, camera, graphics, backend) {
        Ok(recorder) => recorder,
        Err(e) => return failed(case, start, format!("Failed to create recorder: {}", e)),
    };

    // 2. Record
    let summary = match recorder.run() {
        Ok(summary) => summary,
        Err(e) => return failed(case, start, format!("Recording failed in {}: {}", e.component(), e)),
    };

    // 3. Validate summary and files
    validate_summary(&mut errors, case, &summary);
    validate_outputs(&mut errors, dir.path(), &summary);

    // 4. Validate resource release
    {
        let journal = journal.lock();
        for (i, encoder) in journal.encoders.iter().enumerate() {
            if encoder.stops != 1 || encoder.target_releases != 1 {
                errors.push(format!(
                    "Encoder {} stopped {} times, target released {} times",
                    i + 1,
                    encoder.stops,
                    encoder.target_releases
                ));
            }
            if encoder.outstanding_at_stop != 0 {
                errors.push(format!(
                    "Encoder {} stopped with {} output buffers outstanding",
                    i + 1,
                    encoder.outstanding_at_stop
                ));
            }
        }
    }

    // 5. Validate shader switching
    let swapped = fragment_compiles(&calls.lock(), SWAPPED_FRAGMENT_SHADER) > 0;
    if swapped != case.expected.swapped_shader {
        errors.push(format!(
            "Swapped shader compiled: {} (expected {})",
            swapped, case.expected.swapped_shader
        ));
    }

    // 6. Cleanup
    if keep_outputs {
        let kept = dir.keep();
        println!("    Outputs kept in {}", kept.display());
    }

    TestResult {
        name: case.name.clone(),
        passed: errors.is_empty(),
        duration_ms: start.elapsed().as_millis() as u64,
        errors,
    }
}

fn failed(case: &TestCase, start: Instant, error: String) -> TestResult {
    TestResult {
        name: case.name.clone(),
        passed: false,
        duration_ms: start.elapsed().as_millis() as u64,
        errors: vec![error],
    }
}

fn validate_summary(errors: &mut Vec<String>, case: &TestCase, summary: &RecordingSummary) {
    if summary.stats.frames_rendered != case.frames {
        errors.push(format!(
            "Rendered {} frames, expected {}",
            summary.stats.frames_rendered, case.frames
        ));
    }

    let frames: Vec<u64> = summary.chunks.iter().map(|c| c.frames).collect();
    if frames != case.expected.chunk_frames {
        errors.push(format!(
            "Chunk frame counts {:?} != expected {:?}",
            frames, case.expected.chunk_frames
        ));
    }

    for chunk in &summary.chunks {
        if chunk.samples != chunk.frames {
            errors.push(format!(
                "Chunk {} muxed {} samples for {} frames",
                chunk.index, chunk.samples, chunk.frames
            ));
        }
        if !chunk.finalized {
            errors.push(format!("Chunk {} was not finalized", chunk.index));
        }
    }

    validate_chunk_order(errors, summary);
}

/// The first sample of each chunk must come after the last sample of the one before
fn validate_chunk_order(errors: &mut Vec<String>, summary: &RecordingSummary) {
    for pair in summary.chunks.windows(2) {
        match (pair[0].last_pts_us, pair[1].first_pts_us) {
            (Some(last), Some(first)) if first <= last => errors.push(format!(
                "Chunk {} starts at {}us, before chunk {} ends at {}us",
                pair[1].index, first, pair[0].index, last
            )),
            (Some(_), Some(_)) => {}
            _ => errors.push(format!(
                "Chunks {} and {} are missing sample timestamps",
                pair[0].index, pair[1].index
            )),
        }
    }
}

fn validate_outputs(errors: &mut Vec<String>, dir: &Path, summary: &RecordingSummary) {
    match validators::validate_manifest(dir) {
        Ok(manifest) => {
            if manifest.chunks.len() != summary.chunks.len() {
                errors.push(format!(
                    "Manifest lists {} chunks, recorder reported {}",
                    manifest.chunks.len(),
                    summary.chunks.len()
                ));
            }
        }
        Err(e) => errors.push(format!("Manifest validation failed: {}", e)),
    }

    for chunk in &summary.chunks {
        match validators::validate_chunk_dump(&chunk.path) {
            Ok(v) => {
                if v.samples as u64 != chunk.samples {
                    errors.push(format!(
                        "{} holds {} samples, summary says {}",
                        chunk.filename, v.samples, chunk.samples
                    ));
                }
                if v.width != summary.format.width || v.height != summary.format.height {
                    errors.push(format!(
                        "{} resolution {}x{} != expected {}x{}",
                        chunk.filename, v.width, v.height, summary.format.width, summary.format.height
                    ));
                }
                if v.first_pts_us != chunk.first_pts_us || v.last_pts_us != chunk.last_pts_us {
                    errors.push(format!(
                        "{} pts range {:?}..{:?} != summary {:?}..{:?}",
                        chunk.filename, v.first_pts_us, v.last_pts_us, chunk.first_pts_us, chunk.last_pts_us
                    ));
                }
                if v.key_frames == 0 {
                    errors.push(format!("{} has no key frame", chunk.filename));
                }
            }
            Err(e) => errors.push(format!("Validation failed for {}: {}", chunk.filename, e)),
        }
    }
}

/// Record through the real GStreamer encoder and muxer and inspect the
/// resulting files with the Discoverer.
#[cfg(feature = "gst")]
pub fn run_gst_test(case: &TestCase, keep_outputs: bool) -> TestResult {
    use crate::encoding::test_pattern_readback;
    use crate::recording::GstBackend;
    use crate::render::HeadlessGraphics;

    let start = Instant::now();
    let mut errors: Vec<String> = Vec::new();

    let dir = match tempfile::Builder::new().prefix("chunkrec-gst-").tempdir() {
        Ok(dir) => dir,
        Err(e) => return failed(case, start, format!("Failed to create output dir: {}", e)),
    };

    let config = RecorderConfig {
        output_dir: dir.path().to_path_buf(),
        max_frames: Some(case.frames),
        ..case.config.clone()
    };
    let camera = SyntheticCamera::new(config.framerate, Pacing::Lockstep).with_frame_limit(case.frames);
    let backend = GstBackend::new(config.container, test_pattern_readback());
    let chunk_secs = config.chunk_duration_secs as f64;

    let summary = match Recorder::new(config, camera, HeadlessGraphics::new(), backend).and_then(|r| r.run()) {
        Ok(summary) => summary,
        Err(e) => return failed(case, start, format!("Recording failed in {}: {}", e.component(), e)),
    };

    let frames: Vec<u64> = summary.chunks.iter().map(|c| c.frames).collect();
    if frames != case.expected.chunk_frames {
        errors.push(format!(
            "Chunk frame counts {:?} != expected {:?}",
            frames, case.expected.chunk_frames
        ));
    }

    validate_chunk_order(&mut errors, &summary);

    for chunk in &summary.chunks {
        if chunk.samples == 0 {
            errors.push(format!("{} has no samples", chunk.filename));
            continue;
        }
        match validators::validate_container(&chunk.path) {
            Ok(v) => {
                if v.width != summary.format.width || v.height != summary.format.height {
                    errors.push(format!(
                        "{} resolution {}x{} != expected {}x{}",
                        chunk.filename, v.width, v.height, summary.format.width, summary.format.height
                    ));
                }
                let expected_secs = chunk.frames as f64 / summary.format.framerate as f64;
                if (v.duration_secs - expected_secs).abs() > 0.5 || v.duration_secs > chunk_secs + 0.5 {
                    errors.push(format!(
                        "{} duration {:.2}s outside expected {:.2}s",
                        chunk.filename, v.duration_secs, expected_secs
                    ));
                }
            }
            Err(e) => errors.push(format!("Validation failed for {}: {}", chunk.filename, e)),
        }
    }

    if keep_outputs {
        let kept = dir.keep();
        println!("    Outputs kept in {}", kept.display());
    }

    TestResult {
        name: case.name.clone(),
        passed: errors.is_empty(),
        duration_ms: start.elapsed().as_millis() as u64,
        errors,
    }
}

/// Print a formatted summary of all test results.
pub fn print_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;

    println!("\n  === Test Results ===\n");

    for (i, result) in results.iter().enumerate() {
        let status = if result.passed { "PASS" } else { "FAIL" };
        let duration = format!("{:.1}s", result.duration_ms as f64 / 1000.0);
        println!(
            "  [{}/{}] {} {} {} ({})",
            i + 1,
            results.len(),
            result.name,
            ".".repeat(50_usize.saturating_sub(result.name.len())),
            status,
            duration
        );
        for err in &result.errors {
            println!("         -> {}", err);
        }
    }

    println!();
    if failed == 0 {
        println!("  Results: {} passed, 0 failed", passed);
    } else {
        println!("  Results: {} passed, {} FAILED", passed, failed);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::super::permutations::build_test_matrix;
    use super::*;

    fn summary_with_chunks(ranges: &[(i64, i64)]) -> RecordingSummary {
        use crate::recording::{ChunkFileInfo, RecordingStats};
        use crate::test_harness::scripted::test_format;

        let chunks = ranges
            .iter()
            .enumerate()
            .map(|(i, &(first, last))| ChunkFileInfo {
                index: i as u32 + 1,
                filename: format!("it.640x480.{}.mp4", i + 1),
                path: format!("it.640x480.{}.mp4", i + 1).into(),
                started_at: chrono::Utc::now(),
                frames: 150,
                samples: 150,
                first_pts_us: Some(first),
                last_pts_us: Some(last),
                size_bytes: 0,
                finalized: true,
                unexpected_end_of_stream: false,
            })
            .collect();

        RecordingSummary {
            recording_id: "it".into(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            output_dir: std::path::PathBuf::from("."),
            format: test_format(),
            chunks,
            stats: RecordingStats::default(),
        }
    }

    #[test]
    fn chunk_restarting_at_zero_is_reported() {
        let mut errors = Vec::new();
        validate_chunk_order(&mut errors, &summary_with_chunks(&[(0, 4_966_666), (0, 4_966_666)]));
        assert_eq!(errors.len(), 1, "{:?}", errors);

        let mut errors = Vec::new();
        validate_chunk_order(&mut errors, &summary_with_chunks(&[(0, 4_966_666), (5_000_000, 9_966_666)]));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn whole_matrix_passes() {
        for case in build_test_matrix() {
            let result = run_test(&case, false);
            assert!(result.passed, "{} failed: {:?}", result.name, result.errors);
        }
    }
}

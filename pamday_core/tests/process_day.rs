use hound::{SampleFormat, WavSpec, WavWriter};
use pamday_core::{
    CancellationToken, Config, ConfigurationError, DaySummary, InputLayout, MatchError,
    ProcessError, SegmentProcessor,
};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const SAMPLE_RATE: u32 = 100;

/// Write a mono 16-bit recording of a slow sine.
///
/// Every window gets a non-trivial spectrum while minutes of audio stay small.
fn write_recording<P: AsRef<Path>>(path: P, seconds: u32) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for n in 0..SAMPLE_RATE * seconds {
        let theta = (n as f32 / SAMPLE_RATE as f32) * 2.0 * std::f32::consts::PI * 7.0;
        writer.write_sample((theta.sin() * i16::MAX as f32 * 0.5) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn write_json<P: AsRef<Path>>(path: P, body: &str) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Result<Self, Box<dyn Error>> {
        let root = tempdir()?;
        fs::create_dir_all(root.path().join("json"))?;
        fs::create_dir_all(root.path().join("wav"))?;
        Ok(Self { root })
    }

    fn json_dir(&self) -> PathBuf {
        self.root.path().join("json")
    }

    fn wav_dir(&self) -> PathBuf {
        self.root.path().join("wav")
    }

    fn layout(&self) -> InputLayout {
        InputLayout::new(self.json_dir()).audio_base_dir(self.wav_dir())
    }
}

fn read_report(path: &Path) -> Result<serde_json::Value, Box<dyn Error>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn output_files(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, Box<dyn Error>> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        files.insert(name, fs::read(&path)?);
    }
    Ok(files)
}

#[test]
fn matches_the_recording_that_started_most_recently() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("2022/20220902.json"),
        r#"{"start": "2022-09-02T10:00:00Z", "end": "2022-09-02T10:05:00Z"}"#,
    )?;
    write_recording(fixture.wav_dir().join("MARS-20220902T095800Z.wav"), 480)?;
    write_recording(fixture.wav_dir().join("MARS-20220902T101000Z.wav"), 60)?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;
    let summary = processor.process_day(2022, 9, 2)?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.total, 1);

    let report = read_report(&output.path().join("psd_20220902T100000Z.json"))?;
    assert_eq!(report["status"], "processed");
    assert_eq!(report["start"], "2022-09-02T10:00:00Z");
    assert_eq!(report["end"], "2022-09-02T10:05:00Z");
    assert!(report["audio_path"]
        .as_str()
        .unwrap()
        .ends_with("MARS-20220902T095800Z.wav"));
    assert_eq!(report["recording_start"], "2022-09-02T09:58:00Z");
    assert_eq!(report["metrics"]["sample_rate"], SAMPLE_RATE);
    assert_eq!(report["metrics"]["num_samples"], 300 * SAMPLE_RATE);
    Ok(())
}

#[test]
fn extracted_audio_is_written_only_on_request() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("20220902.json"),
        r#"{"start": "2022-09-02T10:00:00Z", "duration_secs": 30}"#,
    )?;
    write_recording(fixture.wav_dir().join("MARS-20220902T100000Z.wav"), 60)?;

    let plain = tempdir()?;
    SegmentProcessor::new(fixture.layout(), Config::new(plain.path())?)?.process_day(2022, 9, 2)?;
    let names: Vec<_> = output_files(plain.path())?.into_keys().collect();
    assert_eq!(names, vec!["psd_20220902T100000Z.json"]);

    let extracting = tempdir()?;
    let config = Config::builder(extracting.path())
        .save_extracted_wav(true)
        .build()?;
    SegmentProcessor::new(fixture.layout(), config)?.process_day(2022, 9, 2)?;
    let names: Vec<_> = output_files(extracting.path())?.into_keys().collect();
    assert_eq!(
        names,
        vec!["extracted_20220902T100000Z.wav", "psd_20220902T100000Z.json"]
    );

    let reader = hound::WavReader::open(extracting.path().join("extracted_20220902T100000Z.wav"))?;
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.duration(), 30 * SAMPLE_RATE);
    Ok(())
}

#[test]
fn segments_without_prior_audio_are_skipped() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("20220902.json"),
        r#"{"start": "2022-09-02T10:00:00Z", "end": "2022-09-02T10:05:00Z"}"#,
    )?;
    write_recording(fixture.wav_dir().join("MARS-20220902T101000Z.wav"), 10)?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;
    let summary = processor.process_day(2022, 9, 2)?;
    assert_eq!(
        summary,
        DaySummary {
            total: 1,
            unmatched: 1,
            ..DaySummary::default()
        }
    );
    assert!(output_files(output.path())?.is_empty());

    let plan = processor.plan_day(2022, 9, 2)?;
    let items: Vec<_> = plan.iter().collect();
    assert!(matches!(items[0], Err(MatchError::NoAudio { .. })));
    Ok(())
}

fn multi_segment_fixture() -> Result<Fixture, Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("20220902.json"),
        r#"[
            {"start": "2022-09-02T10:00:00Z", "duration_secs": 20},
            {"start": "2022-09-02T10:01:00Z", "duration_secs": 20},
            {"start": "2022-09-02T10:02:00Z", "duration_secs": 20}
        ]"#,
    )?;
    write_json(
        fixture.json_dir().join("extra/20220902T103000Z.json"),
        r#"{"start": "2022-09-02T10:30:00Z", "duration_secs": 10}"#,
    )?;
    write_json(
        fixture.json_dir().join("20220903.json"),
        r#"{"start": "2022-09-03T10:00:00Z", "duration_secs": 10}"#,
    )?;
    write_recording(fixture.wav_dir().join("MARS-20220902T100000Z.wav"), 180)?;
    write_recording(fixture.wav_dir().join("deep/MARS_20220902_102500.wav"), 600)?;
    Ok(fixture)
}

#[test]
fn outputs_do_not_depend_on_worker_count() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;

    let mut runs = Vec::new();
    for cpus in [1, 2, 0] {
        let output = tempdir()?;
        let config = Config::builder(output.path()).num_cpus(cpus).build()?;
        let summary = SegmentProcessor::new(fixture.layout(), config)?.process_day(2022, 9, 2)?;
        assert_eq!(summary.processed, 4, "cpus = {cpus}");
        runs.push(output_files(output.path())?);
    }

    assert_eq!(runs[0].len(), 4);
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], runs[2]);
    Ok(())
}

#[test]
fn repeated_runs_produce_identical_files() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;

    let first = tempdir()?;
    let second = tempdir()?;
    for output in [&first, &second] {
        let config = Config::builder(output.path())
            .save_extracted_wav(true)
            .build()?;
        SegmentProcessor::new(fixture.layout(), config)?.process_day(2022, 9, 2)?;
    }

    let first = output_files(first.path())?;
    assert_eq!(first.len(), 8);
    assert_eq!(first, output_files(second.path())?);
    Ok(())
}

#[test]
fn existing_results_are_skipped_unless_overwriting() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;
    let output = tempdir()?;
    let stale = output.path().join("psd_20220902T100000Z.json");
    fs::write(&stale, "stale")?;

    let summary = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?
        .process_day(2022, 9, 2)?;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 3);
    assert_eq!(fs::read_to_string(&stale)?, "stale");

    let config = Config::builder(output.path()).overwrite(true).build()?;
    let summary = SegmentProcessor::new(fixture.layout(), config)?.process_day(2022, 9, 2)?;
    assert_eq!(summary.processed, 4);
    assert_eq!(read_report(&stale)?["status"], "processed");
    Ok(())
}

#[test]
fn run_fails_only_when_every_attempt_fails() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("20220902.json"),
        r#"[
            {"start": "2022-09-02T10:00:00Z", "duration_secs": 20},
            {"start": "2022-09-02T10:01:00Z", "duration_secs": 20}
        ]"#,
    )?;
    fs::write(
        fixture.wav_dir().join("MARS-20220902T100000Z.wav"),
        b"not an audio file",
    )?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;
    match processor.process_day(2022, 9, 2) {
        Err(ProcessError::AllSegmentsFailed { failed }) => assert_eq!(failed, 2),
        other => panic!("unexpected result: {other:?}"),
    }

    // A later, healthy recording takes over the second segment.
    write_recording(fixture.wav_dir().join("MARS-20220902T100030Z.wav"), 120)?;
    let summary = processor.process_day(2022, 9, 2)?;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    Ok(())
}

#[test]
fn metadata_only_mode_uses_metadata_uris() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let recording = fixture.wav_dir().join("MARS-20220902T100000Z.wav");
    write_recording(&recording, 60)?;

    // The prefix is prepended verbatim to the recorded URI.
    let wav_dir = fixture.wav_dir();
    let (prefix, relative) = wav_dir.to_str().unwrap().split_at(4);
    let body = format!(
        r#"[
            {{"start": "2022-09-02T10:00:00Z", "duration_secs": 10,
              "uri": "file://{relative}/MARS-20220902T100000Z.wav"}},
            {{"start": "2022-09-02T11:00:00Z", "duration_secs": 10}}
        ]"#
    );
    write_json(fixture.json_dir().join("20220902.json"), &body)?;

    let output = tempdir()?;
    let layout = InputLayout::new(fixture.json_dir()).audio_path_prefix(prefix);
    let summary = SegmentProcessor::new(layout, Config::new(output.path())?)?
        .process_day(2022, 9, 2)?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.metadata_only, 1);

    let processed = read_report(&output.path().join("psd_20220902T100000Z.json"))?;
    assert_eq!(
        processed["audio_path"].as_str(),
        recording.to_str()
    );
    let metadata_only = read_report(&output.path().join("psd_20220902T110000Z.json"))?;
    assert_eq!(metadata_only["status"], "metadata_only");
    assert!(metadata_only["metrics"].is_null());
    assert!(metadata_only["audio_path"].is_null());
    Ok(())
}

#[test]
fn windows_are_clipped_to_the_requested_day() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    write_json(
        fixture.json_dir().join("20220901_20220902.json"),
        r#"[
            {"start": "2022-09-01T23:59:30Z", "end": "2022-09-02T00:00:30Z"},
            {"start": "2022-09-01T12:00:00Z", "duration_secs": 60},
            {"start": "2022-09-02T23:59:50Z", "end": "2022-09-03T00:00:10Z"}
        ]"#,
    )?;
    write_recording(fixture.wav_dir().join("MARS-20220901T235900Z.wav"), 120)?;
    write_recording(fixture.wav_dir().join("MARS-20220902T235900Z.wav"), 120)?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;
    let plan = processor.plan_day(2022, 9, 2)?;
    let segments: Vec<_> = plan.iter().collect::<Result<_, _>>()?;
    assert_eq!(segments.len(), 2);
    for segment in &segments {
        assert!(segment.start_time >= chrono_day(2, 0));
        assert!(segment.end_time <= chrono_day(3, 0));
    }
    assert_eq!(segments[0].identifier(), "20220902T000000Z");
    assert_eq!(segments[1].identifier(), "20220902T235950Z");

    processor.process_day(2022, 9, 2)?;
    let first = read_report(&output.path().join("psd_20220902T000000Z.json"))?;
    assert_eq!(first["metrics"]["num_samples"], 30 * SAMPLE_RATE);
    let last = read_report(&output.path().join("psd_20220902T235950Z.json"))?;
    assert_eq!(last["end"], "2022-09-03T00:00:00Z");
    assert_eq!(last["metrics"]["num_samples"], 10 * SAMPLE_RATE);
    Ok(())
}

fn chrono_day(day: u32, hour: u32) -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc
        .with_ymd_and_hms(2022, 9, day, hour, 0, 0)
        .unwrap()
}

#[test]
fn plans_are_ordered_and_restartable() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;
    write_json(fixture.json_dir().join("20220902_broken.json"), "{ nope")?;
    write_json(
        fixture.json_dir().join("20220902_dup.json"),
        r#"{"start": "2022-09-02T10:01:00Z", "duration_secs": 5}"#,
    )?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;
    let plan = processor.plan_day(2022, 9, 2)?;

    let first: Vec<_> = plan.iter().collect();
    let second: Vec<_> = plan.iter().collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), plan.len());

    assert!(matches!(first[0], Err(MatchError::InvalidMetadata { .. })));
    let identifiers: Vec<_> = first[1..]
        .iter()
        .map(|item| match item {
            Ok(segment) => segment.identifier(),
            Err(MatchError::DuplicateSegment { identifier, .. }) => format!("dup {identifier}"),
            Err(other) => panic!("unexpected item: {other:?}"),
        })
        .collect();
    assert_eq!(
        identifiers,
        vec![
            "20220902T100000Z",
            "20220902T100100Z",
            "dup 20220902T100100Z",
            "20220902T100200Z",
            "20220902T103000Z",
        ]
    );

    let late = first[5].as_ref().unwrap();
    assert!(late
        .audio_path()
        .unwrap()
        .ends_with("deep/MARS_20220902_102500.wav"));
    Ok(())
}

#[test]
fn out_of_range_metadata_does_not_stop_the_day() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;
    write_json(
        fixture.json_dir().join("20220902_ranges.json"),
        r#"[
            {"start": "2022-09-02T10:10:00Z", "duration_secs": 1e13},
            {"start": "2022-09-02T10:33:00Z", "end": "9999-12-31T23:59:59Z"}
        ]"#,
    )?;

    let output = tempdir()?;
    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?;

    let plan = processor.plan_day(2022, 9, 2)?;
    match plan.iter().next() {
        Some(Err(MatchError::InvalidMetadata { path, reason })) => {
            assert!(path.ends_with("20220902_ranges.json"));
            assert!(reason.contains("out of range"), "reason: {reason}");
        }
        other => panic!("expected invalid metadata first, got {other:?}"),
    }

    let summary = processor.process_day(2022, 9, 2)?;
    assert_eq!(
        summary,
        DaySummary {
            total: 6,
            processed: 5,
            unmatched: 1,
            ..DaySummary::default()
        }
    );

    let report = read_report(&output.path().join("psd_20220902T103300Z.json"))?;
    assert_eq!(report["end"], "2022-09-03T00:00:00Z");
    // The recording ends at 10:35, two minutes into the clipped window.
    assert_eq!(report["metrics"]["num_samples"], 120 * SAMPLE_RATE);
    Ok(())
}

#[test]
fn cancelled_runs_start_no_segments() -> Result<(), Box<dyn Error>> {
    let fixture = multi_segment_fixture()?;
    let output = tempdir()?;
    let token = CancellationToken::new();
    token.cancel();

    let processor = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?
        .with_cancellation(token);
    let summary = processor.process_day(2022, 9, 2)?;
    assert_eq!(summary.cancelled, 4);
    assert_eq!(summary.attempted(), 0);
    assert!(output_files(output.path())?.is_empty());
    Ok(())
}

#[test]
fn missing_directories_are_configuration_errors() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let output = tempdir()?;

    let layout = InputLayout::new(fixture.root.path().join("absent"));
    let err = SegmentProcessor::new(layout, Config::new(output.path())?)?
        .process_day(2022, 9, 2)
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Configuration(ConfigurationError::MissingDirectory { .. })
    ));

    let layout = InputLayout::new(fixture.json_dir()).audio_base_dir(fixture.root.path().join("nowav"));
    let err = SegmentProcessor::new(layout, Config::new(output.path())?)?
        .process_day(2022, 9, 2)
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Configuration(ConfigurationError::MissingDirectory { .. })
    ));

    let err = SegmentProcessor::new(fixture.layout(), Config::new(output.path())?)?
        .process_day(2022, 2, 29)
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Configuration(ConfigurationError::InvalidDate { .. })
    ));
    Ok(())
}

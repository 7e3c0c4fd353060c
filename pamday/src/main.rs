mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use pamday_core::{
    CancellationToken, Config, DaySummary, InputLayout, ProgressReporter, PsdSettings,
    SegmentOutcome, SegmentProcessor,
};

use crate::cli::build_cli;

/// Drives an indicatif bar from the processor's progress callbacks.
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_segment(&self, outcome: &SegmentOutcome) {
        match outcome {
            SegmentOutcome::Done(result) => self.bar.set_message(result.segment_identifier.clone()),
            SegmentOutcome::Failed { identifier, .. } => {
                self.bar.set_message(format!("{identifier} failed"))
            }
            SegmentOutcome::Unmatched(_) | SegmentOutcome::Cancelled { .. } => {}
        }
        self.bar.inc(1);
    }

    fn on_finish(&self, _summary: &DaySummary) {
        self.bar.set_message(String::from("Completed"));
    }
}

fn summary_line(summary: &DaySummary) -> String {
    let mut line = format!(
        "Processed {} of {} item(s): {} with audio, {} metadata-only, {} skipped, {} unmatched, {} failed",
        summary.processed + summary.metadata_only,
        summary.total,
        summary.processed,
        summary.metadata_only,
        summary.skipped,
        summary.unmatched,
        summary.failed,
    );
    if summary.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", summary.cancelled));
    }
    line.push('.');
    line
}

/// Cancel on the first interrupt. Returns `true` when this interrupt should
/// abort the process instead.
fn interrupt(token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return true;
    }
    token.cancel();
    false
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = build_cli().get_matches();

    let json_base_dir = matches
        .get_one::<PathBuf>("json-base-dir")
        .expect("required argument");
    let audio_base_dir = matches.get_one::<PathBuf>("audio-base-dir");
    let audio_path_prefix = matches
        .get_one::<String>("audio-path-prefix")
        .expect("defaulted argument");
    let year = *matches.get_one::<i32>("year").expect("required argument");
    let month = *matches.get_one::<u32>("month").expect("required argument");
    let day = *matches.get_one::<u32>("day").expect("required argument");
    let output_dir = matches
        .get_one::<PathBuf>("output-dir")
        .expect("required argument");
    let num_cpus = *matches.get_one::<usize>("cpus").expect("defaulted argument");
    let sensitivity_db = *matches
        .get_one::<f64>("sensitivity")
        .expect("defaulted argument");
    let window_secs = *matches
        .get_one::<f64>("window-secs")
        .expect("defaulted argument");

    let mut layout =
        InputLayout::new(json_base_dir).audio_path_prefix(audio_path_prefix.as_str());
    if let Some(dir) = audio_base_dir {
        layout = layout.audio_base_dir(dir);
    }

    let config = Config::builder(output_dir)
        .save_extracted_wav(matches.get_flag("save-extracted-wav"))
        .num_cpus(num_cpus)
        .overwrite(matches.get_flag("overwrite"))
        .psd_settings(PsdSettings {
            window_secs,
            sensitivity_db,
            ..PsdSettings::default()
        })
        .build()
        .context("failed to create configuration")?;

    let date_label = format!("{year:04}-{month:02}-{day:02}");
    let processor =
        SegmentProcessor::new(layout, config).context("failed to create segment processor")?;

    if matches.get_flag("dry-run") {
        let plan = processor
            .plan_day(year, month, day)
            .with_context(|| format!("failed to plan {date_label}"))?;

        if plan.is_empty() {
            println!("Dry run: no segments found for {date_label}.");
        } else {
            println!("Dry run: would process {} item(s) for {date_label}:", plan.len());
            for item in &plan {
                match item {
                    Ok(segment) => match segment.audio_path() {
                        Some(path) => {
                            println!("  {}  {}", segment.identifier(), path.display())
                        }
                        None => println!("  {}  (metadata only)", segment.identifier()),
                    },
                    Err(err) => println!("  skipped: {err}"),
                }
            }
        }

        return Ok(());
    }

    let token = processor.cancellation().clone();
    ctrlc::set_handler(move || {
        if interrupt(&token) {
            // Abandon segments still running.
            std::process::exit(130);
        }
        eprintln!("\nInterrupt received, finishing running segments (press Ctrl-C again to abort)");
    })
    .context("failed to install interrupt handler")?;

    let reporter = BarReporter::new();
    let result = processor
        .process_day_with_progress(year, month, day, &reporter)
        .with_context(|| format!("failed to process {date_label}"));

    reporter.bar.finish_and_clear();

    if processor.cancellation().is_cancelled() {
        match &result {
            Ok(summary) => println!("{}", summary_line(summary)),
            Err(err) => warn!("{err:#}"),
        }
        println!("\nInterrupted");
        return Ok(());
    }

    let summary = result?;
    println!("{}", summary_line(&summary));

    Ok(())
}

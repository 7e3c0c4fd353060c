use std::path::PathBuf;

use clap::{builder::ValueParser, value_parser, Arg, ArgAction, Command};

const EXAMPLES: &str = "\
Examples:
    pamday --json-base-dir=tests/json \\
           --audio-base-dir=tests/wav \\
           --year=2022 --month=9 --day=2 \\
           --output-dir=output";

/// Parse a strictly positive, finite number of seconds.
pub fn parse_seconds(value: &str) -> Result<f64, String> {
    let input = value.trim();
    if input.is_empty() {
        return Err("seconds cannot be empty".into());
    }

    let seconds: f64 = input
        .parse()
        .map_err(|_| format!("invalid number of seconds '{value}'"))?;
    if !seconds.is_finite() {
        return Err(format!("invalid number of seconds '{value}'"));
    }
    if seconds <= 0.0 {
        return Err("seconds must be greater than zero".into());
    }

    Ok(seconds)
}

/// Parse a finite decibel value, negative values included.
pub fn parse_decibels(value: &str) -> Result<f64, String> {
    let decibels: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid decibel value '{value}'"))?;
    if !decibels.is_finite() {
        return Err(format!("invalid decibel value '{value}'"));
    }
    Ok(decibels)
}

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Per-day PSD processing of passive acoustic monitoring data")
        .version(env!("CARGO_PKG_VERSION"))
        .after_help(EXAMPLES)
        .arg(
            Arg::new("json-base-dir")
                .long("json-base-dir")
                .value_name("dir")
                .help("JSON base directory")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("audio-base-dir")
                .long("audio-base-dir")
                .value_name("dir")
                .help("Audio base directory. By default, none (metadata-only mode)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("audio-path-prefix")
                .long("audio-path-prefix")
                .value_name("dir")
                .help(
                    "Ad hoc path prefix for audio locations, for example /Volumes. \
                     By default, no prefix applied",
                )
                .default_value(""),
        )
        .arg(
            Arg::new("year")
                .long("year")
                .value_name("YYYY")
                .help("Year")
                .required(true)
                .value_parser(value_parser!(i32)),
        )
        .arg(
            Arg::new("month")
                .long("month")
                .value_name("M")
                .help("Month")
                .required(true)
                .value_parser(value_parser!(u32).range(1..=12)),
        )
        .arg(
            Arg::new("day")
                .long("day")
                .value_name("D")
                .help("Day")
                .required(true)
                .value_parser(value_parser!(u32).range(1..=31)),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_name("dir")
                .help("Output directory")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("save-extracted-wav")
                .long("save-extracted-wav")
                .help("Save each extracted segment")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cpus")
                .short('j')
                .long("cpus")
                .value_name("num")
                .help("Number of cpus to use. 0 will indicate all available cpus")
                .default_value("1")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .help("Replace result files left by an earlier run instead of skipping them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("List the segments that would be processed without writing files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sensitivity")
                .long("sensitivity")
                .value_name("dB")
                .help("Hydrophone sensitivity subtracted from every level")
                .default_value("0")
                .allow_negative_numbers(true)
                .value_parser(ValueParser::new(parse_decibels)),
        )
        .arg(
            Arg::new("window-secs")
                .long("window-secs")
                .value_name("SECONDS")
                .help("Length of each Welch window")
                .default_value("1")
                .value_parser(ValueParser::new(parse_seconds)),
        )
}

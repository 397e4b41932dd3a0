//! Parse an access log and print method/status aggregates.
//!
//! Mostly a parser exerciser: it reports the achieved line rate and a small
//! JSON aggregate, which is handy when tuning a new `--format` string.

#![deny(unused_import_braces, unused_qualifications)]

use accesslog::{LogFormat, ParseOptions};
use color_eyre::eyre::{Context as _, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Parse an access log file and print per-method and per-status counts.
#[derive(Debug, clap::Parser)]
struct CliArgs {
    /// Log format directive string, e.g. `%h %^ %^ [%t] "%r" %s %b "%^" "%u"`
    #[clap(long = "format")]
    format: String,
    /// Skip URI and User-Agent extraction
    #[clap(long = "skip-strings")]
    skip_strings: bool,
    /// Optional output file for the JSON aggregate (stdout when absent)
    #[clap(long = "output")]
    output: Option<PathBuf>,

    file: PathBuf,
}

#[derive(Debug, Default, serde::Serialize)]
struct Aggregate {
    total_lines: u64,
    parsed_requests: u64,
    dropped_lines: u64,
    unparseable_ips: u64,
    lines_per_sec: f64,
    methods: BTreeMap<String, u64>,
    statuses: BTreeMap<u16, u64>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args: CliArgs = clap::Parser::parse();

    let format = LogFormat::compile(&args.format)
        .with_context(|| format!("invalid log format {:?}", args.format))?;
    let opts = ParseOptions {
        skip_string_fields: args.skip_strings,
        skip_non_ip_fields: false,
    };

    let outcome = accesslog::parse_file(&args.file, &format, opts)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let mut aggregate = Aggregate {
        total_lines: outcome.total_lines,
        parsed_requests: outcome.requests.len() as u64,
        dropped_lines: outcome.dropped_lines,
        lines_per_sec: outcome.lines_per_sec(),
        ..Default::default()
    };
    for request in &outcome.requests {
        if request.ip == 0 {
            aggregate.unparseable_ips += 1;
        }
        *aggregate
            .methods
            .entry(request.method.to_string())
            .or_default() += 1;
        *aggregate.statuses.entry(request.status).or_default() += 1;
    }

    let json = serde_json::to_string_pretty(&aggregate)?;
    match args.output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}

//! Detect abusive CIDR ranges in HTTP access logs and maintain jail/ban
//! artifacts for firewall consumption.

#![deny(unused_import_braces, unused_qualifications)]

use color_eyre::eyre::Result;
use rangeguard::config::CliConfigArgs;
use rangeguard::report::{ErrorKind, Notice};
use rangeguard::{Analysis, Config};
use std::path::PathBuf;

/// Cluster dense request sources in an access log into CIDR ranges.
///
/// The analysis is configured either with `--config <TOML>` or with the
/// individual flags, which describe a single trie context. Both roads
/// produce identical results for equivalent settings.
#[derive(Debug, clap::Parser)]
#[clap(name = "rangeguard")]
struct CliArgs {
    /// TOML configuration file; when set, the per-trie flags are ignored
    #[clap(long = "config")]
    config: Option<PathBuf>,
    /// Print the full analysis as JSON instead of text
    #[clap(long = "json")]
    json: bool,
    #[clap(flatten)]
    flags: CliConfigArgs,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args: CliArgs = clap::Parser::parse();

    let config = match &args.config {
        Some(path) => Config::from_toml_file(path),
        None => Config::from_cli(&args.flags),
    };
    let mut analysis = match config {
        Ok(config) => rangeguard::run(&config),
        Err(err) => {
            // Still render the envelope so callers see the named error.
            let mut analysis = Analysis::default();
            analysis
                .errors
                .push(Notice::new(ErrorKind::ConfigError, err.to_string()));
            analysis
        }
    };
    analysis.sort_cidrs_for_output();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        render_text(&analysis);
    }

    if analysis.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn render_text(analysis: &Analysis) {
    let summary = &analysis.summary;
    println!(
        "{}: {} lines, {} requests ({} dropped), {:.0} lines/s",
        summary.log_file,
        summary.total_lines,
        summary.parsed_requests,
        summary.dropped_lines,
        summary.lines_per_sec,
    );

    for trie in &analysis.tries {
        println!();
        println!(
            "[{}] {} requests, {} unique addresses",
            trie.name, trie.requests, trie.unique_ips
        );
        for range in &trie.cidr_ranges {
            println!("  {}: {} addresses", range.cidr, range.count);
        }
        for cluster in &trie.clusters {
            println!(
                "  cluster ({}, {}..={}, {}){}:",
                cluster.min_size,
                cluster.min_depth,
                cluster.max_depth,
                cluster.density,
                if cluster.use_for_jail { " [jail]" } else { "" },
            );
            if cluster.merged.is_empty() {
                println!("    no ranges detected");
            }
            for cidr in &cluster.merged {
                println!("    {cidr}");
            }
        }
    }

    if let Some(jail) = &analysis.jail {
        println!();
        println!(
            "jail: {} ranges, {} active bans",
            jail.jailed_ranges, jail.active_bans
        );
    }

    for warning in &analysis.warnings {
        match &warning.scope {
            Some(scope) => eprintln!("warning[{}] ({scope}): {}", warning.kind, warning.message),
            None => eprintln!("warning[{}]: {}", warning.kind, warning.message),
        }
    }
    for error in &analysis.errors {
        match &error.scope {
            Some(scope) => eprintln!("error[{}] ({scope}): {}", error.kind, error.message),
            None => eprintln!("error[{}]: {}", error.kind, error.message),
        }
    }
}

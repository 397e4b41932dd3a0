//! The pipeline: parse once, fan out per trie context, aggregate, and
//! reconcile the detected ranges against jail and policy lists.
//!
//! Failure containment mirrors the taxonomy in [`crate::report`]: one bad
//! cluster set does not stop its trie, one bad trie does not stop the
//! others, and only config/parse failures end the run early.

use crate::config::{read_list_file, Config, TrieConfig};
use crate::filter::{filter_requests, TrieFilter};
use crate::jail::{write_ban_file, Jail};
use crate::report::{
    Analysis, ClusterReport, ErrorKind, ErrorNotice, JailOutcome, Notice, RangeCount, TrieReport,
    WarningKind, WarningNotice,
};
use crate::useragents::UserAgentMatcher;
use accesslog::{LogFormat, ParseOptions, Request};
use chrono::Utc;
use ipcluster::ip::{radix_sort_u32, u32_to_ip};
use ipcluster::{cidr, cluster, IpTrie};
use ipnetwork::Ipv4Network;
use itertools::Itertools as _;
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// Run the full analysis described by `config`.
pub fn run(config: &Config) -> Analysis {
    let mut analysis = Analysis {
        summary: crate::report::Summary {
            log_file: config.log_file.display().to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    if config.plot_path.is_some() {
        analysis.warnings.push(Notice::new(
            WarningKind::ConfigWarning,
            "plotPath is set but plotting is not part of this build; ignoring it",
        ));
    }

    let policies = load_policies(config, &mut analysis.warnings, &mut analysis.errors);

    // Plan: parse only what some trie will actually look at.
    let ua_active = policies
        .ua_matcher
        .as_ref()
        .is_some_and(|matcher| !matcher.is_empty());
    let any_strings =
        ua_active || config.tries.values().any(TrieConfig::uses_string_fields);
    let any_time = config.tries.values().any(TrieConfig::uses_time_filter);
    let opts = ParseOptions {
        skip_string_fields: !any_strings,
        skip_non_ip_fields: !any_strings && !any_time,
    };

    let format = match LogFormat::compile(&config.log_format) {
        Ok(format) => format,
        Err(err) => {
            analysis
                .errors
                .push(Notice::new(ErrorKind::ParserInit, err.to_string()));
            return analysis;
        }
    };

    let outcome = match accesslog::parse_file(&config.log_file, &format, opts) {
        Ok(outcome) => outcome,
        Err(err) => {
            analysis
                .errors
                .push(Notice::new(ErrorKind::ParseFile, err.to_string()));
            return analysis;
        }
    };
    analysis.summary.total_lines = outcome.total_lines;
    analysis.summary.parsed_requests = outcome.requests.len() as u64;
    analysis.summary.dropped_lines = outcome.dropped_lines;
    analysis.summary.elapsed_ms = outcome.elapsed.as_millis() as u64;
    analysis.summary.lines_per_sec = outcome.lines_per_sec();

    if outcome.requests.is_empty() {
        analysis.warnings.push(Notice::new(
            WarningKind::EmptyLogfile,
            format!("{} contains no parseable requests", config.log_file.display()),
        ));
        return analysis;
    }

    // Fan out: one worker per trie over the shared request slice. A panic
    // in one worker is contained and reported against that trie alone.
    log::info!(
        "dispatching {} requests to {} trie contexts",
        outcome.requests.len(),
        config.tries.len()
    );
    let requests = outcome.requests.as_slice();
    let matcher = policies.ua_matcher.as_ref();
    let runs: Vec<(String, Result<TrieRun, ()>)> = config
        .tries
        .par_iter()
        .map(|(name, trie_config)| {
            let run = catch_unwind(AssertUnwindSafe(|| {
                run_trie(name, trie_config, requests, matcher)
            }));
            (name.clone(), run.map_err(|_| ()))
        })
        .collect();

    let mut jail_ranges = Vec::new();
    let mut ua_whitelisted = Vec::new();
    let mut ua_blacklisted = Vec::new();
    for (name, run) in runs {
        match run {
            Ok(mut run) => {
                analysis.warnings.append(&mut run.warnings);
                analysis.errors.append(&mut run.errors);
                jail_ranges.extend(run.jail_ranges);
                ua_whitelisted.extend(run.ua_whitelisted);
                ua_blacklisted.extend(run.ua_blacklisted);
                analysis.tries.push(run.report);
            }
            Err(()) => analysis.errors.push(Notice::scoped(
                ErrorKind::ConcurrentFiltering,
                name,
                "trie worker panicked during filtering or clustering",
            )),
        }
    }

    analysis.jail = reconcile(
        config,
        &policies,
        jail_ranges,
        ua_whitelisted,
        ua_blacklisted,
        &mut analysis.warnings,
        &mut analysis.errors,
    );

    analysis
}

struct Policies {
    whitelist: Vec<Ipv4Network>,
    blacklist: Vec<Ipv4Network>,
    ua_matcher: Option<UserAgentMatcher>,
}

fn load_policies(
    config: &Config,
    warnings: &mut Vec<WarningNotice>,
    errors: &mut Vec<ErrorNotice>,
) -> Policies {
    let whitelist = load_cidr_list(
        config.whitelist_file.as_deref(),
        "whitelist",
        warnings,
        errors,
    );
    let blacklist = load_cidr_list(
        config.blacklist_file.as_deref(),
        "blacklist",
        warnings,
        errors,
    );

    let mut load_patterns = |path: Option<&Path>, label: &str| -> Vec<String> {
        let Some(path) = path else { return Vec::new() };
        match read_list_file(path) {
            Ok(patterns) => patterns,
            Err(err) => {
                errors.push(Notice::new(
                    ErrorKind::ConfigError,
                    format!("failed to read {label} {}: {err}", path.display()),
                ));
                Vec::new()
            }
        }
    };
    let ua_matcher = if config.ua_whitelist_file.is_some() || config.ua_blacklist_file.is_some() {
        let white = load_patterns(config.ua_whitelist_file.as_deref(), "user agent whitelist");
        let black = load_patterns(config.ua_blacklist_file.as_deref(), "user agent blacklist");
        Some(UserAgentMatcher::from_lists(&white, &black))
    } else {
        None
    };

    Policies {
        whitelist,
        blacklist,
        ua_matcher,
    }
}

/// Load a CIDR list file. Unparseable lines are skipped with a warning;
/// an unreadable configured file is a config error.
fn load_cidr_list(
    path: Option<&Path>,
    label: &str,
    warnings: &mut Vec<WarningNotice>,
    errors: &mut Vec<ErrorNotice>,
) -> Vec<Ipv4Network> {
    let Some(path) = path else { return Vec::new() };
    let lines = match read_list_file(path) {
        Ok(lines) => lines,
        Err(err) => {
            errors.push(Notice::new(
                ErrorKind::ConfigError,
                format!("failed to read {label} {}: {err}", path.display()),
            ));
            return Vec::new();
        }
    };
    let mut nets = Vec::with_capacity(lines.len());
    for line in lines {
        match line.parse::<Ipv4Network>() {
            Ok(net) => nets.push(net),
            Err(_) => warnings.push(Notice::new(
                WarningKind::InvalidCidr,
                format!("skipping invalid CIDR {line:?} in {label} {}", path.display()),
            )),
        }
    }
    nets
}

struct TrieRun {
    report: TrieReport,
    warnings: Vec<WarningNotice>,
    errors: Vec<ErrorNotice>,
    jail_ranges: Vec<Ipv4Network>,
    ua_whitelisted: Vec<u32>,
    ua_blacklisted: Vec<u32>,
}

fn run_trie(
    name: &str,
    trie_config: &TrieConfig,
    requests: &[Request],
    ua_matcher: Option<&UserAgentMatcher>,
) -> TrieRun {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let start_time = parse_time_bound(
        trie_config.start_time.as_deref(),
        "startTime",
        name,
        &mut warnings,
    );
    let end_time = parse_time_bound(
        trie_config.end_time.as_deref(),
        "endTime",
        name,
        &mut warnings,
    );
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end < start {
            warnings.push(Notice::scoped(
                WarningKind::InvalidTimeRange,
                name,
                "endTime is before startTime; the window matches nothing",
            ));
        }
    }
    if trie_config.uses_time_filter() {
        // Log timestamps are read with the zone digits ignored and taken as
        // UTC, so windows over non-UTC logs are shifted.
        warnings.push(Notice::scoped(
            WarningKind::ConfigWarning,
            name,
            "time filtering treats log timestamps as UTC; non-UTC logs are filtered against shifted instants",
        ));
    }

    let filter = TrieFilter {
        start_time,
        end_time,
        user_agent_regex: trie_config.user_agent_regex.as_ref(),
        endpoint_regex: trie_config.endpoint_regex.as_ref(),
        ua_matcher,
    };
    let filtered = filter_requests(requests, &filter);
    if filtered.invalid_ips > 0 {
        warnings.push(Notice::scoped(
            WarningKind::InvalidIpsSkipped,
            name,
            format!(
                "{} requests with unparseable source addresses were skipped",
                filtered.invalid_ips
            ),
        ));
    }
    if filtered.ips.is_empty() {
        let kind = if trie_config.uses_time_filter() {
            WarningKind::TimeFilterNoResults
        } else {
            WarningKind::ConfigWarning
        };
        warnings.push(Notice::scoped(kind, name, "no requests left after filtering"));
    }

    let mut ips = filtered.ips;
    let matched = ips.len() as u64;
    radix_sort_u32(&mut ips);
    let mut trie = IpTrie::with_capacity(ips.len());
    trie.insert_sorted(&ips);

    let mut clusters = Vec::with_capacity(trie_config.cluster_sets.len());
    let mut jail_ranges = Vec::new();
    for (params, &use_for_jail) in trie_config
        .cluster_sets
        .iter()
        .zip(&trie_config.use_for_jail)
    {
        if !params.depths_valid() {
            errors.push(Notice::scoped(
                ErrorKind::InvalidDepthParams,
                name,
                format!(
                    "cluster set ({}, {}, {}, {}) has min_depth > max_depth; skipping it",
                    params.min_size, params.min_depth, params.max_depth, params.density
                ),
            ));
            continue;
        }
        let detected = cluster::collect_cidrs(&trie, params);
        let merged = cidr::merge(&detected);
        if use_for_jail {
            jail_ranges.extend_from_slice(&merged);
        }
        clusters.push(ClusterReport {
            min_size: params.min_size,
            min_depth: params.min_depth,
            max_depth: params.max_depth,
            density: params.density,
            use_for_jail,
            detected: detected.iter().map(|net| net.to_string()).collect(),
            merged: merged.iter().map(|net| net.to_string()).collect(),
        });
    }

    let cidr_ranges = trie_config
        .cidr_ranges
        .iter()
        .map(|net| RangeCount {
            cidr: net.to_string(),
            count: trie.count_in_cidr(net),
        })
        .collect();

    TrieRun {
        report: TrieReport {
            name: name.to_string(),
            requests: matched,
            unique_ips: trie.len(),
            cidr_ranges,
            clusters,
        },
        warnings,
        errors,
        jail_ranges,
        ua_whitelisted: filtered.ua_whitelisted,
        ua_blacklisted: filtered.ua_blacklisted,
    }
}

/// Parse one RFC3339 window bound into Unix seconds; a malformed value is
/// dropped with a warning so the rest of the trie still runs.
fn parse_time_bound(
    value: Option<&str>,
    label: &str,
    trie: &str,
    warnings: &mut Vec<WarningNotice>,
) -> Option<i64> {
    let value = value?;
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(instant) => Some(instant.timestamp()),
        Err(err) => {
            warnings.push(Notice::scoped(
                WarningKind::InvalidTimeFormat,
                trie,
                format!("{label} {value:?} is not RFC3339 ({err}); ignoring the bound"),
            ));
            None
        }
    }
}

fn host_network(ip: u32) -> Ipv4Network {
    Ipv4Network::new(u32_to_ip(ip), 32).expect("Prefix size never exceeds limit.")
}

/// End-of-run reconciliation, in the documented order: merged ranges minus
/// whitelist CIDRs minus UA-whitelist hosts feed the jail together with the
/// UA-blacklist hosts; the ban file is the jailed set minus the whitelist
/// plus the static blacklist.
fn reconcile(
    config: &Config,
    policies: &Policies,
    jail_ranges: Vec<Ipv4Network>,
    ua_whitelisted: Vec<u32>,
    ua_blacklisted: Vec<u32>,
    warnings: &mut Vec<WarningNotice>,
    errors: &mut Vec<ErrorNotice>,
) -> Option<JailOutcome> {
    if config.jail_file.is_none() && config.ban_file.is_none() {
        return None;
    }
    let now = Utc::now();

    let mut candidate = cidr::merge(&jail_ranges);
    if !policies.whitelist.is_empty() && !candidate.is_empty() {
        let kept = cidr::remove_whitelisted(&candidate, &policies.whitelist);
        if kept != candidate {
            warnings.push(Notice::new(
                WarningKind::WhitelistApplied,
                "whitelisted addresses were removed from the detected ranges",
            ));
        }
        candidate = kept;
    }
    let ua_white_hosts: Vec<Ipv4Network> = ua_whitelisted
        .into_iter()
        .sorted()
        .dedup()
        .map(host_network)
        .collect();
    if !ua_white_hosts.is_empty() && !candidate.is_empty() {
        candidate = cidr::remove_whitelisted(&candidate, &ua_white_hosts);
    }

    let mut jail = match &config.jail_file {
        Some(path) => match Jail::load(path) {
            Ok(jail) => jail,
            Err(err) => {
                errors.push(Notice::new(ErrorKind::JailLoad, err.to_string()));
                Jail::default()
            }
        },
        None => Jail::default(),
    };
    for net in &candidate {
        jail.add(net, "cluster", now);
    }
    for ip in ua_blacklisted.into_iter().sorted().dedup() {
        jail.add(&host_network(ip), "ua-blacklist", now);
    }
    let removed = jail.remove_whitelisted(&policies.whitelist);
    if removed > 0 {
        warnings.push(Notice::new(
            WarningKind::WhitelistApplied,
            format!("{removed} jailed ranges are now covered by the whitelist and were released"),
        ));
    }
    if let Some(path) = &config.jail_file {
        if let Err(err) = jail.save(path) {
            errors.push(Notice::new(ErrorKind::JailSave, err.to_string()));
        }
    }

    let ranges = jail.ranges();
    if ranges.len() < jail.len() {
        warnings.push(Notice::new(
            WarningKind::CidrParseError,
            format!(
                "{} jail entries have unparseable CIDR keys and were left out of the ban list",
                jail.len() - ranges.len()
            ),
        ));
    }
    let mut bans = cidr::merge(&ranges);
    if !policies.whitelist.is_empty() && !bans.is_empty() {
        bans = cidr::remove_whitelisted(&bans, &policies.whitelist);
    }
    if let Some(path) = &config.ban_file {
        if !policies.blacklist.is_empty() {
            warnings.push(Notice::new(
                WarningKind::BlacklistApplied,
                "static blacklist appended to the ban file",
            ));
        }
        if let Err(err) = write_ban_file(path, &bans, &policies.blacklist) {
            errors.push(Notice::new(
                ErrorKind::BanfileWrite,
                format!("failed to write ban file {}: {err}", path.display()),
            ));
        }
    }

    log::info!(
        "jail now holds {} ranges, {} active bans",
        jail.len(),
        bans.len()
    );
    Some(JailOutcome {
        jailed_ranges: jail.len(),
        active_bans: bans.len(),
    })
}

//! Configuration: a TOML file or the equivalent CLI flags, validated into
//! one immutable [`Config`] shared read-only by all workers.
//!
//! Regexes and reporting CIDRs are compiled here and fail the build loudly;
//! time window strings are carried raw and parsed per trie at run time,
//! where a bad value degrades to a warning instead of killing the run.

use ipcluster::ClusterParams;
use ipnetwork::Ipv4Network;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {} at {}: {source}", .path.display(), .source.path())]
    Toml {
        path: PathBuf,
        source: Box<serde_path_to_error::Error<toml::de::Error>>,
    },
    #[error("missing [static] section")]
    MissingStatic,
    #[error("[static] must set logFile")]
    MissingLogFile,
    #[error("[static] must set logFormat")]
    MissingLogFormat,
    #[error("trie {name}: invalid regex {pattern:?}: {source}")]
    Regex {
        name: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("trie {name}: invalid CIDR {cidr:?}")]
    Cidr { name: String, cidr: String },
    #[error("trie {name}: useForJail has {got} entries but clusterArgSets has {expected}")]
    JailFlagLength {
        name: String,
        got: usize,
        expected: usize,
    },
    #[error("trie {name}: cluster set {index}: {reason}")]
    ClusterArgs {
        name: String,
        index: usize,
        reason: String,
    },
    #[error("invalid --cluster-args value {value:?} (expected SIZE,MIN_DEPTH,MAX_DEPTH,DENSITY)")]
    CliClusterArgs { value: String },
}

/// One independent filter + cluster context.
#[derive(Clone, Debug)]
pub struct TrieConfig {
    pub user_agent_regex: Option<Regex>,
    pub endpoint_regex: Option<Regex>,
    /// RFC3339 bounds, parsed by the trie worker (inclusive at both ends).
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Reporting-only ranges, counted against the built trie.
    pub cidr_ranges: Vec<Ipv4Network>,
    pub cluster_sets: Vec<ClusterParams>,
    /// Parallel to `cluster_sets`: whether the set's merged ranges feed the jail.
    pub use_for_jail: Vec<bool>,
}

impl TrieConfig {
    pub fn uses_time_filter(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    pub fn uses_string_fields(&self) -> bool {
        self.user_agent_regex.is_some() || self.endpoint_regex.is_some()
    }
}

/// Process-wide configuration, immutable after build.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub log_file: PathBuf,
    pub log_format: String,
    pub tries: BTreeMap<String, TrieConfig>,
    pub whitelist_file: Option<PathBuf>,
    pub blacklist_file: Option<PathBuf>,
    pub ua_whitelist_file: Option<PathBuf>,
    pub ua_blacklist_file: Option<PathBuf>,
    pub jail_file: Option<PathBuf>,
    pub ban_file: Option<PathBuf>,
    /// Accepted for compatibility; plotting is not part of this build.
    pub plot_path: Option<PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawConfig {
    global: Option<RawGlobal>,
    #[serde(rename = "static")]
    analysis: Option<RawStatic>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawGlobal {
    jail_file: Option<PathBuf>,
    ban_file: Option<PathBuf>,
    whitelist: Option<PathBuf>,
    blacklist: Option<PathBuf>,
    user_agent_whitelist: Option<PathBuf>,
    user_agent_blacklist: Option<PathBuf>,
}

// No deny_unknown_fields here: the flattened map swallows the trie tables.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatic {
    log_file: Option<PathBuf>,
    log_format: Option<String>,
    plot_path: Option<PathBuf>,
    #[serde(flatten)]
    tries: BTreeMap<String, RawTrie>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawTrie {
    #[serde(default)]
    cidr_ranges: Vec<String>,
    user_agent_regex: Option<String>,
    endpoint_regex: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    cluster_arg_sets: Vec<(u32, u32, u32, f64)>,
    use_for_jail: Option<Vec<bool>>,
}

impl Config {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let deserializer = toml::Deserializer::new(&text);
        let raw: RawConfig =
            serde_path_to_error::deserialize(deserializer).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let global = raw.global.unwrap_or_default();
        let analysis = raw.analysis.ok_or(ConfigError::MissingStatic)?;
        let log_file = analysis.log_file.ok_or(ConfigError::MissingLogFile)?;
        let log_format = analysis.log_format.ok_or(ConfigError::MissingLogFormat)?;

        let mut tries = BTreeMap::new();
        for (name, raw_trie) in analysis.tries {
            let trie = build_trie(&name, raw_trie)?;
            tries.insert(name, trie);
        }

        Ok(Self {
            log_file,
            log_format,
            tries,
            whitelist_file: global.whitelist,
            blacklist_file: global.blacklist,
            ua_whitelist_file: global.user_agent_whitelist,
            ua_blacklist_file: global.user_agent_blacklist,
            jail_file: global.jail_file,
            ban_file: global.ban_file,
            plot_path: analysis.plot_path,
        })
    }

    /// Build the same [`Config`] from CLI flags; the flags define a single
    /// trie. TOML- and CLI-built configs must produce identical results.
    pub fn from_cli(args: &CliConfigArgs) -> Result<Self, ConfigError> {
        let mut cluster_arg_sets = Vec::with_capacity(args.cluster_args.len());
        for value in &args.cluster_args {
            cluster_arg_sets.push(parse_cluster_args(value)?);
        }
        let raw_trie = RawTrie {
            cidr_ranges: args.cidr_ranges.clone(),
            user_agent_regex: args.user_agent_regex.clone(),
            endpoint_regex: args.endpoint_regex.clone(),
            start_time: args.start_time.clone(),
            end_time: args.end_time.clone(),
            cluster_arg_sets,
            use_for_jail: if args.use_for_jail.is_empty() {
                None
            } else {
                Some(args.use_for_jail.clone())
            },
        };

        let mut tries = BTreeMap::new();
        tries.insert(args.trie_name.clone(), build_trie(&args.trie_name, raw_trie)?);

        Ok(Self {
            log_file: args.log_file.clone().ok_or(ConfigError::MissingLogFile)?,
            log_format: args.log_format.clone(),
            tries,
            whitelist_file: args.whitelist.clone(),
            blacklist_file: args.blacklist.clone(),
            ua_whitelist_file: args.ua_whitelist.clone(),
            ua_blacklist_file: args.ua_blacklist.clone(),
            jail_file: args.jail_file.clone(),
            ban_file: args.ban_file.clone(),
            plot_path: None,
        })
    }
}

fn build_trie(name: &str, raw: RawTrie) -> Result<TrieConfig, ConfigError> {
    let compile = |pattern: Option<String>| -> Result<Option<Regex>, ConfigError> {
        pattern
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ConfigError::Regex {
                    name: name.to_string(),
                    pattern,
                    source,
                })
            })
            .transpose()
    };
    let user_agent_regex = compile(raw.user_agent_regex)?;
    let endpoint_regex = compile(raw.endpoint_regex)?;

    let mut cidr_ranges = Vec::with_capacity(raw.cidr_ranges.len());
    for cidr in raw.cidr_ranges {
        let net: Ipv4Network = cidr.parse().map_err(|_| ConfigError::Cidr {
            name: name.to_string(),
            cidr: cidr.clone(),
        })?;
        cidr_ranges.push(net);
    }

    let mut cluster_sets = Vec::with_capacity(raw.cluster_arg_sets.len());
    for (index, (min_size, min_depth, max_depth, density)) in
        raw.cluster_arg_sets.into_iter().enumerate()
    {
        let reject = |reason: &str| ConfigError::ClusterArgs {
            name: name.to_string(),
            index,
            reason: reason.to_string(),
        };
        if min_size < 1 {
            return Err(reject("minimum cluster size must be at least 1"));
        }
        if min_depth > 32 || max_depth > 32 {
            return Err(reject("depths must be within 0..=32"));
        }
        if !(density > 0.0 && density <= 1.0) {
            return Err(reject("density must be within (0, 1]"));
        }
        // min_depth > max_depth is deliberately not rejected here: it
        // surfaces as an invalid_depth_params error on the affected set at
        // run time, leaving the other sets untouched.
        cluster_sets.push(ClusterParams::new(min_size, min_depth, max_depth, density));
    }

    let use_for_jail = match raw.use_for_jail {
        Some(flags) => {
            if flags.len() != cluster_sets.len() {
                return Err(ConfigError::JailFlagLength {
                    name: name.to_string(),
                    got: flags.len(),
                    expected: cluster_sets.len(),
                });
            }
            flags
        }
        None => vec![false; cluster_sets.len()],
    };

    Ok(TrieConfig {
        user_agent_regex,
        endpoint_regex,
        start_time: raw.start_time,
        end_time: raw.end_time,
        cidr_ranges,
        cluster_sets,
        use_for_jail,
    })
}

fn parse_cluster_args(value: &str) -> Result<(u32, u32, u32, f64), ConfigError> {
    let err = || ConfigError::CliClusterArgs {
        value: value.to_string(),
    };
    let mut parts = value.split(',').map(str::trim);
    let min_size = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
    let min_depth = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
    let max_depth = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
    let density = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
    if parts.next().is_some() {
        return Err(err());
    }
    Ok((min_size, min_depth, max_depth, density))
}

/// The CLI equivalent of the TOML file: same knobs, one trie.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct CliConfigArgs {
    /// Access log to analyze
    #[clap(long = "log-file")]
    pub log_file: Option<PathBuf>,
    /// Log format directive string
    #[clap(long = "log-format", default_value = r#"%h %^ %^ [%t] "%r" %s %b "%^" "%u""#)]
    pub log_format: String,
    /// Name of the single CLI-defined trie context
    #[clap(long = "trie-name", default_value = "default")]
    pub trie_name: String,
    /// Reporting CIDR range (repeatable)
    #[clap(long = "cidr")]
    pub cidr_ranges: Vec<String>,
    /// Keep only requests whose User-Agent matches this regex
    #[clap(long = "user-agent-regex")]
    pub user_agent_regex: Option<String>,
    /// Keep only requests whose URI matches this regex
    #[clap(long = "endpoint-regex")]
    pub endpoint_regex: Option<String>,
    /// Inclusive RFC3339 lower bound on request time
    #[clap(long = "start-time")]
    pub start_time: Option<String>,
    /// Inclusive RFC3339 upper bound on request time
    #[clap(long = "end-time")]
    pub end_time: Option<String>,
    /// Cluster parameter set as SIZE,MIN_DEPTH,MAX_DEPTH,DENSITY (repeatable)
    #[clap(long = "cluster-args")]
    pub cluster_args: Vec<String>,
    /// Whether the matching cluster set feeds the jail (repeatable, positional)
    #[clap(long = "use-for-jail")]
    pub use_for_jail: Vec<bool>,
    /// CIDR whitelist file
    #[clap(long = "whitelist")]
    pub whitelist: Option<PathBuf>,
    /// CIDR blacklist file
    #[clap(long = "blacklist")]
    pub blacklist: Option<PathBuf>,
    /// User-Agent whitelist file
    #[clap(long = "ua-whitelist")]
    pub ua_whitelist: Option<PathBuf>,
    /// User-Agent blacklist file
    #[clap(long = "ua-blacklist")]
    pub ua_blacklist: Option<PathBuf>,
    /// Jail state file (JSON)
    #[clap(long = "jail-file")]
    pub jail_file: Option<PathBuf>,
    /// Ban list output file
    #[clap(long = "ban-file")]
    pub ban_file: Option<PathBuf>,
}

/// Read a list file: one entry per line, `#` comments and blanks dropped.
pub(crate) fn read_list_file(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

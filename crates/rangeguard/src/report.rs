//! Result envelope: per-trie reports plus the warning/error taxonomy.
//!
//! The kind names below are wire format: they appear verbatim in the JSON
//! output and are matched by downstream tooling.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    ParserInit,
    ParseFile,
    InvalidDepthParams,
    ConcurrentFiltering,
    JailLoad,
    JailSave,
    BanfileWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WarningKind {
    ConfigWarning,
    EmptyLogfile,
    InvalidTimeFormat,
    InvalidTimeRange,
    TimeFilterNoResults,
    InvalidCidr,
    CidrParseError,
    WhitelistApplied,
    BlacklistApplied,
    InvalidIpsSkipped,
}

/// One diagnostic, optionally scoped to the trie it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice<K> {
    #[serde(rename = "type")]
    pub kind: K,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub message: String,
}

impl<K> Notice<K> {
    pub fn new(kind: K, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: None,
            message: message.into(),
        }
    }

    pub fn scoped(kind: K, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Some(scope.into()),
            message: message.into(),
        }
    }
}

pub type ErrorNotice = Notice<ErrorKind>;
pub type WarningNotice = Notice<WarningKind>;

/// Parse phase totals. `elapsed_ms` and `lines_per_sec` are timing fields
/// and excluded from any determinism comparison.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub log_file: String,
    pub total_lines: u64,
    pub parsed_requests: u64,
    pub dropped_lines: u64,
    pub elapsed_ms: u64,
    pub lines_per_sec: f64,
}

/// Outcome of one cluster parameter set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterReport {
    pub min_size: u32,
    pub min_depth: u32,
    pub max_depth: u32,
    pub density: f64,
    pub use_for_jail: bool,
    /// Ranges as the trie traversal emitted them (ascending addresses).
    pub detected: Vec<String>,
    /// [`detected`](Self::detected) after adjacency/containment merging.
    pub merged: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RangeCount {
    pub cidr: String,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrieReport {
    pub name: String,
    /// Requests surviving this trie's filters.
    pub requests: u64,
    pub unique_ips: u32,
    pub cidr_ranges: Vec<RangeCount>,
    pub clusters: Vec<ClusterReport>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JailOutcome {
    pub jailed_ranges: usize,
    pub active_bans: usize,
}

/// The aggregated result of one pipeline run. Trie reports are sorted by
/// name; a run with `errors` non-empty maps to a non-zero exit in the CLI.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub summary: Summary,
    pub tries: Vec<TrieReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jail: Option<JailOutcome>,
    pub warnings: Vec<WarningNotice>,
    pub errors: Vec<ErrorNotice>,
}

impl Analysis {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Re-sort all CIDR lists lexicographically for presentation. The
    /// reports themselves keep trie traversal order.
    pub fn sort_cidrs_for_output(&mut self) {
        for trie in &mut self.tries {
            for cluster in &mut trie.clusters {
                cluster.detected.sort();
                cluster.merged.sort();
            }
        }
    }
}

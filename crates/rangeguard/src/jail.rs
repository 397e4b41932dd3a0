//! The persistent jail: every CIDR ever detected, with first/last seen
//! timestamps, stored as a JSON map keyed by the CIDR string. The ban file
//! is derived from it at the end of each run.

use chrono::{DateTime, Utc};
use ipcluster::cidr::{block_end, block_start};
use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JailEntry {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Which path added the entry: `cluster` or `ua-blacklist`.
    pub strategy: String,
}

#[derive(Debug, thiserror::Error)]
pub enum JailError {
    #[error("failed to read jail file {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("jail file {} is not valid JSON: {source}", .path.display())]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write jail file {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Invariant: the union of all CIDRs ever added, minus any entry currently
/// covered by the whitelist.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Jail {
    entries: BTreeMap<String, JailEntry>,
}

impl Jail {
    /// Load a jail file; a missing file is an empty jail.
    pub fn load(path: &Path) -> Result<Self, JailError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(JailError::Load {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let entries = serde_json::from_str(&text).map_err(|source| JailError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), JailError> {
        let json = serde_json::to_string_pretty(&self.entries).expect("jail entries serialize");
        std::fs::write(path, json).map_err(|source| JailError::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, net: &Ipv4Network) -> bool {
        self.entries.contains_key(&net.to_string())
    }

    /// Insert or refresh one range. A re-detected range keeps its
    /// `first_seen` and original strategy.
    pub fn add(&mut self, net: &Ipv4Network, strategy: &str, now: DateTime<Utc>) {
        self.entries
            .entry(net.to_string())
            .and_modify(|entry| entry.last_seen = now)
            .or_insert_with(|| JailEntry {
                first_seen: now,
                last_seen: now,
                strategy: strategy.to_string(),
            });
    }

    /// Drop every entry covered by a whitelist range. Returns how many were
    /// removed.
    pub fn remove_whitelisted(&mut self, whitelist: &[Ipv4Network]) -> usize {
        if whitelist.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|cidr, _| {
            let Ok(net) = cidr.parse::<Ipv4Network>() else {
                // Keep unparseable foreign entries untouched.
                return true;
            };
            !whitelist.iter().any(|white| {
                block_start(white) <= block_start(&net) && block_end(white) >= block_end(&net)
            })
        });
        before - self.entries.len()
    }

    /// All jailed ranges, ascending; unparseable keys are skipped.
    pub fn ranges(&self) -> Vec<Ipv4Network> {
        let mut ranges: Vec<Ipv4Network> = self
            .entries
            .keys()
            .filter_map(|cidr| cidr.parse().ok())
            .collect();
        ranges.sort_by_key(|net| (block_start(net), net.prefix()));
        ranges
    }
}

/// Write the ban list: a header comment, one CIDR per line, with the static
/// blacklist appended (minus ranges already present).
pub fn write_ban_file(
    path: &Path,
    bans: &[Ipv4Network],
    static_blacklist: &[Ipv4Network],
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(bans.len() * 20 + 64);
    writeln!(out, "# rangeguard ban list, one CIDR per line")?;
    for net in bans {
        writeln!(out, "{net}")?;
    }
    for net in static_blacklist {
        if !bans.contains(net) {
            writeln!(out, "{net}")?;
        }
    }
    std::fs::write(path, out)
}

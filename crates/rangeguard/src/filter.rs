//! Per-trie request filtering.
//!
//! One classification function serves both the sequential and the parallel
//! path, so fanning out can never change the result. The exact-match UA
//! matcher runs before the UA regex: listed agents are always classified,
//! and whitelisted ones never reach the trie.

use crate::useragents::{UaClass, UserAgentMatcher};
use accesslog::Request;
use rayon::prelude::*;
use regex::Regex;

/// Request counts above this fan out to parallel chunks.
pub const PARALLEL_THRESHOLD: usize = 50_000;
const PARALLEL_CHUNK: usize = 16_384;

/// The active predicates of one trie context, borrowed from the config.
#[derive(Clone, Copy, Default)]
pub struct TrieFilter<'a> {
    /// Inclusive Unix-second bounds.
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub user_agent_regex: Option<&'a Regex>,
    pub endpoint_regex: Option<&'a Regex>,
    pub ua_matcher: Option<&'a UserAgentMatcher>,
}

impl TrieFilter<'_> {
    /// Whether anything beyond the zero-IP drop is being filtered.
    pub fn is_active(&self) -> bool {
        self.start_time.is_some()
            || self.end_time.is_some()
            || self.user_agent_regex.is_some()
            || self.endpoint_regex.is_some()
            || self.ua_matcher.is_some_and(|matcher| !matcher.is_empty())
    }
}

/// IPs surviving the filter plus the UA-classified side channels.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Source IPs to insert into the trie (unsorted, with duplicates).
    pub ips: Vec<u32>,
    /// IPs whose User-Agent was whitelisted; excluded from `ips`.
    pub ua_whitelisted: Vec<u32>,
    /// IPs whose User-Agent was blacklisted; also present in `ips`.
    pub ua_blacklisted: Vec<u32>,
    /// Lines dropped for an unparseable source address.
    pub invalid_ips: u64,
}

impl FilterOutcome {
    fn merge(mut self, mut other: Self) -> Self {
        self.ips.append(&mut other.ips);
        self.ua_whitelisted.append(&mut other.ua_whitelisted);
        self.ua_blacklisted.append(&mut other.ua_blacklisted);
        self.invalid_ips += other.invalid_ips;
        self
    }
}

/// Filter the shared request slice, sequentially below
/// [`PARALLEL_THRESHOLD`] and in order-preserving parallel chunks above it.
pub fn filter_requests(requests: &[Request], filter: &TrieFilter<'_>) -> FilterOutcome {
    if requests.len() >= PARALLEL_THRESHOLD && filter.is_active() {
        requests
            .par_chunks(PARALLEL_CHUNK)
            .map(|chunk| filter_chunk(chunk, filter))
            .reduce(FilterOutcome::default, FilterOutcome::merge)
    } else {
        filter_chunk(requests, filter)
    }
}

fn filter_chunk(requests: &[Request], filter: &TrieFilter<'_>) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for request in requests {
        if request.ip == 0 {
            out.invalid_ips += 1;
            continue;
        }
        if matches!(filter.start_time, Some(start) if request.timestamp < start) {
            continue;
        }
        if matches!(filter.end_time, Some(end) if request.timestamp > end) {
            continue;
        }
        if matches!(filter.endpoint_regex, Some(regex) if !regex.is_match(&request.uri)) {
            continue;
        }
        let class = filter
            .ua_matcher
            .map_or(UaClass::NotListed, |matcher| {
                matcher.classify(&request.user_agent)
            });
        match class {
            UaClass::Whitelist => {
                out.ua_whitelisted.push(request.ip);
                continue;
            }
            UaClass::Blacklist => {
                out.ua_blacklisted.push(request.ip);
                out.ips.push(request.ip);
                continue;
            }
            UaClass::NotListed => {}
        }
        if matches!(filter.user_agent_regex, Some(regex) if !regex.is_match(&request.user_agent)) {
            continue;
        }
        out.ips.push(request.ip);
    }
    out
}

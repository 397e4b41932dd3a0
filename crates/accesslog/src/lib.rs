//! Format-directed HTTP access log parsing.
//!
//! A [`LogFormat`] is compiled once from a directive string (`%h`, `%t`,
//! `%r`, ...) and then drives a single left-to-right scan per line with no
//! regex and no allocation on the IP path. [`parse_file`] runs that scan
//! over a whole file with batched parallel workers.

#![deny(unused_import_braces, unused_qualifications)]

mod fields;
mod file;
mod format;
mod line;

pub use file::{parse_file, ParseError, ParseOutcome};
pub use format::{FormatError, LogFormat};

/// One parsed log line, kept compact: the address is a big-endian `u32`
/// (`0` = unparseable) and the timestamp is Unix seconds, UTC assumed.
///
/// Field-level parse failures leave the zero value in place; a `Request` is
/// therefore never partial. Lines with `ip == 0` are dropped downstream at
/// the filter boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Request {
    pub ip: u32,
    pub timestamp: i64,
    pub method: Method,
    pub uri: String,
    pub user_agent: String,
    pub status: u16,
    pub bytes: u32,
}

impl Request {
    /// Clear all fields, keeping the string capacities for reuse.
    pub fn reset(&mut self) {
        self.ip = 0;
        self.timestamp = 0;
        self.method = Method::Unknown;
        self.uri.clear();
        self.user_agent.clear();
        self.status = 0;
        self.bytes = 0;
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    strum::Display,
)]
pub enum Method {
    #[strum(serialize = "GET")]
    Get,
    #[strum(serialize = "POST")]
    Post,
    #[strum(serialize = "PUT")]
    Put,
    #[strum(serialize = "DELETE")]
    Delete,
    #[strum(serialize = "HEAD")]
    Head,
    #[strum(serialize = "OPTIONS")]
    Options,
    #[strum(serialize = "PATCH")]
    Patch,
    #[default]
    #[strum(serialize = "UNKNOWN")]
    Unknown,
}

/// Parser switches derived from what the downstream filters actually use.
///
/// `skip_string_fields` keeps URI and User-Agent out of owned strings;
/// `skip_non_ip_fields` reduces the scan to delimiter hops plus the IP.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub skip_string_fields: bool,
    pub skip_non_ip_fields: bool,
}

//! Pipeline orchestration: parse an access log once, fan the requests
//! through independently configured filter+cluster contexts, and reconcile
//! the detected ranges against the persistent jail and the allow/block
//! policies.

#![deny(unused_import_braces, unused_qualifications)]

pub mod config;
pub mod filter;
pub mod jail;
pub mod pipeline;
pub mod report;
pub mod useragents;

pub use config::{Config, ConfigError, TrieConfig};
pub use pipeline::run;
pub use report::Analysis;

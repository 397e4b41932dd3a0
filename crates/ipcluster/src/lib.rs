//! IPv4 range analytics: radix sorting, CIDR set algebra, a binary radix
//! trie over 32-bit addresses, and density-threshold clustering on top of it.

#![deny(unused_import_braces, unused_qualifications)]

pub mod cidr;
pub mod cluster;
pub mod ip;
pub mod trie;

pub use cluster::ClusterParams;
pub use trie::IpTrie;

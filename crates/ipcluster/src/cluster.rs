//! Density-threshold clustering over the radix trie.
//!
//! A subtree at depth `d` covers `2^(32-d)` addresses; its density is the
//! fraction of that space occupied by observed addresses. The traversal
//! emits the shallowest node on each path that clears the size and density
//! bars, which makes the emitted set minimal by construction.

use crate::ip::u32_to_ip;
use crate::trie::IpTrie;
use ipnetwork::Ipv4Network;

/// One clustering run: minimum cluster size, depth window, density bar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterParams {
    pub min_size: u32,
    pub min_depth: u32,
    pub max_depth: u32,
    pub density: f64,
}

impl ClusterParams {
    pub fn new(min_size: u32, min_depth: u32, max_depth: u32, density: f64) -> Self {
        Self {
            min_size,
            min_depth,
            max_depth,
            density,
        }
    }

    /// Depth window sanity: `min_depth <= max_depth <= 32`.
    pub fn depths_valid(&self) -> bool {
        self.min_depth <= self.max_depth && self.max_depth <= 32
    }
}

/// Fraction of the address space below a depth-`d` node that `count`
/// distinct addresses occupy. `d == 0` divides by 2^32.
#[inline]
fn density(count: u32, depth: u32) -> f64 {
    f64::from(count) / (1u64 << (32 - depth)) as f64
}

/// Walk the trie and emit every CIDR satisfying the cluster predicate.
///
/// Left subtrees are visited first, so the output is in ascending address
/// order. An emitted node's subtree is never descended into; nodes below
/// `max_depth` are never visited.
pub fn collect_cidrs(trie: &IpTrie, params: &ClusterParams) -> Vec<Ipv4Network> {
    debug_assert!(params.depths_valid());
    let mut out = Vec::new();
    walk(trie, 0, 0, 0, params, &mut out);
    log::debug!(
        "clustering ({}, {}..={}, {}) emitted {} ranges over {} addresses",
        params.min_size,
        params.min_depth,
        params.max_depth,
        params.density,
        out.len(),
        trie.count_all(),
    );
    out
}

fn walk(
    trie: &IpTrie,
    node: u32,
    depth: u32,
    prefix: u32,
    params: &ClusterParams,
    out: &mut Vec<Ipv4Network>,
) {
    let (left, right, count) = trie.node_children_and_count(node);
    if count == 0 {
        return;
    }

    if depth >= params.min_depth
        && count >= params.min_size
        && density(count, depth) >= params.density
    {
        let net = Ipv4Network::new(u32_to_ip(prefix), depth as u8)
            .expect("depth is bounded by max_depth <= 32");
        out.push(net);
        return;
    }

    if depth >= params.max_depth {
        return;
    }
    if left != 0 {
        walk(trie, left, depth + 1, prefix, params, out);
    }
    if right != 0 {
        walk(trie, right, depth + 1, prefix | (1 << (31 - depth)), params, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cidr::{self, block_end, block_start};
    use crate::ip::radix_sort_u32;

    fn build(keys: &mut Vec<u32>) -> IpTrie {
        radix_sort_u32(keys);
        let mut trie = IpTrie::with_capacity(keys.len());
        trie.insert_sorted(keys);
        trie
    }

    #[test]
    fn uniform_block_collapses_to_one_range() {
        // 4096 addresses uniformly across 10.20.0.0/16: density at /16 is
        // 4096 / 65536 = 0.0625, at /20 it is 256/4096 = 0.0625 as well.
        let mut keys: Vec<u32> = (0..4096u32).map(|i| 0x0A14_0000 | (i * 16)).collect();
        let trie = build(&mut keys);

        let params = ClusterParams::new(1000, 16, 24, 0.05);
        let found = collect_cidrs(&trie, &params);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_string(), "10.20.0.0/16");
        assert_eq!(trie.count_in_cidr(&found[0]), 4096);
    }

    #[test]
    fn emitted_ranges_satisfy_the_predicate() {
        let mut keys: Vec<u32> = (0..3000u32)
            .map(|i| 0x0A14_0000 | (i * 11))
            .chain((0..200u32).map(|i| 0xC0A8_0100 | i))
            .collect();
        let trie = build(&mut keys);

        let params = ClusterParams::new(100, 8, 28, 0.01);
        let found = collect_cidrs(&trie, &params);
        assert!(!found.is_empty());
        for net in &found {
            let count = trie.count_in_cidr(net);
            let depth = u32::from(net.prefix());
            assert!(count >= params.min_size);
            assert!((params.min_depth..=params.max_depth).contains(&depth));
            assert!(density(count, depth) >= params.density);
        }
        // Minimality: no emitted range contains another.
        for a in &found {
            for b in &found {
                if a != b {
                    assert!(
                        block_start(a) > block_end(b) || block_end(a) < block_start(b),
                        "{a} and {b} must be disjoint"
                    );
                }
            }
        }
    }

    #[test]
    fn min_depth_forces_descent() {
        // One fully dense /24 (256 addresses). With min_depth 26 the /24
        // node may not be emitted even though it qualifies by density.
        let mut keys: Vec<u32> = (0..256u32).map(|i| 0x0A00_0100 | i).collect();
        let trie = build(&mut keys);

        let params = ClusterParams::new(32, 26, 32, 1.0);
        let found = collect_cidrs(&trie, &params);
        assert_eq!(found.len(), 4);
        for net in &found {
            assert_eq!(net.prefix(), 26);
            assert_eq!(trie.count_in_cidr(net), 64);
        }
    }

    #[test]
    fn max_depth_cuts_off_sparse_subtrees() {
        // Two lone addresses: nothing above /32 is dense enough, and the
        // depth cap stops the walk before the leaves.
        let mut keys = vec![0x0A00_0001u32, 0xC0A8_0001];
        let trie = build(&mut keys);

        let params = ClusterParams::new(1, 0, 24, 0.5);
        assert!(collect_cidrs(&trie, &params).is_empty());
    }

    #[test]
    fn leaf_depth_emits_hosts() {
        let mut keys = vec![0x0A00_0001u32, 0x0A00_0002];
        let trie = build(&mut keys);

        let params = ClusterParams::new(1, 32, 32, 1.0);
        let found = collect_cidrs(&trie, &params);
        let texts: Vec<String> = found.iter().map(|n| n.to_string()).collect();
        assert_eq!(texts, ["10.0.0.1/32", "10.0.0.2/32"]);
    }

    #[test]
    fn ascending_emission_order() {
        let mut keys: Vec<u32> = (0..512u32)
            .map(|i| 0xC0A8_0000 | i)
            .chain((0..512u32).map(|i| 0x0A00_0000 | i))
            .collect();
        let trie = build(&mut keys);

        let params = ClusterParams::new(256, 23, 23, 0.5);
        let found = collect_cidrs(&trie, &params);
        let mut sorted = found.clone();
        sorted.sort_by_key(block_start);
        assert_eq!(found, sorted);
    }

    #[test]
    fn merged_ranges_coalesce_buddies() {
        let mut keys: Vec<u32> = (0..512u32).map(|i| 0x0A00_0000 | i).collect();
        let trie = build(&mut keys);

        // Force emission at /24: both halves qualify separately.
        let params = ClusterParams::new(100, 24, 24, 0.5);
        let merged = cidr::merge(&collect_cidrs(&trie, &params));
        let texts: Vec<String> = merged.iter().map(|n| n.to_string()).collect();
        assert_eq!(texts, ["10.0.0.0/23"]);
    }
}

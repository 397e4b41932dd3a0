//! CIDR set algebra on `u32` address blocks.
//!
//! CIDR blocks are laminar: two blocks are either disjoint or one contains
//! the other. Every pass below leans on that, so partial overlap never has
//! to be handled.

use crate::ip::{ip_to_u32, u32_to_ip};
use ipnetwork::Ipv4Network;
use itertools::Itertools as _;

/// Network mask for a prefix length. `len == 0` yields the empty mask.
#[inline]
pub fn prefix_mask(len: u8) -> u32 {
    // Shifting by 32 bits is illegal
    if len == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(len))
    }
}

/// First address of the block, as `u32`.
#[inline]
pub fn block_start(net: &Ipv4Network) -> u32 {
    ip_to_u32(net.network())
}

/// Last address of the block, as `u32`. Safe at the `0xFFFF_FFFF` boundary.
#[inline]
pub fn block_end(net: &Ipv4Network) -> u32 {
    block_start(net) | !prefix_mask(net.prefix())
}

fn block(start: u32, prefix: u8) -> Ipv4Network {
    Ipv4Network::new(u32_to_ip(start), prefix).expect("prefix is always <= 32")
}

/// Largest `k` such that the 2^k block at `start` stays inside its natural
/// alignment and does not exceed `max_len` addresses.
pub fn largest_cidr_size(start: u32, max_len: u64) -> u32 {
    debug_assert!(max_len >= 1);
    let align = if start == 0 { 32 } else { start.trailing_zeros() };
    let fit = 63 - max_len.leading_zeros();
    align.min(fit).min(32)
}

/// Merge a CIDR list into the minimal equivalent list.
///
/// Host bits are normalized away first. The sweep drops blocks contained in
/// an earlier block, then a stack pass greedily coalesces buddy pairs into
/// their parent, cascading as far up as the alignment allows. Idempotent and
/// address-set preserving. Output is in ascending address order.
pub fn merge(ranges: &[Ipv4Network]) -> Vec<Ipv4Network> {
    let blocks = ranges
        .iter()
        .map(|net| (ip_to_u32(net.network()), net.prefix()))
        .sorted()
        .dedup()
        .collect::<Vec<_>>();

    // Containment sweep. Sorted by (start, prefix asc), so a block is
    // contained in an earlier one exactly when its end does not move the
    // running maximum.
    let mut stack: Vec<(u32, u8)> = Vec::with_capacity(blocks.len());
    let mut max_end: Option<u32> = None;
    for (start, prefix) in blocks {
        let end = start | !prefix_mask(prefix);
        if matches!(max_end, Some(seen) if end <= seen) {
            continue;
        }
        max_end = Some(end);

        stack.push((start, prefix));
        // Coalesce buddies at the top of the stack. A freshly formed parent
        // may itself complete the next pair, so keep folding.
        while stack.len() >= 2 {
            let (hi_start, hi_prefix) = stack[stack.len() - 1];
            let (lo_start, lo_prefix) = stack[stack.len() - 2];
            if lo_prefix != hi_prefix || lo_prefix == 0 {
                break;
            }
            let half = 1u64 << (32 - u32::from(lo_prefix));
            let parent_aligned = (u64::from(lo_start) & (half * 2 - 1)) == 0;
            if !parent_aligned || u64::from(hi_start) != u64::from(lo_start) + half {
                break;
            }
            stack.pop();
            stack.pop();
            stack.push((lo_start, lo_prefix - 1));
        }
    }

    stack
        .into_iter()
        .map(|(start, prefix)| block(start, prefix))
        .collect()
}

/// Subtract the whitelist from the blacklist, emitting the minimal CIDR
/// cover of `addresses(blacklist) \ addresses(whitelist)`.
///
/// Each blacklist block is either dropped whole (covered by a whitelist
/// block) or has the nested whitelist blocks punched out of it, with the
/// surviving gaps re-covered greedily via [`largest_cidr_size`].
pub fn remove_whitelisted(blacklist: &[Ipv4Network], whitelist: &[Ipv4Network]) -> Vec<Ipv4Network> {
    let blacklist = merge(blacklist);
    let whitelist = merge(whitelist);

    let mut out = Vec::with_capacity(blacklist.len());
    for black in &blacklist {
        let black_start = block_start(black);
        let black_end = block_end(black);

        if whitelist
            .iter()
            .any(|white| block_start(white) <= black_start && block_end(white) >= black_end)
        {
            continue;
        }

        // The whitelist is merged and laminar vs. `black`, so every
        // intersecting block is strictly nested and they are disjoint from
        // each other, already in ascending order.
        let mut cursor = u64::from(black_start);
        for white in whitelist
            .iter()
            .filter(|white| block_start(white) >= black_start && block_end(white) <= black_end)
        {
            let white_start = u64::from(block_start(white));
            if white_start > cursor {
                cover_range(cursor as u32, (white_start - 1) as u32, &mut out);
            }
            cursor = u64::from(block_end(white)) + 1;
        }
        if cursor <= u64::from(black_end) {
            cover_range(cursor as u32, black_end, &mut out);
        }
    }
    out
}

/// Cover the inclusive address range with the minimal CIDR sequence.
fn cover_range(start: u32, end: u32, out: &mut Vec<Ipv4Network>) {
    let mut cursor = u64::from(start);
    let last = u64::from(end);
    while cursor <= last {
        let bits = largest_cidr_size(cursor as u32, last - cursor + 1);
        out.push(block(cursor as u32, (32 - bits) as u8));
        cursor += 1u64 << bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nets(texts: &[&str]) -> Vec<Ipv4Network> {
        texts.iter().map(|t| t.parse().unwrap()).collect()
    }

    fn strings(nets: &[Ipv4Network]) -> Vec<String> {
        nets.iter().map(|n| n.to_string()).collect()
    }

    /// Enumerate the covered addresses of small fixtures for equivalence checks.
    fn addresses(nets: &[Ipv4Network]) -> std::collections::BTreeSet<u32> {
        let mut set = std::collections::BTreeSet::new();
        for net in nets {
            for addr in block_start(net)..=block_end(net) {
                set.insert(addr);
            }
        }
        set
    }

    #[test]
    fn merge_adjacent_pair() {
        let merged = merge(&nets(&["192.168.0.0/24", "192.168.1.0/24"]));
        assert_eq!(strings(&merged), ["192.168.0.0/23"]);
    }

    #[test]
    fn merge_contained_block() {
        let merged = merge(&nets(&["192.168.0.0/16", "192.168.1.0/24"]));
        assert_eq!(strings(&merged), ["192.168.0.0/16"]);
    }

    #[test]
    fn merge_cascades_up() {
        let merged = merge(&nets(&[
            "10.0.0.0/24",
            "10.0.1.0/24",
            "10.0.2.0/24",
            "10.0.3.0/24",
        ]));
        assert_eq!(strings(&merged), ["10.0.0.0/22"]);
    }

    #[test]
    fn merge_misaligned_neighbors_stay_apart() {
        // 1 and 2 are neighbors but not buddies: their parent would not be aligned.
        let merged = merge(&nets(&["192.168.1.0/24", "192.168.2.0/24"]));
        assert_eq!(strings(&merged), ["192.168.1.0/24", "192.168.2.0/24"]);
    }

    #[test]
    fn merge_normalizes_host_bits() {
        let merged = merge(&nets(&["10.1.2.3/24"]));
        assert_eq!(strings(&merged), ["10.1.2.0/24"]);
    }

    #[test]
    fn merge_is_idempotent_and_equivalent() {
        let input = nets(&[
            "172.16.0.0/30",
            "172.16.0.4/30",
            "172.16.0.8/29",
            "172.16.0.0/29",
            "172.16.0.32/31",
        ]);
        let once = merge(&input);
        let twice = merge(&once);
        assert_eq!(once, twice);
        assert_eq!(addresses(&input), addresses(&once));
    }

    #[test]
    fn merge_full_space() {
        let merged = merge(&nets(&["0.0.0.0/1", "128.0.0.0/1"]));
        assert_eq!(strings(&merged), ["0.0.0.0/0"]);
    }

    #[test]
    fn largest_block_alignment_and_fit() {
        // Aligned /24 start but only 201 addresses left: 2^7 wins.
        assert_eq!(largest_cidr_size(0xC0A8_0100, 201), 7);
        // Odd start pins the block to a single address.
        assert_eq!(largest_cidr_size(0xC0A8_01C9, 55), 0);
        // Whole space.
        assert_eq!(largest_cidr_size(0, 1 << 32), 32);
    }

    #[test]
    fn subtract_single_host() {
        let out = remove_whitelisted(&nets(&["192.168.1.0/24"]), &nets(&["192.168.1.201/32"]));
        assert_eq!(
            strings(&out),
            [
                "192.168.1.0/25",
                "192.168.1.128/26",
                "192.168.1.192/29",
                "192.168.1.200/32",
                "192.168.1.202/31",
                "192.168.1.204/30",
                "192.168.1.208/28",
                "192.168.1.224/27",
            ]
        );
    }

    #[test]
    fn subtract_drops_covered_block() {
        let out = remove_whitelisted(&nets(&["10.1.0.0/16"]), &nets(&["10.0.0.0/8"]));
        assert!(out.is_empty());
    }

    #[test]
    fn subtract_without_intersection_is_identity() {
        let black = nets(&["10.0.0.0/24"]);
        let out = remove_whitelisted(&black, &nets(&["192.168.0.0/16"]));
        assert_eq!(out, black);
    }

    #[test]
    fn subtract_is_exact_set_difference() {
        let black = nets(&["172.16.0.0/26", "172.16.0.128/26"]);
        let white = nets(&["172.16.0.16/30", "172.16.0.128/27"]);
        let out = remove_whitelisted(&black, &white);

        let mut expected = addresses(&black);
        for addr in addresses(&white) {
            expected.remove(&addr);
        }
        assert_eq!(addresses(&out), expected);
        // And the cover is minimal: merging it changes nothing.
        assert_eq!(merge(&out), out);
    }
}

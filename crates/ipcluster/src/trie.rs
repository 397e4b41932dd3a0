//! Binary radix trie over 32-bit IPv4 keys, MSB-first.
//!
//! Nodes live in a contiguous index-addressed arena. Index 0 is the root, so
//! a child index of 0 means "no child". Each node carries the number of
//! distinct addresses in its subtree; inserting a key twice changes nothing.

use crate::cidr::block_start;
use crate::ip::ip_to_u32;
use ipnetwork::Ipv4Network;

const NO_CHILD: u32 = 0;

#[derive(Clone, Copy, Default)]
struct Node {
    left: u32,
    right: u32,
    count: u32,
}

pub struct IpTrie {
    nodes: Vec<Node>,
}

impl Default for IpTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl IpTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// Pre-size the arena for roughly `keys` distinct addresses.
    pub fn with_capacity(keys: usize) -> Self {
        // Dense key sets share long prefixes; 4 nodes per key is a
        // comfortable upper estimate below the worst case of 32.
        let mut nodes = Vec::with_capacity(keys.saturating_mul(4).max(1));
        nodes.push(Node::default());
        Self { nodes }
    }

    /// Number of distinct addresses inserted.
    #[inline]
    pub fn len(&self) -> u32 {
        self.nodes[0].count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes allocated, root included.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn child(&self, node: u32, bit: u32) -> u32 {
        let node = &self.nodes[node as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn get_or_create_child(&mut self, node: u32, bit: u32, created: &mut bool) -> u32 {
        let existing = self.child(node, bit);
        if existing != NO_CHILD {
            return existing;
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(Node::default());
        let parent = &mut self.nodes[node as usize];
        if bit == 0 {
            parent.left = index;
        } else {
            parent.right = index;
        }
        *created = true;
        index
    }

    /// Insert one address. Returns `true` if it was not present before.
    pub fn insert(&mut self, key: u32) -> bool {
        let mut path = [0u32; 33];
        let mut node = 0u32;
        let mut created = false;
        for depth in 0..32 {
            let bit = (key >> (31 - depth)) & 1;
            node = self.get_or_create_child(node, bit, &mut created);
            path[depth as usize + 1] = node;
        }
        if created {
            for &index in &path {
                self.nodes[index as usize].count += 1;
            }
        }
        created
    }

    /// Batched insertion of an ascending key slice.
    ///
    /// Consecutive sorted keys share a prefix, so the descent resumes from
    /// the cached path at the first divergent bit instead of walking all 32
    /// levels from the root. Duplicates are adjacent in sorted input and are
    /// skipped outright.
    pub fn insert_sorted(&mut self, keys: &[u32]) {
        let mut path = [0u32; 33];
        let mut previous: Option<u32> = None;
        for &key in keys {
            if let Some(prev) = previous {
                debug_assert!(prev <= key, "insert_sorted requires ascending keys");
                if prev == key {
                    continue;
                }
            }
            // First divergent bit; the path above it is still valid.
            let resume = match previous {
                Some(prev) => (prev ^ key).leading_zeros() as usize,
                None => 0,
            };
            let mut node = path[resume];
            let mut created = false;
            for depth in resume..32 {
                let bit = (key >> (31 - depth)) & 1;
                node = self.get_or_create_child(node, bit, &mut created);
                path[depth + 1] = node;
            }
            debug_assert!(created, "distinct sorted keys always create a leaf");
            for &index in &path {
                self.nodes[index as usize].count += 1;
            }
            previous = Some(key);
        }
    }

    /// Alias for the root count.
    #[inline]
    pub fn count_all(&self) -> u32 {
        self.len()
    }

    /// Distinct addresses inside `cidr`, or 0 when no such subtree exists.
    pub fn count_in_cidr(&self, cidr: &Ipv4Network) -> u32 {
        let key = block_start(cidr);
        let mut node = 0u32;
        for depth in 0..u32::from(cidr.prefix()) {
            let bit = (key >> (31 - depth)) & 1;
            node = self.child(node, bit);
            if node == NO_CHILD {
                return 0;
            }
        }
        self.nodes[node as usize].count
    }

    /// Whether the exact address has been inserted.
    pub fn contains(&self, ip: std::net::Ipv4Addr) -> bool {
        let key = ip_to_u32(ip);
        let mut node = 0u32;
        for depth in 0..32 {
            let bit = (key >> (31 - depth)) & 1;
            node = self.child(node, bit);
            if node == NO_CHILD {
                return false;
            }
        }
        true
    }

    pub(crate) fn node_children_and_count(&self, node: u32) -> (u32, u32, u32) {
        let node = &self.nodes[node as usize];
        (node.left, node.right, node.count)
    }

    #[cfg(test)]
    fn check_count_invariant(&self, node: u32, depth: u32) {
        let (left, right, count) = self.node_children_and_count(node);
        if depth == 32 {
            assert_eq!(count, 1, "a leaf counts exactly one address");
            return;
        }
        let mut sum = 0;
        if left != NO_CHILD {
            self.check_count_invariant(left, depth + 1);
            sum += self.nodes[left as usize].count;
        }
        if right != NO_CHILD {
            self.check_count_invariant(right, depth + 1);
            sum += self.nodes[right as usize].count;
        }
        assert_eq!(count, sum, "internal count must equal the child sum");
    }
}

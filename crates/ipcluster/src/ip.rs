//! 32-bit IPv4 packing and the radix sort feeding the trie.

use std::net::Ipv4Addr;

/// Pack an address into its big-endian `u32` form. `0.0.0.0` maps to `0`.
#[inline]
pub fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

/// Inverse of [`ip_to_u32`].
#[inline]
pub fn u32_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_be_bytes())
}

/// In-place LSD radix sort: four 8-bit passes over a 256-bucket count array.
///
/// Sorted input is what makes [`crate::trie::IpTrie::insert_sorted`] fast, so
/// this must stay O(n) with O(n) auxiliary space. A pass whose keys all fall
/// into one bucket is skipped, which covers inputs confined to a narrow range
/// (one /8, one /16) with fewer scatter passes.
pub fn radix_sort_u32(keys: &mut [u32]) {
    if keys.len() <= 1 {
        return;
    }

    let mut scratch = vec![0u32; keys.len()];
    for shift in [0u32, 8, 16, 24] {
        let mut counts = [0usize; 256];
        for &key in keys.iter() {
            counts[((key >> shift) & 0xff) as usize] += 1;
        }
        if counts.iter().any(|&c| c == keys.len()) {
            // Single occupied bucket: this pass would be the identity.
            continue;
        }

        let mut offsets = [0usize; 256];
        let mut total = 0usize;
        for (bucket, &count) in counts.iter().enumerate() {
            offsets[bucket] = total;
            total += count;
        }
        for &key in keys.iter() {
            let bucket = ((key >> shift) & 0xff) as usize;
            scratch[offsets[bucket]] = key;
            offsets[bucket] += 1;
        }
        keys.copy_from_slice(&scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn roundtrip_u32() {
        for text in ["0.0.0.0", "10.20.30.40", "255.255.255.255", "192.168.1.201"] {
            let ip: Ipv4Addr = text.parse().unwrap();
            assert_eq!(u32_to_ip(ip_to_u32(ip)), ip);
        }
    }

    #[test]
    fn packing_is_big_endian() {
        assert_eq!(ip_to_u32(Ipv4Addr::new(1, 2, 3, 4)), 0x0102_0304);
        assert_eq!(ip_to_u32(Ipv4Addr::new(0, 0, 0, 0)), 0);
        assert_eq!(ip_to_u32(Ipv4Addr::new(255, 255, 255, 255)), u32::MAX);
    }

    #[test]
    fn radix_sort_matches_reference() {
        let mut rng = rand::thread_rng();
        for len in [0usize, 1, 2, 100, 10_000] {
            let mut keys: Vec<u32> = (0..len).map(|_| rng.gen()).collect();
            let mut expected = keys.clone();
            expected.sort_unstable();
            radix_sort_u32(&mut keys);
            assert_eq!(keys, expected);
        }
    }

    #[test]
    fn radix_sort_narrow_range() {
        // All keys inside one /16, so the two upper passes are skipped.
        let mut rng = rand::thread_rng();
        let base = 0x0a14_0000u32;
        let mut keys: Vec<u32> = (0..5_000).map(|_| base | rng.gen_range(0..0x1_0000)).collect();
        let mut expected = keys.clone();
        expected.sort_unstable();
        radix_sort_u32(&mut keys);
        assert_eq!(keys, expected);
    }

    #[test]
    fn radix_sort_with_duplicates() {
        let mut keys = vec![5u32, 1, 5, 0, u32::MAX, 1, 5];
        radix_sort_u32(&mut keys);
        assert_eq!(keys, vec![0, 1, 1, 5, 5, 5, u32::MAX]);
    }
}

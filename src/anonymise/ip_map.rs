//! Deterministic, prefix-preserving, injective IP address rewriting.
//!
//! Implements the classic bit-by-bit prefix-preserving construction: each
//! output bit below the preserved prefix is the input bit XORed with one
//! bit of a keyed PRF evaluated over the output bits fixed so far. Because
//! every bit's mask depends only on already-determined output bits, two
//! addresses that share an *n*-bit prefix (*n* at or below the configured
//! preserved length) always produce outputs sharing that same prefix, and
//! the whole map is a bijection over the address space — collisions are
//! structurally impossible, but the rehash-with-counter path below is kept
//! as a defensive backstop in case a future PRF choice breaks that property.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Builds and caches the forward/reverse address mapping for one pipeline
/// run. Not `Sync`: each file gets its own `IpMap` seeded the same way, so
/// results are comparable across files without sharing mutable state.
pub struct IpMap {
    seed: [u8; 32],
    prefix_v4: u8,
    prefix_v6: u8,
    forward: HashMap<IpAddr, IpAddr>,
    reverse: HashMap<IpAddr, IpAddr>,
}

impl IpMap {
    pub fn new(seed: [u8; 32], prefix_v4: u8, prefix_v6: u8) -> Self {
        Self {
            seed,
            prefix_v4,
            prefix_v6,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn unique_v4_count(&self) -> u64 {
        self.forward.keys().filter(|a| a.is_ipv4()).count() as u64
    }

    pub fn unique_v6_count(&self) -> u64 {
        self.forward.keys().filter(|a| a.is_ipv6()).count() as u64
    }

    /// Returns the anonymised address for `addr`, computing and caching it
    /// on first touch. Multicast, broadcast, loopback, and unspecified
    /// addresses pass through unchanged, per policy.
    pub fn map(&mut self, addr: IpAddr) -> IpAddr {
        if is_exempt(addr) {
            return addr;
        }
        if let Some(mapped) = self.forward.get(&addr) {
            return *mapped;
        }

        let mut attempt = 0u32;
        loop {
            let candidate = self.compute(addr, attempt);
            if !self.reverse.contains_key(&candidate) {
                self.forward.insert(addr, candidate);
                self.reverse.insert(candidate, addr);
                return candidate;
            }
            attempt += 1;
        }
    }

    fn compute(&self, addr: IpAddr, attempt: u32) -> IpAddr {
        match addr {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4) as u128;
                let mapped = prefix_preserving_map(&self.seed, bits, 32, self.prefix_v4, attempt);
                IpAddr::V4(Ipv4Addr::from(mapped as u32))
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                let mapped = prefix_preserving_map(&self.seed, bits, 128, self.prefix_v6, attempt);
                IpAddr::V6(Ipv6Addr::from(mapped))
            }
        }
    }
}

fn is_exempt(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_multicast() || v4.is_broadcast() || v4.is_loopback() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_multicast() || v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Bit-by-bit prefix-preserving map over an address of `width` bits.
///
/// `attempt` perturbs the PRF key on a rehash so a defensive collision
/// retry still lands on a different, still prefix-preserving-up-to-`prefix`
/// mapping (the recomputed suffix bits change; the preserved prefix does
/// not, since those bits are copied verbatim regardless of `attempt`).
fn prefix_preserving_map(seed: &[u8; 32], addr_bits: u128, width: u8, prefix: u8, attempt: u32) -> u128 {
    let prefix = prefix.min(width);
    let mut out: u128 = 0;
    for i in 0..width {
        let shift = width - 1 - i;
        let in_bit = (addr_bits >> shift) & 1;
        let out_bit = if i < prefix {
            in_bit
        } else {
            let mask_bit = prf_bit(seed, out, i, attempt);
            in_bit ^ mask_bit
        };
        out = (out << 1) | out_bit;
    }
    out
}

/// One pseudorandom bit derived from the output bits fixed so far
/// (`prefix_so_far`, `prefix_len` bits wide) plus position and rehash
/// attempt, so every bit position and every retry gets an independent mask.
fn prf_bit(seed: &[u8; 32], prefix_so_far: u128, prefix_len: u8, attempt: u32) -> u128 {
    let mut mac = HmacSha256::new_from_slice(seed).expect("HMAC accepts any key length");
    mac.update(&prefix_so_far.to_be_bytes());
    mac.update(&[prefix_len]);
    mac.update(&attempt.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    ((digest[0] & 0x80) != 0) as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_fixed_seed() {
        let seed = [7u8; 32];
        let mut map1 = IpMap::new(seed, 24, 64);
        let mut map2 = IpMap::new(seed, 24, 64);
        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(map1.map(addr), map2.map(addr));
    }

    #[test]
    fn preserves_shared_prefix_up_to_configured_length() {
        let seed = [3u8; 32];
        let mut map = IpMap::new(seed, 24, 64);
        let a: IpAddr = "10.1.2.3".parse().unwrap();
        let b: IpAddr = "10.1.2.200".parse().unwrap();

        let fa = map.map(a);
        let fb = map.map(b);

        let IpAddr::V4(fa) = fa else { panic!() };
        let IpAddr::V4(fb) = fb else { panic!() };
        let mask = u32::MAX << (32 - 24);
        assert_eq!(u32::from(fa) & mask, u32::from(fb) & mask);
    }

    #[test]
    fn injective_over_several_addresses() {
        let seed = [9u8; 32];
        let mut map = IpMap::new(seed, 24, 64);
        let inputs = ["10.0.0.1", "10.0.0.2", "192.168.1.1", "172.16.5.9"];
        let mut outputs = Vec::new();
        for s in inputs {
            outputs.push(map.map(s.parse().unwrap()));
        }
        let mut deduped = outputs.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(outputs.len(), deduped.len());
    }

    #[test]
    fn exempt_addresses_pass_through() {
        let seed = [1u8; 32];
        let mut map = IpMap::new(seed, 24, 64);
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(map.map(loopback), loopback);
    }
}

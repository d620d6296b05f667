//! Expands configured CIDR ranges into concrete scan targets.

use std::net::IpAddr;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use cidr_utils::cidr::IpCidr;
use itertools::Itertools;
use rand::rng;
use rand::seq::SliceRandom;

use crate::input::ScanOrder;

/// Parses every configured range up front so a malformed block aborts the
/// run before any scanning starts.
///
/// ```rust
/// # use craftscan::address::parse_ranges;
/// let ranges = parse_ranges(&["10.0.0.0/30".to_owned()]).unwrap();
/// assert_eq!(ranges.len(), 1);
/// ```
pub fn parse_ranges(ranges: &[String]) -> Result<Vec<IpCidr>> {
    ranges
        .iter()
        .map(|range| {
            IpCidr::from_str(range.trim())
                .map_err(|e| anyhow!("invalid CIDR range {range:?}: {e}"))
        })
        .collect()
}

/// Expands ranges into scan targets, range order then natural host order.
///
/// Overlapping ranges are tolerated and not deduplicated. `Random` yields a
/// uniformly shuffled permutation; call again for a fresh shuffle.
pub fn expand(ranges: &[IpCidr], order: ScanOrder) -> Vec<IpAddr> {
    let mut ips = ranges.iter().flat_map(host_addresses).collect_vec();
    if order == ScanOrder::Random {
        ips.shuffle(&mut rng());
    }
    ips
}

/// Closed-form count of the addresses `expand` produces for one block.
pub fn host_count(cidr: &IpCidr) -> u128 {
    let bits: u32 = if cidr.is_ipv4() { 32 } else { 128 };
    let host_bits = bits - u32::from(cidr.network_length());
    let total = if host_bits >= 128 {
        u128::MAX
    } else {
        1u128 << host_bits
    };
    if excludes_edges(cidr) {
        total.saturating_sub(2)
    } else {
        total
    }
}

/// Usable host addresses of one block. IPv4 blocks below /31 lose their
/// network and broadcast addresses; /31, /32 and IPv6 blocks keep every
/// address.
fn host_addresses(cidr: &IpCidr) -> Vec<IpAddr> {
    let all = cidr.iter().map(|inet| inet.address());
    if excludes_edges(cidr) {
        let network = cidr.first_address();
        let broadcast = cidr.last_address();
        all.filter(|ip| *ip != network && *ip != broadcast).collect()
    } else {
        all.collect()
    }
}

fn excludes_edges(cidr: &IpCidr) -> bool {
    cidr.is_ipv4() && cidr.network_length() < 31
}

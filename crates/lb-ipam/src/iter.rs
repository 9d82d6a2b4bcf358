//! Address iteration.
//!
//! `next_ip` walks addresses one at a time inside a CIDR. It never stops on
//! its own: stepping past the highest address of a family yields the
//! all-zero address of that family. A containment check alone does not end
//! a walk over `0.0.0.0/0` or `::/0`, since the wrapped address is back in
//! range; [`addresses`] bounds the walk by the prefix size instead.

use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns the numeric successor of `ip` within its address family.
///
/// `255.255.255.255` is followed by `0.0.0.0`, and the IPv6 maximum by `::`.
#[must_use]
pub fn next_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4).wrapping_add(1))),
        IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6).wrapping_add(1))),
    }
}

/// Number of addresses covered by `cidr`, saturating at `u128::MAX` for
/// `::/0`.
#[must_use]
pub fn cidr_size(cidr: &IpNet) -> u128 {
    let host_bits = u32::from(cidr.max_prefix_len() - cidr.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Every address of `cidr` in ascending order, network address first.
///
/// Yields at most [`cidr_size`] addresses (capped at `usize::MAX`).
pub fn addresses(cidr: &IpNet) -> impl Iterator<Item = IpAddr> + use<> {
    let count = usize::try_from(cidr_size(cidr)).unwrap_or(usize::MAX);
    std::iter::successors(Some(cidr.network()), |ip| Some(next_ip(*ip))).take(count)
}

//! Address classification and ranking

use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64))
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(&v4);
    }
    let first = ip.segments()[0];
    !(ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80)
}

/// True for addresses reachable from the public internet
pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

/// Orders public addresses before private, loopback and link-local ones
///
/// Addresses in the same class compare by their rendered form, so sorting
/// any permutation of a list gives the same result.
pub fn public_addresses_first(a: &SocketAddr, b: &SocketAddr) -> Ordering {
    let a_public = is_public(&a.ip());
    let b_public = is_public(&b.ip());
    b_public
        .cmp(&a_public)
        .then_with(|| a.to_string().cmp(&b.to_string()))
}

/// Sort addresses best-first
pub fn rank_addresses(addrs: &mut [SocketAddr]) {
    addrs.sort_by(public_addresses_first);
}

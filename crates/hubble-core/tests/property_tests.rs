//! Property-based tests
//!
//! Uses proptest to check invariants of address ranking and the gossip
//! envelope codec.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hubble_core::network::{is_public, rank_addresses, GOSSIP_PROTOCOL_VERSION};
use hubble_core::GossipEnvelope;
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

fn ipv4_strategy() -> impl Strategy<Value = IpAddr> {
    prop_oneof![
        // private and loopback ranges show up often in address books
        (any::<u8>(), any::<u8>()).prop_map(|(c, d)| IpAddr::V4(Ipv4Addr::new(10, 0, c, d))),
        (any::<u8>(), any::<u8>()).prop_map(|(c, d)| IpAddr::V4(Ipv4Addr::new(192, 168, c, d))),
        Just(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        any::<[u8; 4]>().prop_map(|o| IpAddr::V4(Ipv4Addr::from(o))),
    ]
}

fn ipv6_strategy() -> impl Strategy<Value = IpAddr> {
    prop_oneof![
        any::<u16>().prop_map(|s| IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, s))),
        any::<[u8; 16]>().prop_map(|o| IpAddr::V6(Ipv6Addr::from(o))),
    ]
}

fn socket_addrs_strategy() -> impl Strategy<Value = Vec<SocketAddr>> {
    prop::collection::vec(
        (prop_oneof![ipv4_strategy(), ipv6_strategy()], 1..u16::MAX)
            .prop_map(|(ip, port)| SocketAddr::new(ip, port)),
        0..12,
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Ranking does not depend on the order addresses were learned in
    #[test]
    fn ranking_is_permutation_invariant(
        (addrs, shuffled) in socket_addrs_strategy()
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let mut a = addrs;
        let mut b = shuffled;
        rank_addresses(&mut a);
        rank_addresses(&mut b);
        prop_assert_eq!(a, b);
    }

    /// No private address is ranked ahead of a public one
    #[test]
    fn public_addresses_come_first(addrs in socket_addrs_strategy()) {
        let mut ranked = addrs;
        rank_addresses(&mut ranked);
        let first_private = ranked.iter().position(|a| !is_public(&a.ip()));
        if let Some(i) = first_private {
            prop_assert!(ranked[i..].iter().all(|a| !is_public(&a.ip())));
        }
    }

    /// Arbitrary bytes either decode to a whole envelope or fail cleanly
    #[test]
    fn envelope_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(envelope) = GossipEnvelope::decode(&bytes) {
            prop_assert_eq!(envelope.version, GOSSIP_PROTOCOL_VERSION);
        }
    }
}

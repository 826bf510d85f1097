//! Loopback/private-network predicate for `local-trusted` mode (spec
//! §4.8): checked over an IP address rather than a Unix socket peer
//! credential, since the gateway's admin surface is HTTP.

use std::net::{IpAddr, Ipv4Addr};

pub fn is_local_trusted_peer(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_ipv4_local(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                is_ipv4_local(mapped)
            } else {
                v6.is_loopback() || is_unique_local(v6)
            }
        }
    }
}

fn is_ipv4_local(v4: Ipv4Addr) -> bool {
    v4.is_loopback() || v4.is_private()
}

fn is_unique_local(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

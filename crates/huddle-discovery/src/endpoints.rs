//! Advertised-endpoint enumeration.
//!
//! A node listening on a wildcard address can be reached at any of the
//! host's interface addresses; a node bound to one address only at that
//! one. The advertisement carries them as `https://` URLs, ordered by
//! reachability preference.

use std::net::{IpAddr, SocketAddr};

use get_if_addrs::{get_if_addrs, IfAddr};

/// Enumerate the URLs at which a server bound to `listen` is reachable.
pub fn advertised_endpoints(listen: SocketAddr) -> Vec<String> {
    let mut addrs = Vec::new();
    match get_if_addrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                let ip = match interface.addr {
                    IfAddr::V4(v4) => IpAddr::V4(v4.ip),
                    IfAddr::V6(v6) => IpAddr::V6(v6.ip),
                };
                if keep(listen.ip(), ip) {
                    addrs.push(ip);
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate interfaces");
        }
    }

    if addrs.is_empty() && !listen.ip().is_unspecified() {
        addrs.push(listen.ip());
    }

    addrs.sort_by_key(|ip| sort_key(*ip));
    addrs.dedup();

    addrs
        .into_iter()
        .map(|ip| format_endpoint(ip, listen.port()))
        .collect()
}

fn format_endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("https://{v4}:{port}"),
        IpAddr::V6(v6) => format!("https://[{v6}]:{port}"),
    }
}

/// Does an interface address qualify for the advertisement, given the
/// bound listen address?
fn keep(bound: IpAddr, candidate: IpAddr) -> bool {
    if !bound.is_unspecified() {
        return bound == candidate;
    }
    // a wildcard v4 listener is not reachable over v6
    match bound {
        IpAddr::V4(_) => candidate.is_ipv4(),
        IpAddr::V6(_) => true,
    }
}

/// Preference order: IPv4 first, private ranges first, loopback first,
/// lexicographic tiebreak.
fn sort_key(ip: IpAddr) -> (u8, u8, u8, String) {
    let v4_rank = if ip.is_ipv4() { 0 } else { 1 };
    let private_rank = if is_private(ip) { 0 } else { 1 };
    let loopback_rank = if ip.is_loopback() { 0 } else { 1 };
    (v4_rank, private_rank, loopback_rank, ip.to_string())
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        // unique-local fc00::/7
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

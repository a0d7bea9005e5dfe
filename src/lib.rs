#![doc = include_str!("../README.md")]
use std::net::{IpAddr, SocketAddr};

pub use chain::{HeaderFormat, extract_chain};
pub use config::{DEFAULT_ATTRIBUTE_NAME, DEFAULT_HEADER_NAMES, ResolverConfig};
pub use error::Error;
use http::{HeaderMap, Request};
pub use normalize::normalize_address;
use tracing::{debug, trace};
pub use trust::{AddressFamily, TrustSpec, TrustedProxies};

mod chain;
mod config;
mod normalize;
mod trust;

type Result<T> = std::result::Result<T, Error>;

/// Request extension holding the resolved client address, inserted by
/// [`annotate`]. `None` when no address could be established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// Resolves the originating client address of a request.
///
/// `peer` is the transport peer address, optionally with a port suffix.
/// IPv4-mapped IPv6 peers are treated as IPv4, as in [`resolve_socket`].
/// Without a peer no address is returned, headers are never consulted.
/// Forwarding headers are only honored when the configuration checks proxy
/// headers and the peer is trusted; malformed headers are skipped.
pub fn resolve(
    peer: Option<&str>,
    header_map: &HeaderMap,
    config: &ResolverConfig,
) -> Option<IpAddr> {
    let peer = peer?;
    let Some(ip) = normalize_address(peer) else {
        debug!(peer, "direct peer is not an IP address");
        return None;
    };
    Some(resolve_from_peer(ip.to_canonical(), header_map, config))
}

/// Same as [`resolve`] for a peer taken from the transport layer.
/// IPv4-mapped IPv6 peers are treated as IPv4.
pub fn resolve_socket(
    peer: Option<SocketAddr>,
    header_map: &HeaderMap,
    config: &ResolverConfig,
) -> Option<IpAddr> {
    let ip = peer?.ip().to_canonical();
    Some(resolve_from_peer(ip, header_map, config))
}

/// Resolves the client address of `request` and stores it as a [`ClientIp`]
/// extension. Returns the stored address.
pub fn annotate<B>(
    request: &mut Request<B>,
    peer: Option<SocketAddr>,
    config: &ResolverConfig,
) -> Option<IpAddr> {
    let ip = resolve_socket(peer, request.headers(), config);
    request.extensions_mut().insert(ClientIp(ip));
    ip
}

fn resolve_from_peer(peer: IpAddr, header_map: &HeaderMap, config: &ResolverConfig) -> IpAddr {
    let Some(trusted_proxies) = config.trusted_proxies() else {
        return peer;
    };
    // An empty set trusts the direct peer implicitly
    if !trusted_proxies.is_empty() && !trusted_proxies.is_trusted(&peer) {
        debug!(%peer, "direct peer is not a trusted proxy, ignoring forwarding headers");
        return peer;
    }

    let Some((header_name, chain)) = config
        .header_names()
        .iter()
        .find_map(|name| chain::chain_from_headers(header_map, name).map(|found| (name, found)))
    else {
        return peer;
    };

    let client = match config.hop_count() {
        Some(hop_count) => by_hop_count(&chain, hop_count, trusted_proxies),
        None => newest_untrusted(&chain, trusted_proxies),
    };
    trace!(%peer, header = %header_name, ?chain, ?client, "resolved client address");
    client.unwrap_or(peer)
}

/// Walks the chain from the newest entry, returning the first address that
/// is not a trusted proxy, or the oldest entry if all of them are.
fn newest_untrusted(chain: &[IpAddr], trusted_proxies: &TrustedProxies) -> Option<IpAddr> {
    chain
        .iter()
        .rev()
        .find(|ip| !trusted_proxies.is_trusted(ip))
        .or_else(|| chain.first())
        .copied()
}

/// Skips `hop_count` entries from the newest end, then keeps moving toward
/// the oldest entry while the candidate is a trusted proxy. Falls back to the
/// oldest entry when the count or the walk runs past it. A zero count
/// selects nothing, leaving the direct peer as the client.
fn by_hop_count(
    chain: &[IpAddr],
    hop_count: usize,
    trusted_proxies: &TrustedProxies,
) -> Option<IpAddr> {
    if hop_count == 0 {
        return None;
    }
    let Some(mut index) = chain.len().checked_sub(hop_count) else {
        return chain.first().copied();
    };
    while index > 0 && trusted_proxies.is_trusted(&chain[index]) {
        index -= 1;
    }
    chain.get(index).copied()
}

mod error {
    /// The crate error, raised while building a configuration
    #[derive(Debug, PartialEq, thiserror::Error)]
    pub enum Error {
        /// A trusted proxy pattern is neither an address, a CIDR block, an
        /// IPv4 wildcard nor `*`
        #[error("invalid trusted proxy `{spec}`: {reason}")]
        InvalidTrustSpec {
            /// The offending pattern
            spec: String,
            /// What is wrong with it
            reason: &'static str,
        },
        /// Proxy headers are enabled but no trusted proxy list was given.
        /// An empty list has to be given explicitly to trust any peer.
        #[error("`trusted_proxies` is required when `check_proxy_headers` is enabled")]
        MissingTrustedProxies,
        /// A configured header name is not a valid HTTP header name
        #[error("invalid header name `{name}`")]
        InvalidHeaderName {
            /// The offending name
            name: String,
        },
    }

    impl Error {
        pub(crate) fn invalid_trust_spec(spec: &str, reason: &'static str) -> Self {
            Self::InvalidTrustSpec {
                spec: spec.to_owned(),
                reason,
            }
        }
    }
}

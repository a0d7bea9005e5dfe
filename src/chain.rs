use std::net::IpAddr;

use forwarded_header_value::{ForwardedHeaderValue, Identifier};
use http::{HeaderMap, HeaderName, HeaderValue, header::FORWARDED};
use tracing::debug;

use crate::normalize::normalize_address;

/// How a forwarding header encodes the addresses of the hops it passed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderFormat {
    /// [RFC 7239](https://www.rfc-editor.org/rfc/rfc7239.html) `Forwarded`:
    /// comma separated elements of `;` separated `key=value` pairs, the
    /// hop address being the `for` parameter
    Forwarded,
    /// Comma separated addresses, as in `X-Forwarded-For`, or a single
    /// address, as in `Client-Ip`
    List,
}

impl HeaderFormat {
    /// The format used by a header
    pub fn of(header_name: &HeaderName) -> Self {
        if *header_name == FORWARDED {
            Self::Forwarded
        } else {
            Self::List
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub(crate) enum Rejection {
    #[error("header value contains non-ASCII characters")]
    NonAscii,
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("malformed header value `{0}`")]
    MalformedParameter(String),
    #[error("no `for` parameter")]
    NoAddresses,
}

/// Extracts the address chain recorded in a forwarding header value,
/// oldest (client end) first.
///
/// Returns `None` if any entry is malformed; a partially valid header is
/// never used.
pub fn extract_chain(header_name: &HeaderName, header_value: &str) -> Option<Vec<IpAddr>> {
    parse_chain(HeaderFormat::of(header_name), header_value)
        .inspect_err(|reason| {
            debug!(header = %header_name, value = header_value, %reason, "ignoring forwarding header");
        })
        .ok()
}

/// Extracts the chain from all occurrences of `header_name`, joined in
/// arrival order. `None` if the header is absent or rejected.
pub(crate) fn chain_from_headers(
    header_map: &HeaderMap,
    header_name: &HeaderName,
) -> Option<Vec<IpAddr>> {
    let occurrences = header_map.get_all(header_name);
    occurrences.iter().next()?;

    match occurrences
        .iter()
        .map(HeaderValue::to_str)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(values) => extract_chain(header_name, &values.join(",")),
        Err(_) => {
            debug!(header = %header_name, reason = %Rejection::NonAscii, "ignoring forwarding header");
            None
        }
    }
}

pub(crate) fn parse_chain(format: HeaderFormat, header_value: &str) -> Result<Vec<IpAddr>, Rejection> {
    match format {
        HeaderFormat::Forwarded => forwarded_chain(header_value),
        HeaderFormat::List => header_value.split(',').map(address).collect(),
    }
}

/// Elements without a `for` parameter record no hop address and are
/// skipped; an obfuscated or `unknown` identifier rejects the header.
fn forwarded_chain(header_value: &str) -> Result<Vec<IpAddr>, Rejection> {
    let stanzas = ForwardedHeaderValue::from_forwarded(header_value)
        .map_err(|_| Rejection::MalformedParameter(header_value.trim().to_owned()))?;

    let chain = stanzas
        .into_iter()
        .filter_map(|stanza| stanza.forwarded_for)
        .map(forwarded_address)
        .collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(Rejection::NoAddresses);
    }
    Ok(chain)
}

fn forwarded_address(identifier: Identifier) -> Result<IpAddr, Rejection> {
    match identifier {
        Identifier::SocketAddr(addr) => Ok(addr.ip()),
        Identifier::IpAddr(ip) => Ok(ip),
        Identifier::String(name) => Err(Rejection::InvalidAddress(name)),
        Identifier::Unknown => Err(Rejection::InvalidAddress("unknown".to_owned())),
    }
}

fn address(token: &str) -> Result<IpAddr, Rejection> {
    normalize_address(token).ok_or_else(|| Rejection::InvalidAddress(token.trim().to_owned()))
}

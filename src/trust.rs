use std::{fmt, net::IpAddr, str::FromStr};

use ipnet::IpNet;

use crate::{Error, Result};

/// IP address family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl AddressFamily {
    /// Returns the family of an address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

/// A single trusted proxy rule.
///
/// Parsed from its textual form with [`str::parse`]:
///
/// | Pattern           | Variant      |
/// |-------------------|--------------|
/// | `*`               | `MatchAll`   |
/// | `10.0.0.0/8`      | `Cidr`       |
/// | `10.0.*.*`        | `Wildcard`   |
/// | `192.168.0.1`     | `Exact`      |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrustSpec {
    /// Matches every address
    MatchAll,
    /// Matches a single address
    Exact(IpAddr),
    /// Matches every address of a network, never an address of the other family
    Cidr(IpNet),
    /// Matches IPv4 addresses octet by octet, `None` stands for `*`
    Wildcard([Option<u8>; 4]),
}

impl TrustSpec {
    /// The address family this rule applies to, `None` for [`TrustSpec::MatchAll`]
    pub fn family(&self) -> Option<AddressFamily> {
        match self {
            Self::MatchAll => None,
            Self::Exact(ip) => Some(AddressFamily::of(ip)),
            Self::Cidr(IpNet::V4(_)) | Self::Wildcard(_) => Some(AddressFamily::V4),
            Self::Cidr(IpNet::V6(_)) => Some(AddressFamily::V6),
        }
    }

    /// Checks whether `ip` is covered by this rule
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Exact(exact) => exact == ip,
            Self::Cidr(net) => net.contains(ip),
            Self::Wildcard(pattern) => match ip {
                IpAddr::V4(v4) => pattern
                    .iter()
                    .zip(v4.octets())
                    .all(|(expected, octet)| expected.is_none_or(|expected| expected == octet)),
                IpAddr::V6(_) => false,
            },
        }
    }
}

impl FromStr for TrustSpec {
    type Err = Error;

    fn from_str(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern == "*" {
            Ok(Self::MatchAll)
        } else if pattern.contains('/') {
            pattern
                .parse()
                .map(Self::Cidr)
                .map_err(|_| Error::invalid_trust_spec(pattern, "malformed CIDR block"))
        } else if pattern.contains('*') {
            parse_wildcard(pattern)
                .map(Self::Wildcard)
                .ok_or_else(|| Error::invalid_trust_spec(pattern, "malformed IPv4 wildcard"))
        } else {
            pattern
                .parse()
                .map(Self::Exact)
                .map_err(|_| Error::invalid_trust_spec(pattern, "not an IP address"))
        }
    }
}

fn parse_wildcard(pattern: &str) -> Option<[Option<u8>; 4]> {
    let mut octets = [None; 4];
    let mut components = pattern.split('.');
    for octet in &mut octets {
        let component = components.next()?;
        if component != "*" {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            *octet = Some(component.parse().ok()?);
        }
    }
    components.next().is_none().then_some(octets)
}

impl fmt::Display for TrustSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => f.write_str("*"),
            Self::Exact(ip) => write!(f, "{ip}"),
            Self::Cidr(net) => write!(f, "{net}"),
            Self::Wildcard(octets) => {
                for (i, octet) in octets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    match octet {
                        Some(octet) => write!(f, "{octet}")?,
                        None => f.write_str("*")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// The set of rules describing which addresses are legitimate forwarding
/// proxies. Duplicate rules are dropped, order is irrelevant for matching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    specs: Vec<TrustSpec>,
}

impl TrustedProxies {
    /// An empty set. Configured as the trusted proxies of a resolver it
    /// means "trust the direct peer implicitly".
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every pattern, failing on the first malformed one
    pub fn parse<I>(patterns: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|pattern| pattern.as_ref().parse())
            .collect()
    }

    /// Adds a rule
    pub fn with(mut self, spec: TrustSpec) -> Self {
        self.insert(spec);
        self
    }

    fn insert(&mut self, spec: TrustSpec) {
        if !self.specs.contains(&spec) {
            self.specs.push(spec);
        }
    }

    /// Returns `true` when no rule is configured
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Checks whether any rule covers `ip`. Always `false` for an empty set.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.specs.iter().any(|spec| spec.matches(ip))
    }

    /// Iterates over the configured rules
    pub fn iter(&self) -> impl Iterator<Item = &TrustSpec> {
        self.specs.iter()
    }
}

impl FromIterator<TrustSpec> for TrustedProxies {
    fn from_iter<T: IntoIterator<Item = TrustSpec>>(iter: T) -> Self {
        let mut proxies = Self::new();
        for spec in iter {
            proxies.insert(spec);
        }
        proxies
    }
}

impl From<TrustSpec> for TrustedProxies {
    fn from(spec: TrustSpec) -> Self {
        Self::new().with(spec)
    }
}

use http::HeaderName;

use crate::{Error, Result, trust::TrustedProxies};

/// Default name under which adapters store the resolved address
pub const DEFAULT_ATTRIBUTE_NAME: &str = "ip_address";

/// Headers inspected by default, highest priority first
pub const DEFAULT_HEADER_NAMES: [&str; 5] = [
    "forwarded",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "client-ip",
];

/// Client address resolution settings.
///
/// Built once and shared by every resolution. Proxy headers are only
/// inspected when the configuration is created with
/// [`ResolverConfig::behind_proxies`], which requires the trusted proxy set
/// up front.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(try_from = "RawResolverConfig")
)]
pub struct ResolverConfig {
    /// `None` when proxy headers are ignored
    trusted_proxies: Option<TrustedProxies>,
    attribute_name: String,
    header_names: Vec<HeaderName>,
    hop_count: Option<usize>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::direct()
    }
}

impl ResolverConfig {
    /// Ignores forwarding headers, the direct peer is always the client
    pub fn direct() -> Self {
        Self {
            trusted_proxies: None,
            attribute_name: DEFAULT_ATTRIBUTE_NAME.to_owned(),
            header_names: DEFAULT_HEADER_NAMES
                .into_iter()
                .map(HeaderName::from_static)
                .collect(),
            hop_count: None,
        }
    }

    /// Inspects forwarding headers when the direct peer is trusted.
    ///
    /// An empty `trusted_proxies` set trusts the direct peer implicitly and
    /// takes the newest header entry as the client.
    pub fn behind_proxies(trusted_proxies: impl Into<TrustedProxies>) -> Self {
        Self {
            trusted_proxies: Some(trusted_proxies.into()),
            ..Self::direct()
        }
    }

    /// Sets the name adapters that store results by name use as the key.
    /// [`annotate`](crate::annotate) ignores it, its [`ClientIp`](crate::ClientIp)
    /// extension is keyed by type.
    pub fn with_attribute_name(mut self, attribute_name: impl Into<String>) -> Self {
        self.attribute_name = attribute_name.into();
        self
    }

    /// Replaces the inspected headers, highest priority first
    pub fn with_header_names(mut self, header_names: impl IntoIterator<Item = HeaderName>) -> Self {
        self.header_names = header_names.into_iter().collect();
        self
    }

    /// Like [`ResolverConfig::with_header_names`], validating textual names
    pub fn try_with_header_names<I>(self, header_names: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let header_names = header_names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                HeaderName::try_from(name).map_err(|_| Error::InvalidHeaderName {
                    name: name.to_owned(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_header_names(header_names))
    }

    /// Picks the client by counting `hop_count` proxies from the newest
    /// header entry instead of scanning for the first untrusted one
    pub fn with_hop_count(mut self, hop_count: usize) -> Self {
        self.hop_count = Some(hop_count);
        self
    }

    /// Whether forwarding headers are inspected at all
    pub fn check_proxy_headers(&self) -> bool {
        self.trusted_proxies.is_some()
    }

    /// Trusted proxies, `None` when forwarding headers are ignored
    pub fn trusted_proxies(&self) -> Option<&TrustedProxies> {
        self.trusted_proxies.as_ref()
    }

    /// Key for adapters that store the result by name, such as a
    /// request-attribute map. Not read by the resolver itself.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Inspected headers, highest priority first
    pub fn header_names(&self) -> &[HeaderName] {
        &self.header_names
    }

    /// Configured hop count
    pub fn hop_count(&self) -> Option<usize> {
        self.hop_count
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResolverConfig {
    #[serde(default)]
    check_proxy_headers: bool,
    trusted_proxies: Option<Vec<String>>,
    attribute_name: Option<String>,
    header_names: Option<Vec<String>>,
    hop_count: Option<usize>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawResolverConfig> for ResolverConfig {
    type Error = Error;

    fn try_from(raw: RawResolverConfig) -> Result<Self> {
        let trusted_proxies = raw
            .trusted_proxies
            .map(TrustedProxies::parse)
            .transpose()?;

        let mut config = match (raw.check_proxy_headers, trusted_proxies) {
            (true, Some(trusted_proxies)) => Self::behind_proxies(trusted_proxies),
            (true, None) => return Err(Error::MissingTrustedProxies),
            (false, _) => Self::direct(),
        };
        if let Some(attribute_name) = raw.attribute_name {
            config = config.with_attribute_name(attribute_name);
        }
        if let Some(header_names) = raw.header_names {
            config = config.try_with_header_names(header_names)?;
        }
        if let Some(hop_count) = raw.hop_count {
            config = config.with_hop_count(hop_count);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustSpec;

    #[test]
    fn test_direct() {
        let config = ResolverConfig::default();
        assert!(!config.check_proxy_headers());
        assert_eq!(config.trusted_proxies(), None);
        assert_eq!(config.attribute_name(), "ip_address");
        assert_eq!(
            config.header_names(),
            [
                HeaderName::from_static("forwarded"),
                HeaderName::from_static("x-forwarded-for"),
                HeaderName::from_static("x-forwarded"),
                HeaderName::from_static("x-cluster-client-ip"),
                HeaderName::from_static("client-ip"),
            ]
        );
        assert_eq!(config.hop_count(), None);
    }

    #[test]
    fn test_behind_proxies() {
        let config = ResolverConfig::behind_proxies(TrustSpec::MatchAll)
            .with_attribute_name("IP")
            .with_hop_count(2);
        assert!(config.check_proxy_headers());
        assert_eq!(
            config.trusted_proxies(),
            Some(&TrustedProxies::from(TrustSpec::MatchAll))
        );
        assert_eq!(config.attribute_name(), "IP");
        assert_eq!(config.hop_count(), Some(2));

        let implicit = ResolverConfig::behind_proxies(TrustedProxies::new());
        assert!(implicit.check_proxy_headers());
        assert!(implicit.trusted_proxies().is_some_and(TrustedProxies::is_empty));
    }

    #[test]
    fn test_header_names() {
        let config = ResolverConfig::direct()
            .try_with_header_names(["Foo-Bar", "X-Real-Ip"])
            .unwrap();
        assert_eq!(
            config.header_names(),
            [
                HeaderName::from_static("foo-bar"),
                HeaderName::from_static("x-real-ip")
            ]
        );

        assert_eq!(
            ResolverConfig::direct()
                .try_with_header_names(["bad header"])
                .unwrap_err(),
            Error::InvalidHeaderName {
                name: "bad header".into()
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize() {
        use serde_json::json;

        let config: ResolverConfig = serde_json::from_value(json!({
            "check_proxy_headers": true,
            "trusted_proxies": ["10.0.0.0/8", "192.168.*.*"],
            "header_names": ["X-Forwarded-For"],
            "hop_count": 1
        }))
        .unwrap();
        assert_eq!(
            config,
            ResolverConfig::behind_proxies(TrustedProxies::parse(["10.0.0.0/8", "192.168.*.*"]).unwrap())
                .with_header_names([HeaderName::from_static("x-forwarded-for")])
                .with_hop_count(1)
        );

        let config: ResolverConfig =
            serde_json::from_value(json!({ "check_proxy_headers": true, "trusted_proxies": [] }))
                .unwrap();
        assert_eq!(config, ResolverConfig::behind_proxies(TrustedProxies::new()));

        let config: ResolverConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ResolverConfig::direct());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_errors() {
        use serde_json::json;

        let err = serde_json::from_value::<ResolverConfig>(json!({ "check_proxy_headers": true }))
            .unwrap_err();
        assert_eq!(err.to_string(), Error::MissingTrustedProxies.to_string());

        let err = serde_json::from_value::<ResolverConfig>(json!({
            "check_proxy_headers": true,
            "trusted_proxies": ["10.0.0.0/40"]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/40"), "{err}");

        assert!(
            serde_json::from_value::<ResolverConfig>(json!({ "trusted_proxy": [] })).is_err()
        );
    }
}

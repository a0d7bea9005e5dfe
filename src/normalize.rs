use std::net::IpAddr;

/// Parses a single address token as found in forwarding headers or in a
/// transport peer address.
///
/// Surrounding whitespace and one layer of double quotes are removed.
/// Accepted shapes are bare IPv4 and IPv6 literals, `IPv4:port`, `[IPv6]`
/// and `[IPv6]:port`. Hostnames, `unknown` and obfuscated identifiers like
/// `_hidden` yield `None`.
pub fn normalize_address(token: &str) -> Option<IpAddr> {
    let token = unquote(token.trim()).trim();
    let literal = match token.strip_prefix('[') {
        Some(bracketed) => bracketed.split_once(']')?.0,
        None => strip_ipv4_port(token),
    };
    literal.parse().ok()
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(token)
}

/// Strips `:port` from a dotted-quad token. Anything else, including bare
/// IPv6 literals, is returned untouched.
fn strip_ipv4_port(token: &str) -> &str {
    match token.split_once(':') {
        Some((host, port)) if is_dotted_quad(host) && is_decimal(port) => host,
        _ => token,
    }
}

fn is_dotted_quad(host: &str) -> bool {
    let mut groups = 0;
    for group in host.split('.') {
        if !is_decimal(group) {
            return false;
        }
        groups += 1;
    }
    groups == 4
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

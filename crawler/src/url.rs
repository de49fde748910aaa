//! URL splitting, reference resolution, IDNA and percent-encoding helpers.
//!
//! Implements the analyzer's resolution algorithm (`spec.md` §4.4) at the
//! byte level rather than delegating to a strict parser, since the source
//! material the analyzer must cope with (raw `href=` scrapes, bare `http`
//! links found mid-text) is routinely not a well-formed absolute URI.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{CrawlError, Result};

/// WHATWG's "path" percent-encode set (used by the `url` crate internally):
/// controls, space, and the handful of bytes that are unsafe or structurally
/// significant outside a path component.
const PATH_SAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// WHATWG's "query" percent-encode set: like `PATH_SAFE` but `?` is legal
/// since the query has already been split off.
const QUERY_SAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// WHATWG's "fragment" percent-encode set.
const FRAGMENT_SAFE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// The five components of a generic URI, per RFC 3986 §3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parts {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

/// Split a URI-ish string into its components without validating legality of
/// any one component; this mirrors `urllib.parse.urlsplit`'s permissiveness.
pub fn split(input: &str) -> Parts {
    let (rest, fragment) = match input.split_once('#') {
        Some((head, tail)) => (head, Some(tail.to_string())),
        None => (input, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((head, tail)) => (head, Some(tail.to_string())),
        None => (rest, None),
    };

    let (scheme, rest) = split_scheme(rest);
    let (authority, path) = if let Some(stripped) = rest.strip_prefix("//") {
        match stripped.find('/') {
            Some(idx) => (stripped[..idx].to_string(), stripped[idx..].to_string()),
            None => (stripped.to_string(), String::new()),
        }
    } else {
        (String::new(), rest.to_string())
    };

    Parts {
        scheme,
        authority,
        path,
        query,
        fragment,
    }
}

fn split_scheme(input: &str) -> (String, &str) {
    if let Some(idx) = input.find(':') {
        let candidate = &input[..idx];
        let legal = !candidate.is_empty()
            && candidate.chars().next().unwrap().is_ascii_alphabetic()
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if legal {
            return (candidate.to_ascii_lowercase(), &input[idx + 1..]);
        }
    }
    (String::new(), input)
}

/// Remove the authority's userinfo and port, returning `(host, port)`.
pub fn split_authority(authority: &str) -> (&str, Option<&str>) {
    let host_and_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    // IPv6 literals are bracketed; don't split on the colons inside them.
    if let Some(end) = host_and_port.strip_prefix('[').and_then(|r| r.find(']')) {
        let host = &host_and_port[..end + 2];
        let rest = &host_and_port[end + 2..];
        return (host, rest.strip_prefix(':'));
    }
    match host_and_port.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_and_port, None),
    }
}

/// IDNA-encode an authority's host to ASCII, preserving userinfo/port.
pub fn ascii_authority(authority: &str) -> Result<String> {
    let (prefix, host_and_port) = match authority.split_once('@') {
        Some((user, rest)) => (format!("{user}@"), rest),
        None => (String::new(), authority),
    };
    let (host, port) = split_authority(host_and_port);
    if host.starts_with('[') {
        // IPv6 literal: not a domain name, passes through unmodified.
        return Ok(authority.to_string());
    }
    let ascii_host = idna::domain_to_ascii(host)?;
    Ok(match port {
        Some(p) => format!("{prefix}{ascii_host}:{p}"),
        None => format!("{prefix}{ascii_host}"),
    })
}

/// RFC 3986 §5.2.4 "remove_dot_segments", applied to a path made of `/`
/// separated segments.
pub fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "." => continue,
            ".." => {
                output.pop();
            }
            _ => output.push(seg),
        }
    }
    // An absolute path's split starts with an empty segment (from the
    // leading `/`), which `output` already carries through — join alone
    // reproduces the leading slash without doubling it.
    let mut result = output.join("/");
    if result.is_empty() {
        result.push('/');
    }
    result
}

/// RFC 3986 §5.3 "merge", for a relative-path reference against a base path
/// that has no authority override (the analyzer's case 2c, `spec.md` §4.4).
pub fn merge_paths(base_path: &str, reference_path: &str) -> String {
    let merged = match base_path.rfind('/') {
        Some(idx) => format!("{}{}", &base_path[..=idx], reference_path),
        None => format!("/{reference_path}"),
    };
    remove_dot_segments(&merged)
}

/// Percent-encode a path component with the RFC 3986 path-safe set.
pub fn percent_encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_SAFE).to_string()
}

/// Percent-encode a query string, form-style (per `spec.md` §4.4 step 6).
pub fn percent_encode_query(query: &str) -> String {
    utf8_percent_encode(query, QUERY_SAFE).to_string()
}

/// Percent-encode a fragment (per `spec.md` §4.4 step 7).
pub fn percent_encode_fragment(fragment: &str) -> String {
    utf8_percent_encode(fragment, FRAGMENT_SAFE).to_string()
}

/// Reassemble components back into a URL string.
pub fn join(parts: &Parts) -> String {
    let mut out = String::new();
    if !parts.scheme.is_empty() {
        out.push_str(&parts.scheme);
        out.push(':');
    }
    if !parts.authority.is_empty() {
        out.push_str("//");
        out.push_str(&parts.authority);
    }
    out.push_str(&parts.path);
    if let Some(q) = &parts.query {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = &parts.fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

/// Lowercase a host for use as the `domain` field of a `UrlRecord`. Port is
/// stripped when implied by the scheme (`spec.md` §3's domain invariant).
pub fn normalize_domain(authority: &str, scheme: &str) -> Result<String> {
    let ascii = ascii_authority(authority)?;
    let (host, port) = split_authority(&ascii);
    let implied = matches!((scheme, port), ("http", Some("80")) | ("https", Some("443")));
    let domain = if implied || port.is_none() {
        host.to_string()
    } else {
        ascii.clone()
    };
    Ok(domain.to_ascii_lowercase())
}

/// Split an absolute URL into `(url, domain)` for seeding / the `Host`
/// header, failing with `ParseError` if there is no host (`spec.md` §4.2
/// step 1).
pub fn parse_absolute(url: &str) -> Result<(String, String)> {
    let parts = split(url);
    if parts.authority.is_empty() {
        return Err(CrawlError::ParseError(format!("no host in url: {url}")));
    }
    let domain = normalize_domain(&parts.authority, &parts.scheme)?;
    Ok((url.to_string(), domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_url() {
        let p = split("https://example.test:8443/a/b?x=1&y=2#frag");
        assert_eq!(p.scheme, "https");
        assert_eq!(p.authority, "example.test:8443");
        assert_eq!(p.path, "/a/b");
        assert_eq!(p.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(p.fragment.as_deref(), Some("frag"));
    }

    #[test]
    fn splits_scheme_relative_path_only() {
        let p = split("/a/b.html");
        assert!(p.scheme.is_empty());
        assert!(p.authority.is_empty());
        assert_eq!(p.path, "/a/b.html");
    }

    #[test]
    fn remove_dot_segments_handles_parent_refs() {
        assert_eq!(remove_dot_segments("/a/b/../c"), "/a/c");
        assert_eq!(remove_dot_segments("/a/./b/"), "/a/b/");
    }

    #[test]
    fn merge_paths_replaces_last_segment() {
        assert_eq!(merge_paths("/intl/", "en.html"), "/intl/en.html");
        assert_eq!(merge_paths("/intl", "en.html"), "/en.html");
    }

    #[test]
    fn ascii_authority_round_trips_punycode() {
        let encoded = ascii_authority("初音ミク.com").unwrap();
        assert_eq!(encoded, "xn--pck1ew32ihn2d.com");
    }

    #[test]
    fn percent_encode_path_escapes_non_ascii() {
        assert_eq!(percent_encode_path("/は"), "/%E3%81%AF");
    }

    #[test]
    fn parse_absolute_rejects_missing_host() {
        assert!(parse_absolute("not a url").is_err());
    }
}

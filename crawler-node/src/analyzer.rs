//! Analyzer stage: extracts and resolves links from a fetched body.
//!
//! Combines `crawler_extract::extract_urls` (the byte-stream scanner) with
//! the reference-resolution algorithm of `spec.md` §4.4, applied against the
//! page's own url as the base so a scraped `href="/about"` becomes an
//! absolute, normalized `UrlRecord`. Same-origin references fall back to the
//! RFC 3986 §5.3 merge algorithm; authority-less hrefs that look like a bare
//! `host:port/path` or `host/path` (no scheme recognisable) are treated as
//! such per the spec's malformed-href handling rather than merged.

use std::fs;

use crawler::config::Config;
use crawler::error::{CrawlError, Result};
use crawler::record::{AnalyzedResult, FetchResult, UrlRecord};
use crawler::url::{self, Parts};
use crawler_extract::extract_urls;

use crate::stage::Stage;

/// Resolve `reference` against `base`, following `spec.md` §4.4's five-step
/// algorithm rather than a textbook RFC 3986 §5.3 merge: an href with no
/// authority gets one of three treatments depending on what its path looks
/// like, since scraped hrefs are routinely not well-formed references.
/// Returns `None` when the result ends up with no authority at all (a
/// same-origin merge can't fabricate one if the base itself somehow lacks
/// one).
fn resolve(base: &Parts, reference: &str, drop_fragments: bool, drop_query: bool) -> Option<(String, String)> {
    let reference = url::split(reference);

    // Step 2: authority missing — path contains `:` (malformed host:port with
    // no `//`), or looks like a bare `host/path` (has both `/` and `.`), or is
    // a genuine same-origin reference to merge against the base path.
    let (scheme, authority, path, query, domains_match) = if !reference.authority.is_empty() {
        (
            reference.scheme,
            reference.authority,
            url::remove_dot_segments(&reference.path),
            reference.query,
            false,
        )
    } else if reference.path.contains(':') {
        let resplit = url::split(&format!("//{}", reference.path));
        (reference.scheme, resplit.authority, resplit.path, reference.query, false)
    } else if reference.path.contains('/') && reference.path.contains('.') {
        let resplit = url::split(&format!("http://{}", reference.path));
        (resplit.scheme, resplit.authority, resplit.path, reference.query, false)
    } else if reference.path.is_empty() {
        (
            base.scheme.clone(),
            base.authority.clone(),
            base.path.clone(),
            reference.query,
            true,
        )
    } else {
        let path = if reference.path.starts_with('/') {
            url::remove_dot_segments(&reference.path)
        } else {
            url::merge_paths(&base.path, &reference.path)
        };
        (base.scheme.clone(), base.authority.clone(), path, reference.query, true)
    };

    let mut target = Parts {
        scheme,
        authority,
        path,
        query,
        fragment: None,
    };

    // Step 4: a reference with its own scheme keeps it; otherwise inherit the
    // origin's scheme only when the resolved authority is the origin's own.
    if target.scheme.is_empty() {
        target.scheme = if domains_match { base.scheme.clone() } else { "http".to_string() };
    }

    if !drop_fragments {
        target.fragment = reference.fragment;
    }
    if drop_query {
        target.query = None;
    }

    if target.authority.is_empty() {
        return None;
    }

    // Step 3: IDNA-encode the authority to ASCII.
    target.authority = url::ascii_authority(&target.authority).ok()?;
    target.path = url::percent_encode_path(&target.path);
    target.query = target.query.as_deref().map(url::percent_encode_query);
    target.fragment = target.fragment.as_deref().map(url::percent_encode_fragment);

    let domain = url::normalize_domain(&target.authority, &target.scheme).ok()?;
    Some((url::join(&target), domain))
}

pub struct AnalyzerStage {
    drop_fragments: bool,
    drop_query: bool,
}

impl AnalyzerStage {
    pub fn new(config: &Config) -> Self {
        Self {
            drop_fragments: config.parser_drop_fragments,
            drop_query: config.parser_drop_query,
        }
    }
}

impl Stage for AnalyzerStage {
    type Input = FetchResult;
    type Output = AnalyzedResult;

    fn on_message(&mut self, fetch: FetchResult) -> Result<Option<AnalyzedResult>> {
        if !fetch.success {
            return Ok(Some(AnalyzedResult { fetch, urls: Vec::new() }));
        }

        // A missing input file is a per-message failure (`spec.md` §7, code
        // 12), not a fatal worker fault — report it on the record rather than
        // propagating, matching `FileNotFound`/`ReadTimeout`/`ReadCutoff`'s
        // treatment in the fetcher.
        let body = match fs::read(&fetch.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut fetch = fetch;
                fetch.success = false;
                fetch.error = Some(CrawlError::FileNotFound(fetch.path.clone()).code());
                return Ok(Some(AnalyzedResult { fetch, urls: Vec::new() }));
            }
            Err(e) => return Err(e.into()),
        };
        let base = url::split(&fetch.record.url);

        let mut urls = Vec::new();
        for candidate in extract_urls(&body) {
            if let Some((resolved, domain)) = resolve(&base, &candidate, self.drop_fragments, self.drop_query) {
                urls.push(UrlRecord::new(resolved, domain));
            }
        }

        Ok(Some(AnalyzedResult { fetch, urls }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(url: &str) -> Parts {
        url::split(url)
    }

    #[test]
    fn missing_input_file_is_reported_as_file_not_found_not_a_worker_fault() {
        let mut stage = AnalyzerStage { drop_fragments: false, drop_query: false };
        let fetch = FetchResult {
            record: UrlRecord::new("http://example.test/a", "example.test"),
            path: "/nonexistent/path/does-not-exist".to_string(),
            success: true,
            http_code: Some(200),
            md5: Some("deadbeef".to_string()),
            error: None,
        };
        let result = stage.on_message(fetch).unwrap().unwrap();
        assert!(!result.fetch.success);
        assert_eq!(result.fetch.error, Some(CrawlError::FileNotFound(String::new()).code()));
        assert!(result.urls.is_empty());
    }

    #[test]
    fn resolves_root_relative_reference() {
        let (resolved, domain) =
            resolve(&base("http://example.test/a/b"), "/about", false, false).unwrap();
        assert_eq!(resolved, "http://example.test/about");
        assert_eq!(domain, "example.test");
    }

    #[test]
    fn resolves_relative_reference_against_directory() {
        let (resolved, _) = resolve(&base("http://example.test/a/b/"), "c.html", false, false).unwrap();
        assert_eq!(resolved, "http://example.test/a/b/c.html");
    }

    #[test]
    fn absolute_reference_overrides_base_authority() {
        let (resolved, domain) =
            resolve(&base("http://example.test/a"), "http://other.test/x", false, false).unwrap();
        assert_eq!(resolved, "http://other.test/x");
        assert_eq!(domain, "other.test");
    }

    #[test]
    fn drops_fragment_when_configured() {
        let (resolved, _) = resolve(&base("http://example.test/a"), "/b#section", true, false).unwrap();
        assert!(!resolved.contains('#'));
    }

    #[test]
    fn drops_query_when_configured() {
        let (resolved, _) = resolve(&base("http://example.test/a"), "/b?x=1", false, true).unwrap();
        assert!(!resolved.contains('?'));
    }

    #[test]
    fn empty_reference_resolves_to_base_path_with_its_own_empty_query() {
        let (resolved, _) = resolve(&base("http://example.test/a?x=1"), "", false, false).unwrap();
        assert_eq!(resolved, "http://example.test/a");
    }

    #[test]
    fn colon_in_authority_less_path_is_treated_as_a_host_port() {
        // No `//`, no recognisable scheme (leading digit) — `192.0.2.1:8080/x`
        // is re-split as if it were `//192.0.2.1:8080/x` (`spec.md` §4.4 step 2).
        let (resolved, domain) = resolve(&base("http://example.test/a"), "192.0.2.1:8080/x", false, false).unwrap();
        assert_eq!(resolved, "http://192.0.2.1:8080/x");
        assert_eq!(domain, "192.0.2.1:8080");
    }

    #[test]
    fn bare_host_looking_path_gets_an_http_scheme_prepended() {
        let (resolved, domain) = resolve(&base("http://example.test/a"), "mirror.test/download.zip", false, false).unwrap();
        assert_eq!(resolved, "http://mirror.test/download.zip");
        assert_eq!(domain, "mirror.test");
    }
}

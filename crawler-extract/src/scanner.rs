//! The byte-stream scanner itself.
//!
//! Ported from `illume/parse/link_fsm.py`'s `FSM`/`LinkReaderFsm`/
//! `TagReaderFsm`/`DocumentReaderFsm`. The original models each reader as a
//! state machine with a `matches` accumulator shared by reference and an
//! `exit()` method that aborts the current reader by raising an exception the
//! driving loop catches; Rust has no equivalent control-transfer exception; a
//! reader function here just returns early, which is exactly the same
//! control flow without needing a signal type.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// A cursor over a document body with the handful of read primitives every
/// reader below is built out of. All reads rewind to the start position on a
/// failed match, so a reader can always try an alternative interpretation of
/// the same bytes.
struct ByteScanner<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteScanner<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    fn position(&mut self) -> u64 {
        self.cursor.stream_position().unwrap_or(0)
    }

    fn seek(&mut self, pos: u64) {
        let _ = self.cursor.seek(SeekFrom::Start(pos));
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.cursor.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    /// Read until `pattern` is matched in full. Returns `false` (and rewinds)
    /// if a byte in `term_chars` or end-of-stream is hit first.
    fn read_until_match(&mut self, pattern: &[u8], term_chars: &[u8]) -> bool {
        let start = self.position();
        let mut index = 0;
        loop {
            match self.read_byte() {
                Some(b) if b == pattern[index] => {
                    index += 1;
                    if index == pattern.len() {
                        return true;
                    }
                }
                Some(b) if term_chars.contains(&b) => {
                    self.seek(start);
                    return false;
                }
                None => {
                    self.seek(start);
                    return false;
                }
                Some(_) => {
                    // The source doesn't restart the match on a mismatch; it
                    // keeps comparing subsequent bytes against the same
                    // `pattern[index]` until it hits, a term char fires, or
                    // the stream ends. Preserved as-is rather than upgraded
                    // to a real substring search.
                }
            }
        }
    }

    /// Read until a byte in `chars` or `term_chars` is found. Returns the
    /// matched `chars` byte, or `None` on a `term_chars` match or EOF
    /// (rewinding in both cases).
    fn read_until_match_chars(&mut self, chars: &[u8], term_chars: &[u8]) -> Option<u8> {
        let start = self.position();
        loop {
            match self.read_byte() {
                None => {
                    self.seek(start);
                    return None;
                }
                Some(b) if chars.contains(&b) => return Some(b),
                Some(b) if term_chars.contains(&b) => {
                    self.seek(start);
                    return None;
                }
                Some(_) => {}
            }
        }
    }

    /// Assert the next byte is one of `chars`, consuming it on a match and
    /// rewinding otherwise.
    fn match_next_or(&mut self, chars: &[u8]) -> Option<u8> {
        let start = self.position();
        match self.read_byte() {
            Some(b) if chars.contains(&b) => Some(b),
            _ => {
                self.seek(start);
                None
            }
        }
    }

    /// Assert the next bytes match `pattern` exactly, rewinding on any
    /// mismatch (including a short read at EOF).
    fn match_next(&mut self, pattern: &[u8]) -> bool {
        let start = self.position();
        for &expected in pattern {
            if self.read_byte() != Some(expected) {
                self.seek(start);
                return false;
            }
        }
        true
    }

    /// Consume and return every byte up to (not including) the next byte in
    /// `term_chars`, or end of stream.
    fn get_until(&mut self, term_chars: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match self.read_byte() {
                None => return out,
                Some(b) if term_chars.contains(&b) => return out,
                Some(b) => out.push(b),
            }
        }
    }

    /// Consume and return every byte up to (not including) the first byte
    /// *not* in `legal_chars`, or end of stream. The mismatching byte itself
    /// is consumed, not rewound — matching the source, which never restores
    /// it to the stream either.
    fn get_until_mismatch(&mut self, legal_chars: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match self.read_byte() {
                None => return out,
                Some(b) if !legal_chars.contains(&b) => return out,
                Some(b) => out.push(b),
            }
        }
    }
}

const LEGAL_URL_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~:/?#[]@!$%&'()*+,;=";

/// Matches a bare `http://` or `https://` prefix (not inside a tag) and
/// everything that follows it made of RFC 3986 url characters.
fn scan_link(scanner: &mut ByteScanner, matches: &mut HashSet<String>) {
    if !scanner.match_next(b"ttp") {
        return;
    }

    let Some(first) = scanner.match_next_or(b"s:") else {
        return;
    };

    let mut data = Vec::from(&b"http"[..]);
    if first == b's' {
        data.push(b's');
        if !scanner.match_next(b":") {
            return;
        }
    }
    data.push(b':');

    if !scanner.match_next(b"//") {
        return;
    }
    data.extend_from_slice(b"//");

    let url = scanner.get_until_mismatch(LEGAL_URL_CHARS);
    if url.is_empty() {
        return;
    }
    data.extend_from_slice(&url);

    if let Ok(url) = String::from_utf8(data) {
        matches.insert(url);
    }
}

/// Matches `<a ... href="URL" ...>`, tolerating either quote style and
/// whatever attributes appear between the tag name and `href=`.
fn scan_tag(scanner: &mut ByteScanner, matches: &mut HashSet<String>) {
    if !scanner.match_next(b"a") {
        return;
    }
    if !scanner.read_until_match(b"href=", b">") {
        return;
    }
    if scanner.match_next_or(b"'\"").is_none() {
        return;
    }
    let url = scanner.get_until(b">\"'");
    if url.is_empty() {
        return;
    }
    if let Ok(url) = String::from_utf8(url) {
        matches.insert(url);
    }
}

/// Scan a full document body, collecting every link `scan_link` or
/// `scan_tag` can find. Order of discovery is not preserved; callers that
/// care about priority resolve it downstream against the frontier filter.
pub fn extract_urls(body: &[u8]) -> HashSet<String> {
    let mut scanner = ByteScanner::new(body);
    let mut matches = HashSet::new();

    loop {
        match scanner.read_until_match_chars(b"h<", b"") {
            None => break,
            Some(b'<') => scan_tag(&mut scanner, &mut matches),
            Some(b'h') => scan_link(&mut scanner, &mut matches),
            Some(_) => unreachable!("read_until_match_chars only returns bytes from its chars set"),
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bare_http_link_in_plain_text() {
        let body = b"see http://example.test/a/b for details";
        let found = extract_urls(body);
        assert!(found.contains("http://example.test/a/b"));
    }

    #[test]
    fn finds_bare_https_link() {
        let body = b"https://example.test/secure?q=1";
        let found = extract_urls(body);
        assert!(found.contains("https://example.test/secure?q=1"));
    }

    #[test]
    fn finds_anchor_href_single_and_double_quoted() {
        let body = b"<p><a href=\"/one\">one</a> <a href='/two'>two</a></p>";
        let found = extract_urls(body);
        assert!(found.contains("/one"));
        assert!(found.contains("/two"));
    }

    #[test]
    fn ignores_tags_that_are_not_anchors() {
        let body = b"<div class=\"href=fake\">no link here</div>";
        let found = extract_urls(body);
        assert!(found.is_empty());
    }

    #[test]
    fn a_tag_without_href_is_skipped() {
        let body = b"<a name=\"top\">jump</a> then <a href=\"/real\">real</a>";
        let found = extract_urls(body);
        assert_eq!(found.len(), 1);
        assert!(found.contains("/real"));
    }

    #[test]
    fn collects_both_kinds_from_one_document() {
        let body = b"visit http://bare.test/x or <a href=\"/relative\">here</a>.";
        let found = extract_urls(body);
        assert_eq!(found.len(), 2);
        assert!(found.contains("http://bare.test/x"));
        assert!(found.contains("/relative"));
    }

    #[test]
    fn truncated_prefix_at_end_of_stream_matches_nothing() {
        let body = b"go to htt";
        assert!(extract_urls(body).is_empty());
    }

    #[test]
    fn tag_opener_immediately_after_a_bare_link_is_swallowed_by_the_match() {
        // `get_until_mismatch` consumes its terminating byte rather than
        // rewinding it, so the `<` here is eaten while abandoning the bare
        // link's character class and the outer scan never sees it as a tag
        // start.
        let body = b"http://x.test/a<a href=\"/y\">";
        let found = extract_urls(body);
        assert!(found.contains("http://x.test/a"));
        assert!(!found.contains("/y"));
    }
}

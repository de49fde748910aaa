//! Extracts candidate links from a fetched document body.
//!
//! The scanner is a byte-stream state machine rather than an HTML parser: it
//! looks for two independent signals anywhere in the body — a bare `http(s)://`
//! prefix, or an `<a href="...">` tag — and collects whatever comes after. It
//! intentionally does not validate that the surrounding markup is well-formed;
//! pages routinely aren't, and recall matters more than precision here.

mod scanner;

pub use scanner::extract_urls;

//! Seeding: inject a list of starting urls into a running shard.
//!
//! Reads one url per line from a file and pushes each as a `ROUTE` admin
//! message to the filter stage's socket, marking every record
//! `user_inputted` so the frontier filter's priority table can still apply
//! (`spec.md` §4.5 doesn't special-case seeds; they're just urls nobody has
//! discovered yet, which is exactly what gives them priority 2).

use std::fs;
use std::path::Path;

use crawler::error::{CrawlError, Result};
use crawler::record::UrlRecord;
use crawler::url;

use crate::ipc::IpcClient;
use crate::pool::AdminMessage;

/// Parse a seed file's lines into `UrlRecord`s, skipping blanks and `#`
/// comments. Malformed lines (no host) are logged and dropped rather than
/// aborting the whole seed run.
pub fn read_seed_file(path: impl AsRef<Path>) -> Result<Vec<UrlRecord>> {
    let contents = fs::read_to_string(path.as_ref())?;
    let mut records = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match url::parse_absolute(line) {
            Ok((resolved, domain)) => {
                let mut record = UrlRecord::new(resolved, domain);
                record.user_inputted = true;
                records.push(record);
            }
            Err(e) => {
                log::warn!(target: "seed", "skipping seed file line {}: {e}", line_no + 1);
            }
        }
    }

    Ok(records)
}

/// Push every record in `records` to the filter stage listening at
/// `socket_path`, one `ROUTE` message per url.
pub fn seed(socket_path: impl AsRef<Path>, records: &[UrlRecord]) -> Result<()> {
    let mut client = IpcClient::connect(socket_path)?;
    for record in records {
        let value = serde_json::to_value(record).map_err(|e| CrawlError::QueueError(e.to_string()))?;
        client.put(&AdminMessage::route(value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_plain_lines_and_skips_comments_and_blanks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "http://a.test/\n\n# a comment\nhttp://b.test/x\n").unwrap();

        let records = read_seed_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.user_inputted));
        assert_eq!(records[0].domain, "a.test");
        assert_eq!(records[1].url, "http://b.test/x");
    }

    #[test]
    fn drops_lines_with_no_host() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "not a url\nhttp://ok.test/\n").unwrap();

        let records = read_seed_file(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].domain, "ok.test");
    }
}

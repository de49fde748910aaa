//! The frontier's admission filter: whitelist, dedup and priority assignment
//! in one place (`spec.md` §4.5), ported from `illume/frontier/filter.py`.
//!
//! Two bloom filters (one over domains, one over urls) sit in front of the
//! persistent exact-match store. A bloom miss is authoritative ("definitely
//! new"); a bloom hit is confirmed against the persistent store before being
//! trusted, since the bloom filters only ever produce false positives.

use std::collections::HashSet;
use std::path::Path;

use log::warn;

use crate::config::Config;
use crate::error::Result;
use crate::filter::bloom::BloomFilter;
use crate::filter::persistent::{hash_key, PersistentKeyFilter};
use crate::record::{PrioritizedUrl, UrlRecord};

pub struct CompositeFilter {
    persistent: PersistentKeyFilter,
    domain_bloom: BloomFilter,
    url_bloom: BloomFilter,
    whitelist: HashSet<String>,
    key_size: usize,
}

impl CompositeFilter {
    /// Open (or create) the persistent store at `config.frontier_key_filter_db_path`
    /// and rebuild both bloom filters by scanning it, since the blooms are
    /// process-local and do not survive a restart (`spec.md` §3).
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(config, &config.frontier_key_filter_db_path)
    }

    /// As `open`, but with the persistent store path overridden — used by
    /// tests that want an isolated database per case.
    pub fn open_at(config: &Config, db_path: impl AsRef<Path>) -> Result<Self> {
        let persistent = PersistentKeyFilter::open(db_path, config.filter_hasher_key_size)?;
        let mut domain_bloom = BloomFilter::new(config.frontier_domain_bloom_max_n, config.frontier_domain_bloom_p)?;
        let mut url_bloom = BloomFilter::new(config.frontier_url_bloom_max_n, config.frontier_url_bloom_p)?;

        persistent.scan(|domain_key, url_key| {
            if let Err(e) = domain_bloom.add(domain_key) {
                warn!(target: "filter", "dropped a domain key while rebuilding the bloom filter: {e}");
            }
            if let Err(e) = url_bloom.add(url_key) {
                warn!(target: "filter", "dropped a url key while rebuilding the bloom filter: {e}");
            }
        })?;

        Ok(Self {
            persistent,
            domain_bloom,
            url_bloom,
            whitelist: config.frontier_domain_whitelist.clone(),
            key_size: config.filter_hasher_key_size,
        })
    }

    /// Admit or drop a candidate `UrlRecord`, per the priority table:
    /// override → 1, unknown domain → 2, known domain / unknown url → 3,
    /// recrawl → 4, otherwise → 5. Returns `Ok(None)` when the url is
    /// rejected outright (its domain is on the suppression list, or it's
    /// already seen and not marked for recrawl/override).
    pub fn process(&mut self, record: &UrlRecord) -> Result<Option<PrioritizedUrl>> {
        if self.whitelist.contains(&record.domain) {
            return Ok(None);
        }

        let domain_known = self.domain_known(&record.domain)?;
        let url_known = domain_known && self.url_known(&record.domain, &record.url)?;

        if url_known && !record.recrawl && !record.r#override {
            return Ok(None);
        }

        let fetch_priority = if record.r#override {
            1
        } else if !domain_known {
            2
        } else if !url_known {
            3
        } else if record.recrawl {
            4
        } else {
            5
        };

        if !url_known {
            self.persistent.add(&record.domain, &record.url)?;
            self.url_bloom.add(&hash_key(&record.url, self.key_size))?;
            if !domain_known {
                self.domain_bloom.add(&hash_key(&record.domain, self.key_size))?;
            }
        }

        Ok(Some(PrioritizedUrl {
            record: record.clone(),
            fetch_priority,
        }))
    }

    fn domain_known(&self, domain: &str) -> Result<bool> {
        let key = hash_key(domain, self.key_size);
        if !self.domain_bloom.contains(&key) {
            return Ok(false);
        }
        self.persistent.exists_domain(domain)
    }

    fn url_known(&self, domain: &str, url: &str) -> Result<bool> {
        let key = hash_key(url, self.key_size);
        if !self.url_bloom.contains(&key) {
            return Ok(false);
        }
        self.persistent.exists_url(domain, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(whitelist: &[&str]) -> Config {
        let mut cfg = Config::from_env();
        cfg.frontier_domain_whitelist = whitelist.iter().map(|s| s.to_string()).collect();
        cfg.frontier_url_bloom_max_n = 1000;
        cfg.frontier_domain_bloom_max_n = 1000;
        cfg
    }

    #[test]
    fn first_sighting_of_a_new_domain_gets_priority_two() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        let record = UrlRecord::new("http://example.test/", "example.test");
        let prioritized = filter.process(&record).unwrap().unwrap();
        assert_eq!(prioritized.fetch_priority, 2);
    }

    #[test]
    fn second_url_on_known_domain_gets_priority_three() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        filter.process(&UrlRecord::new("http://example.test/a", "example.test")).unwrap();
        let second = filter
            .process(&UrlRecord::new("http://example.test/b", "example.test"))
            .unwrap()
            .unwrap();
        assert_eq!(second.fetch_priority, 3);
    }

    #[test]
    fn repeat_url_is_dropped_unless_recrawl() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        let record = UrlRecord::new("http://example.test/a", "example.test");
        filter.process(&record).unwrap();
        assert!(filter.process(&record).unwrap().is_none());

        let mut recrawl = record.clone();
        recrawl.recrawl = true;
        let reprocessed = filter.process(&recrawl).unwrap().unwrap();
        assert_eq!(reprocessed.fetch_priority, 4);
    }

    #[test]
    fn override_always_wins_priority_one() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        let record = UrlRecord::new("http://example.test/a", "example.test");
        filter.process(&record).unwrap();

        let mut overridden = record.clone();
        overridden.r#override = true;
        let prioritized = filter.process(&overridden).unwrap().unwrap();
        assert_eq!(prioritized.fetch_priority, 1);
    }

    #[test]
    fn whitelisted_domain_is_suppressed() {
        let dir = tempdir().unwrap();
        let cfg = config(&["blocked.test"]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        let blocked = UrlRecord::new("http://blocked.test/", "blocked.test");
        assert!(filter.process(&blocked).unwrap().is_none());

        let other = UrlRecord::new("http://other.test/", "other.test");
        assert!(filter.process(&other).unwrap().is_some());
    }

    #[test]
    fn url_known_requires_domain_known_first() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let mut filter = CompositeFilter::open_at(&cfg, dir.path().join("f.db")).unwrap();

        // Insert the url/domain pair directly into the persistent store without
        // ever going through `process`, so the url bloom+store would answer
        // "known" on their own even though the domain bloom never saw it.
        filter.persistent.add("example.test", "http://example.test/a").unwrap();
        filter
            .url_bloom
            .add(&hash_key("http://example.test/a", filter.key_size))
            .unwrap();

        // domain_known is still false (domain bloom never populated), so
        // url_known must be false too — `domain_known ∧ url_known`, not
        // `url_known` alone — and the record gets priority 2, not dropped.
        let record = UrlRecord::new("http://example.test/a", "example.test");
        let prioritized = filter.process(&record).unwrap().unwrap();
        assert_eq!(prioritized.fetch_priority, 2);
    }

    #[test]
    fn rebuild_from_persistent_store_preserves_known_state() {
        let dir = tempdir().unwrap();
        let cfg = config(&[]);
        let db_path = dir.path().join("f.db");
        {
            let mut filter = CompositeFilter::open_at(&cfg, &db_path).unwrap();
            filter
                .process(&UrlRecord::new("http://example.test/a", "example.test"))
                .unwrap();
        }
        let mut reopened = CompositeFilter::open_at(&cfg, &db_path).unwrap();
        let second = reopened
            .process(&UrlRecord::new("http://example.test/b", "example.test"))
            .unwrap()
            .unwrap();
        assert_eq!(second.fetch_priority, 3); // domain already known across restarts
    }
}

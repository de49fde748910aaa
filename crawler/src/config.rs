//! Read-only configuration view injected into every worker at construction.
//!
//! Replaces the source's process-wide configuration singleton
//! (`illume/config/__init__.py`) per the REDESIGN note in `spec.md` §9: there
//! is no global to reach for, callers build a `Config` once and clone it into
//! each worker.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// All recognised configuration keys and their effects, per `spec.md` §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub shard_id: String,
    pub data_dir: PathBuf,

    pub fetcher_user_agent: String,
    pub fetcher_timeout: Duration,
    pub fetcher_max_response_size: u64,
    pub fetcher_header_max_size: u64,
    pub fetcher_output_directory: PathBuf,
    pub fetcher_progress_dir: PathBuf,

    pub parser_drop_fragments: bool,
    pub parser_drop_query: bool,

    pub frontier_key_filter_db_path: PathBuf,
    pub frontier_url_bloom_max_n: usize,
    pub frontier_url_bloom_p: f64,
    pub frontier_domain_bloom_max_n: usize,
    pub frontier_domain_bloom_p: f64,
    pub frontier_domain_whitelist: HashSet<String>,

    pub filter_hasher_key_size: usize,
    pub graph_logger_path: PathBuf,
    pub temp_prefix: String,
}

impl Config {
    /// Build a configuration view from the process environment, applying
    /// the same defaults the reference design used (`spec.md` §6 lists the
    /// keys; defaults below mirror `illume.clients.http.HTTPRequest`'s
    /// constructor defaults and `illume.filter.keyfilter.KeyFilter`'s).
    pub fn from_env() -> Self {
        let data_dir = env_path("DATA_DIR", "./data");

        Self {
            shard_id: env_string("SHARD_ID", "shard-0"),
            fetcher_user_agent: env_string("FETCHER_USER_AGENT", "illume-crawler/0.1"),
            fetcher_timeout: Duration::from_secs(env_u64("FETCHER_TIMEOUT_SECONDS", 10)),
            fetcher_max_response_size: env_u64("FETCHER_MAX_RESPONSE_SIZE", 1 << 20),
            fetcher_header_max_size: env_u64("FETCHER_HEADER_MAX_SIZE", 8 << 10),
            fetcher_output_directory: env_path(
                "FETCHER_OUTPUT_DIRECTORY",
                data_dir.join("fetched").to_str().unwrap_or("./data/fetched"),
            ),
            fetcher_progress_dir: env_path(
                "FETCHER_PROGRESS_DIR",
                data_dir.join("staging").to_str().unwrap_or("./data/staging"),
            ),
            parser_drop_fragments: env_bool("PARSER_DROP_FRAGMENTS", false),
            parser_drop_query: env_bool("PARSER_DROP_QUERY", false),
            frontier_key_filter_db_path: env_path(
                "FRONTIER_KEY_FILTER_DB_PATH",
                data_dir.join("filter.db").to_str().unwrap_or("./data/filter.db"),
            ),
            frontier_url_bloom_max_n: env_usize("FRONTIER_URL_BLOOM_MAX_N", 10_000_000),
            frontier_url_bloom_p: env_f64("FRONTIER_URL_BLOOM_P", 0.01),
            frontier_domain_bloom_max_n: env_usize("FRONTIER_DOMAIN_BLOOM_MAX_N", 1_000_000),
            frontier_domain_bloom_p: env_f64("FRONTIER_DOMAIN_BLOOM_P", 0.01),
            frontier_domain_whitelist: env_set("FRONTIER_DOMAIN_WHITELIST"),
            filter_hasher_key_size: env_usize("FILTER_HASHER_KEY_SIZE", 8),
            graph_logger_path: env_path(
                "GRAPH_LOGGER_PATH",
                data_dir.join("graph.db").to_str().unwrap_or("./data/graph.db"),
            ),
            temp_prefix: env_string("TEMP_PREFIX", "illume-"),
            data_dir,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_set(key: &str) -> HashSet<String> {
    env::var(key)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // Clear any leaked vars from other tests running in-process.
        for key in [
            "FETCHER_TIMEOUT_SECONDS",
            "FRONTIER_URL_BLOOM_P",
            "PARSER_DROP_QUERY",
        ] {
            env::remove_var(key);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.fetcher_timeout, Duration::from_secs(10));
        assert!((cfg.frontier_url_bloom_p - 0.01).abs() < f64::EPSILON);
        assert!(!cfg.parser_drop_query);
    }

    #[test]
    fn whitelist_parses_comma_separated_list() {
        env::set_var("FRONTIER_DOMAIN_WHITELIST", "a.test, b.test,c.test");
        let cfg = Config::from_env();
        assert!(cfg.frontier_domain_whitelist.contains("a.test"));
        assert!(cfg.frontier_domain_whitelist.contains("b.test"));
        assert!(cfg.frontier_domain_whitelist.contains("c.test"));
        env::remove_var("FRONTIER_DOMAIN_WHITELIST");
    }
}

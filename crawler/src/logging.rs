//! Structured logging setup, installed once per process.
//!
//! Every stage logs through the `log` crate's macros with a `target` equal
//! to the stage or component name (`fetcher`, `analyzer`, `filter`,
//! `logger`, `pool`, `worker`), following `radicle-node`'s convention of
//! `log::debug!(target: "worker", ...)`.

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Install the process-wide logger, honoring `RUST_LOG`. Idempotent: safe to
/// call from every stage's `main` without double-initializing.
pub fn init() {
    INIT.get_or_init(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .init();
    });
}

//! Wires one stage's worker pool to its neighbors over IPC and runs it
//! until its inbound socket is closed.
//!
//! `spec.md` §3's pipeline is a cycle: Fetcher → Analyzer → Filter →
//! Fetcher, with Analyzer additionally handing every `AnalyzedResult` to
//! Logger as a side channel. Each stage is a separate OS process (`--stage
//! <name>`); this module is what `main.rs` calls into once it knows which
//! one it is.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel as chan;

use crawler::config::Config;
use crawler::error::{CrawlError, Result};
use crawler::record::{AnalyzedResult, FetchResult, PrioritizedUrl};

use crate::analyzer::AnalyzerStage;
use crate::fetcher::FetcherStage;
use crate::filter_stage::FilterStage;
use crate::ipc::{IpcClient, IpcServer};
use crate::logger_stage::LoggerStage;
use crate::pool::{AdminMessage, Pool};
use crate::stage::Stage;

/// Which pipeline stage this process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Fetcher,
    Analyzer,
    Filter,
    Logger,
}

impl StageKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fetcher" => Some(Self::Fetcher),
            "analyzer" => Some(Self::Analyzer),
            "filter" => Some(Self::Filter),
            "logger" => Some(Self::Logger),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Fetcher => "fetcher",
            Self::Analyzer => "analyzer",
            Self::Filter => "filter",
            Self::Logger => "logger",
        }
    }
}

/// The path a given shard's stage listens on, by convention rather than
/// explicit per-stage config — every stage in a shard agrees on where its
/// neighbors live just from `shard_id` and its own name.
pub fn socket_path(config: &Config, stage: StageKind) -> PathBuf {
    config
        .data_dir
        .join("ipc")
        .join(format!("{}-{}.sock", config.shard_id, stage.name()))
}

fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run `stage` in this process, blocking until its inbound socket closes.
pub fn run(stage: StageKind, config: &Config, capacity: usize) -> Result<()> {
    match stage {
        StageKind::Fetcher => run_fetcher(config, capacity),
        StageKind::Analyzer => run_analyzer(config, capacity),
        StageKind::Filter => run_filter(config, capacity),
        StageKind::Logger => run_logger(config, capacity),
    }
}

/// Drain `server`'s inbound lines into `pool`. A line carrying an `op_code`
/// (`spec.md` §6) is an administrative message — dispatched against the
/// pool's control plane (pause/resize/kill/die) under its lock; any other
/// line is a plain data record, which is `op_code`'s documented default
/// (`ROUTE`, `spec.md` §6: "absence of `op_code` means the message is a data
/// record") and goes straight to a worker over `tasks` without taking the
/// lock.
fn feed<S>(mut server: IpcServer, pool: Arc<Mutex<Pool<S>>>, tasks: chan::Sender<S::Input>) -> Result<()>
where
    S: Stage + 'static,
    S::Input: serde::de::DeserializeOwned + 'static,
    S::Output: 'static,
{
    while let Some(value) = server.get_value()? {
        if value.get("op_code").is_some() {
            let message: AdminMessage =
                serde_json::from_value(value).map_err(|e| CrawlError::QueueError(e.to_string()))?;
            if let Err(e) = pool.lock().expect("pool mutex poisoned").dispatch(message) {
                log::warn!(target: "runtime", "admin dispatch failed: {e}");
            }
            continue;
        }
        let input: S::Input =
            serde_json::from_value(value).map_err(|e| CrawlError::QueueError(e.to_string()))?;
        if tasks.send(input).is_err() {
            break;
        }
    }
    Ok(())
}

fn run_fetcher(config: &Config, capacity: usize) -> Result<()> {
    let inbound = socket_path(config, StageKind::Fetcher);
    prepare_socket_path(&inbound)?;
    let downstream = socket_path(config, StageKind::Analyzer);

    let (results_tx, results_rx) = chan::unbounded::<FetchResult>();
    let cfg = config.clone();
    let pool: Pool<FetcherStage> = Pool::new(
        "fetcher",
        capacity,
        move || FetcherStage::new(&cfg).expect("failed to initialize fetcher stage"),
        results_tx,
    );
    let pool = Arc::new(Mutex::new(pool));
    let tasks = pool.lock().expect("pool mutex poisoned").tasks();

    let reader = {
        let pool = pool.clone();
        thread::spawn(move || -> Result<()> {
            let server = IpcServer::bind(&inbound, 1)?;
            feed::<FetcherStage>(server, pool, tasks)
        })
    };

    let writer = thread::spawn(move || -> Result<()> {
        let mut client = IpcClient::connect(&downstream)?;
        for result in results_rx {
            client.put(&result)?;
        }
        Ok(())
    });

    reader.join().expect("fetcher reader thread panicked")?;
    writer.join().expect("fetcher writer thread panicked")?;
    Ok(())
}

fn run_analyzer(config: &Config, capacity: usize) -> Result<()> {
    let inbound = socket_path(config, StageKind::Analyzer);
    prepare_socket_path(&inbound)?;
    let filter_socket = socket_path(config, StageKind::Filter);
    let logger_socket = socket_path(config, StageKind::Logger);

    let (results_tx, results_rx) = chan::unbounded::<AnalyzedResult>();
    let cfg = config.clone();
    let pool: Pool<AnalyzerStage> = Pool::new(
        "analyzer",
        capacity,
        move || AnalyzerStage::new(&cfg),
        results_tx,
    );
    let pool = Arc::new(Mutex::new(pool));
    let tasks = pool.lock().expect("pool mutex poisoned").tasks();

    let reader = {
        let pool = pool.clone();
        thread::spawn(move || -> Result<()> {
            let server = IpcServer::bind(&inbound, 1)?;
            feed::<AnalyzerStage>(server, pool, tasks)
        })
    };

    let writer = thread::spawn(move || -> Result<()> {
        let mut to_filter = IpcClient::connect(&filter_socket)?;
        let mut to_logger = IpcClient::connect(&logger_socket)?;
        for analyzed in results_rx {
            for url in &analyzed.urls {
                to_filter.put(url)?;
            }
            to_logger.put(&analyzed)?;
        }
        Ok(())
    });

    reader.join().expect("analyzer reader thread panicked")?;
    writer.join().expect("analyzer writer thread panicked")?;
    Ok(())
}

fn run_filter(config: &Config, capacity: usize) -> Result<()> {
    let inbound = socket_path(config, StageKind::Filter);
    prepare_socket_path(&inbound)?;
    let downstream = socket_path(config, StageKind::Fetcher);

    let (results_tx, results_rx) = chan::unbounded::<PrioritizedUrl>();
    let cfg = config.clone();
    let pool: Pool<FilterStage> = Pool::new(
        "filter",
        capacity,
        move || FilterStage::new(&cfg).expect("failed to initialize filter stage"),
        results_tx,
    );
    let pool = Arc::new(Mutex::new(pool));
    let tasks = pool.lock().expect("pool mutex poisoned").tasks();

    let reader = {
        let pool = pool.clone();
        thread::spawn(move || -> Result<()> {
            // Two simultaneous producers feed the filter's inbound socket:
            // the seeder's one-shot connection and the analyzer's long-lived
            // fan-out (`spec.md` §4.1: "the pool supervisor is expected to
            // accept-and-dispatch when fan-in > 1").
            let server = IpcServer::bind(&inbound, 2)?;
            feed::<FilterStage>(server, pool, tasks)
        })
    };

    let writer = thread::spawn(move || -> Result<()> {
        let mut client = IpcClient::connect(&downstream)?;
        for prioritized in results_rx {
            client.put(&prioritized)?;
        }
        Ok(())
    });

    reader.join().expect("filter reader thread panicked")?;
    writer.join().expect("filter writer thread panicked")?;
    Ok(())
}

fn run_logger(config: &Config, capacity: usize) -> Result<()> {
    let inbound = socket_path(config, StageKind::Logger);
    prepare_socket_path(&inbound)?;

    let (results_tx, _results_rx) = chan::unbounded::<()>();
    let cfg = config.clone();
    let pool: Pool<LoggerStage> = Pool::new(
        "logger",
        capacity,
        move || LoggerStage::new(&cfg).expect("failed to initialize logger stage"),
        results_tx,
    );
    let pool = Arc::new(Mutex::new(pool));
    let tasks = pool.lock().expect("pool mutex poisoned").tasks();

    let server = IpcServer::bind(&inbound, 1)?;
    feed::<LoggerStage>(server, pool, tasks)
}

//! `crawler-node` CLI entrypoint.
//!
//! Each invocation runs a single pipeline stage in this process
//! (`--stage <fetcher|analyzer|filter|logger>`), or injects seed urls into a
//! running shard (`seed --file <path>`). One process per stage per shard is
//! the deployment unit; a shard is four of these plus whatever orchestrates
//! restarting them.

use std::env;
use std::fs;
use std::path::PathBuf;

use lexopt::prelude::*;

use crawler::config::Config;
use crawler::logging;
use crawler_node::runtime::{self, StageKind};
use crawler_node::seed;

const DEFAULT_WORKERS: usize = 4;

enum Command {
    Stage { stage: StageKind, workers: usize },
    Seed { file: PathBuf, target: Option<PathBuf> },
}

fn parse_args() -> anyhow::Result<Command> {
    let mut parser = lexopt::Parser::from_env();
    let mut stage: Option<String> = None;
    let mut workers = DEFAULT_WORKERS;
    let mut seed_mode = false;
    let mut file: Option<PathBuf> = None;
    let mut target: Option<PathBuf> = None;

    while let Some(arg) = parser.next()? {
        match arg {
            Value(v) if !seed_mode && stage.is_none() && v == "seed" => {
                seed_mode = true;
            }
            Long("stage") => stage = Some(parser.value()?.string()?),
            Long("workers") => workers = parser.value()?.parse()?,
            Long("file") => file = Some(parser.value()?.into()),
            Long("target") => target = Some(parser.value()?.into()),
            Long("shard-id") => env::set_var("SHARD_ID", parser.value()?.string()?),
            Long("config") => load_env_file(&PathBuf::from(parser.value()?))?,
            Long("help") => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    if seed_mode {
        let file = file.ok_or_else(|| anyhow::anyhow!("seed requires --file <path>"))?;
        return Ok(Command::Seed { file, target });
    }

    let stage = stage.ok_or_else(|| anyhow::anyhow!("--stage <fetcher|analyzer|filter|logger> is required"))?;
    let stage = StageKind::parse(&stage).ok_or_else(|| anyhow::anyhow!("unknown stage '{stage}'"))?;
    Ok(Command::Stage { stage, workers })
}

/// `--config FILE` applies `KEY=VALUE` lines to the process environment
/// before `Config::from_env` reads it, rather than introducing a second
/// configuration source; every key it can set is documented in `spec.md`
/// §6 and read by `Config::from_env`.
fn load_env_file(path: &PathBuf) -> anyhow::Result<()> {
    let contents = fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            env::set_var(key.trim(), value.trim());
        }
    }
    Ok(())
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  crawler-node --stage <fetcher|analyzer|filter|logger> [--workers N] [--shard-id ID] [--config FILE]");
    eprintln!("  crawler-node seed --file FILE [--target SOCKET] [--shard-id ID] [--config FILE]");
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let command = parse_args()?;
    let config = Config::from_env();

    match command {
        Command::Stage { stage, workers } => {
            log::info!(target: "main", "starting stage for shard '{}'", config.shard_id);
            runtime::run(stage, &config, workers)?;
        }
        Command::Seed { file, target } => {
            let records = seed::read_seed_file(&file)?;
            let socket = target.unwrap_or_else(|| runtime::socket_path(&config, StageKind::Filter));
            log::info!(
                target: "main",
                "seeding {} urls into '{}' via {}",
                records.len(),
                config.shard_id,
                socket.display()
            );
            seed::seed(&socket, &records)?;
        }
    }

    Ok(())
}

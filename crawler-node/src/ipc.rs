//! Framed JSON messaging over local Unix domain stream sockets.
//!
//! Ported from `illume/queues/ipc.py` (`UnixSocket`/`UnixSocketClient`/
//! `UnixSocketServer`/`UnixSocketPair`): one JSON object per line, UTF-8, no
//! length prefix. A client retries connecting with exponential backoff while
//! the server's socket file doesn't exist yet; a server accepts at most
//! `max_clients` connections and never calls `put` on its own reader half.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel as chan;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crawler::error::{CrawlError, Result};

/// A path for a Unix domain socket, derived from `config.temp_prefix`
/// exactly as `illume.queues.ipc.get_temp_file_name` derives one from
/// `TEMP_PREFIX` — a prefix plus a random suffix, to avoid collisions
/// between shards sharing a temp directory.
pub fn temp_socket_path(dir: &Path, prefix: &str) -> PathBuf {
    let suffix: u64 = fastrand::u64(..);
    dir.join(format!("{prefix}{suffix:016x}.sock"))
}

/// The client side of a channel: connects out to a server's socket file and
/// writes messages to it. Never reads — `get` on a client is a programmer
/// error in the source design and stays that way here.
pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    /// Connect to `path`, retrying with exponential backoff
    /// (`2^1, 2^2, 2^3` seconds) while the socket file doesn't exist yet,
    /// matching `UnixSocketClient.socket_exists`'s three-retry budget.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_retries(path, 3, Duration::from_secs(2))
    }

    pub fn connect_with_retries(path: impl AsRef<Path>, retries: u32, start_wait: Duration) -> Result<Self> {
        let path = path.as_ref();
        let mut wait = start_wait;
        for attempt in 1..=retries {
            if path.exists() {
                let stream = UnixStream::connect(path)?;
                return Ok(Self { stream });
            }
            if attempt < retries {
                thread::sleep(wait);
                wait *= 2;
            }
        }
        Err(CrawlError::FileNotFound(format!(
            "socket file '{}' doesn't exist",
            path.display()
        )))
    }

    /// Write one message, newline-terminated.
    pub fn put<T: Serialize>(&mut self, data: &T) -> Result<()> {
        let mut payload = serde_json::to_vec(data).map_err(|e| CrawlError::QueueError(e.to_string()))?;
        payload.push(b'\n');
        self.stream.write_all(&payload)?;
        Ok(())
    }
}

/// The server side of a channel: listens on `path` and merges lines from up
/// to `max_clients` *simultaneous* connections into one ordered-per-sender
/// stream (`spec.md` §4.1: "the pool supervisor is expected to
/// accept-and-dispatch when fan-in > 1" — the filter stage's inbound socket
/// has two live producers, the seeder and the analyzer's fan-out, so a
/// server that only ever reads its first connection would go silent the
/// moment that first client hangs up).
///
/// A background acceptor thread takes new connections as they arrive, each
/// spawning its own line-reading thread that feeds a shared channel; `get`
/// just drains that channel. Connections beyond `max_clients` are dropped
/// immediately, matching `UnixSocketServer.on_connect`'s guard; a
/// disconnecting client frees its slot for a future connection.
pub struct IpcServer {
    lines_rx: chan::Receiver<String>,
    _acceptor: thread::JoinHandle<()>,
}

impl IpcServer {
    /// Bind a new socket at `path`. The path must not already exist; callers
    /// that reuse a `temp_socket_path` across restarts are responsible for
    /// removing a stale file first.
    pub fn bind(path: impl AsRef<Path>, max_clients: usize) -> Result<Self> {
        let listener = UnixListener::bind(path)?;
        let (lines_tx, lines_rx) = chan::unbounded();
        let active = Arc::new(AtomicUsize::new(0));

        let acceptor = thread::spawn(move || {
            for incoming in listener.incoming() {
                let Ok(stream) = incoming else { break };
                if active.fetch_add(1, Ordering::SeqCst) >= max_clients {
                    active.fetch_sub(1, Ordering::SeqCst);
                    continue; // too many clients connected; drop this one
                }
                let lines_tx = lines_tx.clone();
                let active = active.clone();
                thread::spawn(move || {
                    let reader = BufReader::new(stream);
                    for line in reader.lines() {
                        match line {
                            Ok(line) if lines_tx.send(line).is_ok() => {}
                            _ => break,
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Ok(Self { lines_rx, _acceptor: acceptor })
    }

    /// Read one message from whichever connected client sent one next.
    /// Returns `Ok(None)` only once every client connection thread has
    /// exited and dropped its sender (the acceptor itself runs for the
    /// socket's whole lifetime, so in practice this means the socket file
    /// was removed out from under the listener).
    pub fn get<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.lines_rx.recv() {
            Ok(line) => {
                let data = serde_json::from_str(&line).map_err(|e| CrawlError::QueueError(e.to_string()))?;
                Ok(Some(data))
            }
            Err(chan::RecvError) => Ok(None),
        }
    }

    /// Read one message as a raw JSON value, deferring the choice between
    /// "this is a data record" and "this is an admin message" to the caller
    /// (`spec.md` §6: "absence of `op_code` means the message is a data
    /// record"). Callers that need to tell the two apart use this instead of
    /// `get`, which assumes every line deserializes straight into `T`.
    pub fn get_value(&mut self) -> Result<Option<serde_json::Value>> {
        match self.lines_rx.recv() {
            Ok(line) => {
                let value = serde_json::from_str(&line).map_err(|e| CrawlError::QueueError(e.to_string()))?;
                Ok(Some(value))
            }
            Err(chan::RecvError) => Ok(None),
        }
    }
}

/// Fans a single logical message out to every client channel it holds.
/// `get` is deliberately unimplemented: the source
/// (`illume/queues/compound.py`'s `CompoundQueue.get`) never defines a
/// meaningful multi-reader fan-in either, and `spec.md` §9 leaves the
/// semantics an open question rather than inventing one.
pub struct CompoundChannel {
    members: Vec<IpcClient>,
}

impl CompoundChannel {
    pub fn new(members: Vec<IpcClient>) -> Self {
        Self { members }
    }

    pub fn put<T: Serialize>(&mut self, data: &T) -> Result<()> {
        for member in &mut self.members {
            member.put(data)?;
        }
        Ok(())
    }
}

//! # Histwatch Tailer
//!
//! Follows a growing text file and delivers its lines, in file order, over a
//! channel.
//!
//! ```text
//! history file ──> change detection (notify or polling)
//!                      └─> incremental read from last offset
//!                             └─> complete lines over an mpsc channel
//! ```
//!
//! The stream is lazy, infinite while following, and non-restartable. It
//! terminates three ways: a terminal error on the channel, a clean end
//! (channel closes) when the source is exhausted or goes away, or the
//! receiver being dropped.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use notify::{
    Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, TailError>;

#[derive(Error, Debug)]
pub enum TailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct TailConfig {
    /// File to follow.
    pub path: PathBuf,
    /// Keep following after the existing content is exhausted. When false
    /// the stream ends cleanly at the current end of file.
    pub follow: bool,
    /// Pick the file back up after rotation, truncation, or recreation.
    /// When false any of those ends the stream cleanly.
    pub reopen: bool,
    /// Use filesystem polling instead of OS change notifications.
    pub poll: bool,
    /// Poll cadence; also the fallback size-check interval in notify mode.
    pub poll_interval: Duration,
}

impl TailConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            follow: true,
            reopen: true,
            poll: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Receiving side of a tail started with [`tail`].
///
/// `None` from [`Lines::next_line`] is the clean end-of-stream signal; an
/// `Err` item is terminal (nothing follows it).
pub struct Lines {
    rx: mpsc::Receiver<Result<String>>,
}

impl Lines {
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }
}

/// Start tailing `config.path`. Must be called within a tokio runtime.
///
/// Watcher setup errors surface here; everything after that arrives through
/// the returned [`Lines`].
pub fn tail(config: TailConfig) -> Result<Lines> {
    let (line_tx, line_rx) = mpsc::channel(256);

    let events = if config.follow {
        let (event_tx, event_rx) = mpsc::channel(16);
        let watcher = spawn_watcher(&config, event_tx)?;
        Some((watcher, event_rx))
    } else {
        None
    };

    tokio::spawn(run_tail(config, events, line_tx));
    Ok(Lines { rx: line_rx })
}

// Closed set of change-detection backends, chosen once from config.
enum ChangeWatcher {
    Notify(RecommendedWatcher),
    Poll(PollWatcher),
}

fn spawn_watcher(config: &TailConfig, tx: mpsc::Sender<()>) -> Result<ChangeWatcher> {
    let callback = move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = tx.try_send(());
            }
        }
    };

    // Watch the parent directory: the file itself may not exist yet, or may
    // be replaced under us during rotation.
    let target = watch_target(&config.path).to_path_buf();

    let mut watcher = if config.poll {
        ChangeWatcher::Poll(PollWatcher::new(
            callback,
            NotifyConfig::default().with_poll_interval(config.poll_interval),
        )?)
    } else {
        ChangeWatcher::Notify(RecommendedWatcher::new(callback, NotifyConfig::default())?)
    };

    match &mut watcher {
        ChangeWatcher::Notify(w) => w.watch(&target, RecursiveMode::NonRecursive)?,
        ChangeWatcher::Poll(w) => w.watch(&target, RecursiveMode::NonRecursive)?,
    }

    Ok(watcher)
}

fn watch_target(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

enum ReadOutcome {
    /// Complete lines read past the previous offset, plus the new offset.
    Lines(Vec<String>, u64),
    /// The file shrank below the known offset.
    Truncated,
    /// The file is not there (yet, or anymore).
    Missing,
}

async fn run_tail(
    config: TailConfig,
    events: Option<(ChangeWatcher, mpsc::Receiver<()>)>,
    tx: mpsc::Sender<Result<String>>,
) {
    // Keep the watcher alive for as long as the loop runs.
    let (_watcher, mut event_rx) = match events {
        Some((watcher, rx)) => (Some(watcher), Some(rx)),
        None => (None, None),
    };

    let mut offset: u64 = 0;

    loop {
        let path = config.path.clone();
        let read = tokio::task::spawn_blocking(move || read_new_lines(&path, offset)).await;

        let outcome = match read {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                let _ = tx.send(Err(err.into())).await;
                return;
            }
            Err(join_err) => {
                warn!("tail read task failed: {join_err}");
                return;
            }
        };

        match outcome {
            ReadOutcome::Lines(lines, new_offset) => {
                offset = new_offset;
                for line in lines {
                    if tx.send(Ok(line)).await.is_err() {
                        // Receiver gone; stop tailing.
                        return;
                    }
                }
            }
            ReadOutcome::Truncated => {
                if config.reopen {
                    debug!("{} truncated, restarting from the top", config.path.display());
                    offset = 0;
                    continue;
                }
                return;
            }
            ReadOutcome::Missing => {
                if !config.reopen {
                    return;
                }
                // Wait below for the file to (re)appear.
            }
        }

        if !config.follow {
            return;
        }

        let event_rx = event_rx
            .as_mut()
            .expect("follow mode always has an event channel");
        tokio::select! {
            _ = event_rx.recv() => {
                // Collapse bursts of events into one read.
                while event_rx.try_recv().is_ok() {}
            }
            // Fallback size check; notification backends can miss events.
            () = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

fn read_new_lines(path: &Path, offset: u64) -> std::io::Result<ReadOutcome> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ReadOutcome::Missing);
        }
        Err(err) => return Err(err),
    };

    let len = file.metadata()?.len();
    if len < offset {
        return Ok(ReadOutcome::Truncated);
    }
    if len == offset {
        return Ok(ReadOutcome::Lines(Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf)?;

    // Emit only newline-terminated lines; a partial tail stays on disk and
    // is re-read once its terminator arrives.
    let mut lines = Vec::new();
    let mut consumed = 0usize;
    let mut start = 0usize;
    for (i, byte) in buf.iter().enumerate() {
        if *byte == b'\n' {
            let mut line = &buf[start..i];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = i + 1;
            consumed = i + 1;
        }
    }

    Ok(ReadOutcome::Lines(lines, offset + consumed as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_poll_config(path: &Path) -> TailConfig {
        let mut config = TailConfig::new(path);
        config.poll = true;
        config.poll_interval = Duration::from_millis(50);
        config
    }

    async fn expect_line(lines: &mut Lines) -> String {
        timeout(WAIT, lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("stream ended early")
            .expect("stream errored")
    }

    async fn expect_end(lines: &mut Lines) {
        let next = timeout(WAIT, lines.next_line())
            .await
            .expect("timed out waiting for end of stream");
        assert!(next.is_none(), "expected clean end, got {next:?}");
    }

    #[tokio::test]
    async fn reads_existing_content_then_ends_when_not_following() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "ls\ncd /tmp\n").unwrap();

        let mut config = TailConfig::new(&path);
        config.follow = false;
        let mut lines = tail(config).unwrap();

        assert_eq!(expect_line(&mut lines).await, "ls");
        assert_eq!(expect_line(&mut lines).await, "cd /tmp");
        expect_end(&mut lines).await;
    }

    #[tokio::test]
    async fn holds_back_partial_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "ls\ncd /tm").unwrap();

        let mut config = TailConfig::new(&path);
        config.follow = false;
        let mut lines = tail(config).unwrap();

        assert_eq!(expect_line(&mut lines).await, "ls");
        expect_end(&mut lines).await;
    }

    #[tokio::test]
    async fn delivers_lines_appended_while_following() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "first\n").unwrap();

        let mut lines = tail(fast_poll_config(&path)).unwrap();
        assert_eq!(expect_line(&mut lines).await, "first");

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        assert_eq!(expect_line(&mut lines).await, "second");
    }

    #[tokio::test]
    async fn truncation_restarts_from_the_top_with_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "old line one\nold line two\n").unwrap();

        let mut lines = tail(fast_poll_config(&path)).unwrap();
        assert_eq!(expect_line(&mut lines).await, "old line one");
        assert_eq!(expect_line(&mut lines).await, "old line two");

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(expect_line(&mut lines).await, "fresh");
    }

    #[tokio::test]
    async fn truncation_ends_the_stream_without_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "only\n").unwrap();

        let mut config = fast_poll_config(&path);
        config.reopen = false;
        let mut lines = tail(config).unwrap();
        assert_eq!(expect_line(&mut lines).await, "only");

        std::fs::write(&path, "").unwrap();
        expect_end(&mut lines).await;
    }

    #[tokio::test]
    async fn missing_file_ends_cleanly_without_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");

        let mut config = fast_poll_config(&path);
        config.reopen = false;
        let mut lines = tail(config).unwrap();
        expect_end(&mut lines).await;
    }

    #[tokio::test]
    async fn waits_for_the_file_to_appear_with_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late");

        let mut lines = tail(fast_poll_config(&path)).unwrap();
        std::fs::write(&path, "finally\n").unwrap();

        assert_eq!(expect_line(&mut lines).await, "finally");
    }
}

//! # Histwatch Ingest
//!
//! The single-writer ingestion loop: the only place the ranked index and the
//! durable store are mutated.
//!
//! ```text
//! LOADING  reload persisted commands (best effort)
//!    │
//! RUNNING  line source ──> decode ──> store write-through ──> index touch
//!    │                                   (races the server error channel)
//! STOPPED  clean end of source, or the first fatal error
//! ```
//!
//! Write-through ordering is load-bearing: the store is written before the
//! index is touched, so a crash between the two leaves the store ahead of
//! memory and `load` repairs it on the next start. The reverse order could
//! lose a command forever.

use histwatch_format::Dialect;
use histwatch_index::SharedIndex;
use histwatch_store::HistoryStore;
use histwatch_tailer::Lines;
use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("format error: {0}")]
    Format(#[from] histwatch_format::FormatError),

    #[error("history source error: {0}")]
    Source(#[from] histwatch_tailer::TailError),

    #[error("store error: {0}")]
    Store(#[from] histwatch_store::StoreError),

    #[error("http server failed: {0}")]
    Server(std::io::Error),

    #[error("http server exited unexpectedly")]
    ServerClosed,
}

/// Run the ingestion loop to completion.
///
/// Returns `Ok(())` on a clean end of the line source. Every error is
/// terminal; the process is designed to exit as a unit when either ingestion
/// or serving fails, and `server_err` is the one channel carrying failures
/// from the serving side.
pub async fn run(
    index: SharedIndex,
    store: Option<HistoryStore>,
    dialect: Dialect,
    mut lines: Lines,
    mut server_err: mpsc::Receiver<std::io::Error>,
) -> Result<()> {
    if let Some(store) = &store {
        reload(&index, store);
    }

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                None => {
                    info!("history source exhausted");
                    return Ok(());
                }
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(raw)) => ingest_line(&index, store.as_ref(), dialect, &raw)?,
            },
            err = server_err.recv() => {
                return Err(match err {
                    Some(err) => IngestError::Server(err),
                    None => IngestError::ServerClosed,
                });
            }
        }
    }
}

/// Rebuild the index from the store's native key order.
///
/// Failure here downgrades to a warning: the index starts empty and the
/// process keeps serving whatever it ingests from now on.
fn reload(index: &SharedIndex, store: &HistoryStore) {
    match store.keys() {
        Ok(keys) => {
            let count = keys.len();
            let mut guard = index.write();
            guard.load(keys);
            info!(
                "restored {count} persisted commands (highest rank {})",
                guard.highest_rank()
            );
        }
        Err(err) => warn!("skipping history reload, starting empty: {err}"),
    }
}

fn ingest_line(
    index: &SharedIndex,
    store: Option<&HistoryStore>,
    dialect: Dialect,
    raw: &str,
) -> Result<()> {
    let Some(command) = dialect.decode(raw)? else {
        return Ok(());
    };

    // Store first, touch second. Never the reverse.
    if let Some(store) = store {
        store.put(&command)?;
    }
    index.write().touch(&command);
    Ok(())
}

mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use store::HoursState;
pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::permission::{PermissionChecker, Subject};
use crate::wal::Wal;

// ── WAL writer channel ───────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL. Appends arrive one at a time (the
/// caller holds the schedule write lock), each made durable with its own fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let _ = response.send(append_durable(&mut wal, &event));
            }
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

/// Append and fsync one event. On failure the log is rolled back to its last
/// synced length so a rejected event can never resurface on replay.
fn append_durable(wal: &mut Wal, event: &Event) -> io::Result<()> {
    let flush_start = std::time::Instant::now();
    let result = wal.append_buffered(event).and_then(|()| wal.flush_sync());
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL append failed: {e}");
        if let Err(rollback) = wal.rollback() {
            tracing::error!("WAL rollback failed: {rollback}");
        }
    }
    result
}

async fn send_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The schedule manager: sole owner of the operating-hours set and the only
/// place the non-overlap invariant is enforced.
pub struct Engine {
    state: Arc<RwLock<HoursState>>,
    wal_tx: mpsc::Sender<WalCommand>,
    permissions: Arc<dyn PermissionChecker>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf, permissions: Arc<dyn PermissionChecker>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = HoursState::new();
        for event in &events {
            state.apply(event);
        }
        tracing::info!(
            "replayed {} events from {}, {} operating hours loaded",
            events.len(),
            wal_path.display(),
            state.len()
        );
        metrics::gauge!(crate::observability::OPERATING_HOURS).set(state.len() as f64);

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            wal_tx,
            permissions,
        })
    }

    /// WAL-append then apply, consuming the write guard taken for the
    /// conflict scan. Runs on its own task so that dropping the caller's
    /// future cannot leave an event durable but unapplied.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<HoursState>,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            send_append(&wal_tx, &event).await?;
            guard.apply(&event);
            metrics::gauge!(crate::observability::OPERATING_HOURS).set(guard.len() as f64);
            Ok::<(), EngineError>(())
        })
        .await
        .map_err(|e| EngineError::WalError(format!("WAL task failed: {e}")))?
    }

    pub(super) fn enforce(&self, subject: &Subject, action: &str, resource: &str) -> Result<(), EngineError> {
        self.permissions
            .enforce(subject, action, resource)
            .map_err(|denied| {
                tracing::warn!("permission denied: {denied}");
                metrics::counter!(crate::observability::PERMISSION_DENIALS_TOTAL).increment(1);
                EngineError::Forbidden(denied)
            })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }
}

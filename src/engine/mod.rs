mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
mod store;

pub use conflict::{conflicts, find_conflict, has_conflict, Conflict};
pub use error::EngineError;
pub use locks::{KeyedLocks, LockKey};
pub use store::{InMemoryStore, ScheduleStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

/// One commit: the events a single mutation makes durable together.
pub(super) type Commit = Vec<Event>;

pub(super) enum WalCommand {
    Append {
        events: Commit,
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

/// Background task that owns the WAL and batches commits for group commit.
/// 1. Block until the first Append arrives.
/// 2. Stage it, then drain every Append already queued.
/// 3. One flush_sync for the whole group, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut group = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => group.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                commit_group(&mut wal, &mut group);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_group(wal: &mut Wal, group: &mut Vec<(Commit, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_group(wal, group);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in group.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing for the whole group: on any failure the staged commits are
/// rolled back and every sender is told its commit did not happen.
fn flush_group(wal: &mut Wal, group: &[(Commit, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = group
        .iter()
        .try_for_each(|(events, _)| wal.append_buffered(events))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!("WAL group commit of {} failed: {e}", group.len());
        if let Err(rollback_err) = wal.rollback() {
            error!("WAL rollback failed: {rollback_err}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The schedule service: validation, conflict checking and persistence for
/// one tenant's timetable.
pub struct Engine {
    pub(super) store: Arc<dyn ScheduleStore>,
    pub(super) locks: KeyedLocks,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every mutation, exclusive while compaction snapshots the store.
    pub(super) compact_gate: RwLock<()>,
}

/// Apply an event to the store. Callers hold whatever locks the event needs.
fn apply_event(store: &dyn ScheduleStore, event: &Event) {
    match event {
        Event::EntryCreated { entry } => store.insert(entry.clone()),
        Event::EntryUpdated { entry } => {
            if store.update(entry.clone()).is_none() {
                store.insert(entry.clone());
            }
        }
        Event::EntryDeactivated { id } => {
            store.deactivate(id);
        }
        Event::EntryDeleted { id } => {
            store.remove(id);
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, catalog: Arc<dyn Catalog>) -> io::Result<Self> {
        Self::with_store(wal_path, catalog, Arc::new(InMemoryStore::new()))
    }

    /// Replay `wal_path` into `store` and start the WAL writer task.
    /// Must be called from within a tokio runtime.
    pub fn with_store(
        wal_path: PathBuf,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ScheduleStore>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        for event in &events {
            apply_event(store.as_ref(), event);
        }
        info!(
            "replayed {} events from {} ({} entries)",
            events.len(),
            wal_path.display(),
            store.len()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        Ok(Self::from_parts(store, catalog, wal_tx))
    }

    /// An engine over an already running WAL writer.
    pub(super) fn from_parts(
        store: Arc<dyn ScheduleStore>,
        catalog: Arc<dyn Catalog>,
        wal_tx: mpsc::Sender<WalCommand>,
    ) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            catalog,
            wal_tx,
            compact_gate: RwLock::new(()),
        }
    }

    /// Hand one commit to the background group-commit writer and wait for it
    /// to be durable.
    async fn wal_commit(&self, events: Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make the events durable as one commit, then apply them. Nothing is
    /// applied if the commit fails.
    pub(super) async fn persist_and_apply(&self, events: Commit) -> Result<(), EngineError> {
        self.wal_commit(events.clone()).await?;
        for event in &events {
            apply_event(self.store.as_ref(), event);
        }
        Ok(())
    }

    /// Check `candidate` against the active entries of each of its buckets.
    /// Callers hold the bucket locks.
    pub(super) fn check_no_conflict(
        &self,
        candidate: &ScheduleEntry,
        exclude_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        for key in candidate.bucket_keys() {
            let existing = self.store.find_active_by_resource_and_day(&key);
            if let Some(conflict) = find_conflict(candidate, &existing, exclude_id) {
                metrics::counter!(observability::CONFLICTS_TOTAL, "resource" => conflict.resource.kind())
                    .increment(1);
                debug!(
                    "{} {} {}-{} collides with {} on {}",
                    candidate.day_of_week,
                    candidate.course_ref,
                    candidate.time.start,
                    candidate.time.end,
                    conflict.entry_id,
                    conflict.resource
                );
                return Err(conflict.into());
            }
        }
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.store.len()
    }
}

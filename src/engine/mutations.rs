use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_conflict, validate_entry};
use super::{Engine, EngineError, LockKey, WalCommand};

/// Trim, and treat blank as absent.
pub(super) fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(super) fn build_entry(id: Ulid, new: NewEntry) -> Result<ScheduleEntry, EngineError> {
    let entry = ScheduleEntry {
        id,
        course_ref: new.course_ref.trim().to_string(),
        instructor_ref: normalize(new.instructor_ref),
        room: normalize(new.room),
        building: normalize(new.building),
        day_of_week: new.day_of_week,
        time: TimeSpan::new(new.start_time, new.end_time)?,
        window: DateWindow::new(new.effective_from, new.effective_to)?,
        is_active: true,
        notes: new.notes,
    };
    validate_entry(&entry)?;
    Ok(entry)
}

fn merge(current: &ScheduleEntry, patch: EntryPatch) -> Result<ScheduleEntry, EngineError> {
    let merged = NewEntry {
        course_ref: patch.course_ref.unwrap_or_else(|| current.course_ref.clone()),
        instructor_ref: patch
            .instructor_ref
            .unwrap_or_else(|| current.instructor_ref.clone()),
        room: patch.room.unwrap_or_else(|| current.room.clone()),
        building: patch.building.unwrap_or_else(|| current.building.clone()),
        day_of_week: patch.day_of_week.unwrap_or(current.day_of_week),
        start_time: patch.start_time.unwrap_or(current.time.start),
        end_time: patch.end_time.unwrap_or(current.time.end),
        effective_from: patch.effective_from.unwrap_or(current.window.from),
        effective_to: patch.effective_to.unwrap_or(current.window.to),
        notes: patch.notes.unwrap_or_else(|| current.notes.clone()),
    };
    build_entry(current.id, merged)
}

impl Engine {
    async fn check_references(&self, entry: &ScheduleEntry) -> Result<(), EngineError> {
        if !self.catalog.course_exists(&entry.course_ref).await {
            return Err(EngineError::CourseNotFound(entry.course_ref.clone()));
        }
        if let Some(instructor) = &entry.instructor_ref
            && !self.catalog.instructor_exists(instructor).await {
                return Err(EngineError::InstructorNotFound(instructor.clone()));
            }
        Ok(())
    }

    /// Buckets `previous` already occupies are not counted against the limit.
    fn check_bucket_capacity(
        &self,
        entry: &ScheduleEntry,
        previous: Option<&ScheduleEntry>,
    ) -> Result<(), EngineError> {
        let held = previous.map(|p| p.bucket_keys()).unwrap_or_default();
        for key in entry.bucket_keys() {
            if !held.contains(&key) && self.store.bucket_len(&key) >= MAX_ENTRIES_PER_BUCKET {
                return Err(EngineError::LimitExceeded("too many entries for resource on one day"));
            }
        }
        Ok(())
    }

    /// Lock an entry id, then load it. The slot of an unknown id is released.
    async fn resolve_entry_write(
        &self,
        id: Ulid,
    ) -> Result<(OwnedMutexGuard<()>, ScheduleEntry), EngineError> {
        let key = LockKey::Entry(id);
        let guard = self.locks.lock(key.clone()).await;
        match self.store.get(&id) {
            Some(entry) => Ok((guard, entry)),
            None => {
                drop(guard);
                self.locks.forget(&key);
                Err(EngineError::NotFound(id))
            }
        }
    }

    pub async fn create(&self, new: NewEntry) -> Result<ScheduleEntry, EngineError> {
        let entry = build_entry(Ulid::new(), new)?;
        if self.store.len() >= MAX_ENTRIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }
        self.check_references(&entry).await?;

        let _gate = self.compact_gate.read().await;
        let _guards = self
            .locks
            .lock_all(entry.bucket_keys().into_iter().map(LockKey::Bucket))
            .await;
        self.check_bucket_capacity(&entry, None)?;
        self.check_no_conflict(&entry, None)?;

        self.persist_and_apply(vec![Event::EntryCreated { entry: entry.clone() }])
            .await?;
        metrics::counter!(observability::ENTRIES_CREATED_TOTAL).increment(1);
        info!(
            "created schedule entry {} ({} {} {}-{})",
            entry.id, entry.course_ref, entry.day_of_week, entry.time.start, entry.time.end
        );
        Ok(entry)
    }

    /// Create several entries all-or-nothing. Each one is checked against the
    /// stored timetable and against the entries before it in the batch.
    pub async fn create_many(&self, batch: Vec<NewEntry>) -> Result<Vec<ScheduleEntry>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let entries = batch
            .into_iter()
            .map(|new| build_entry(Ulid::new(), new))
            .collect::<Result<Vec<_>, _>>()?;
        if self.store.len() + entries.len() > MAX_ENTRIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }
        for entry in &entries {
            self.check_references(entry).await?;
        }

        let _gate = self.compact_gate.read().await;
        let keys = entries
            .iter()
            .flat_map(|e| e.bucket_keys())
            .map(LockKey::Bucket);
        let _guards = self.locks.lock_all(keys).await;

        // Phase 1: validate everything.
        for (i, entry) in entries.iter().enumerate() {
            self.check_bucket_capacity(entry, None)?;
            self.check_no_conflict(entry, None)?;
            if let Some(conflict) = find_conflict(entry, &entries[..i], None) {
                return Err(conflict.into());
            }
        }

        // Phase 2: one commit for the whole batch.
        let events = entries
            .iter()
            .map(|entry| Event::EntryCreated { entry: entry.clone() })
            .collect();
        self.persist_and_apply(events).await?;
        metrics::counter!(observability::ENTRIES_CREATED_TOTAL).increment(entries.len() as u64);
        info!("created {} schedule entries in one batch", entries.len());
        Ok(entries)
    }

    /// Merge `patch` into an active entry and re-run every check, with the
    /// entry's own previous version excluded from the conflict check.
    pub async fn update(&self, id: Ulid, patch: EntryPatch) -> Result<ScheduleEntry, EngineError> {
        let (_entry_guard, current) = self.resolve_entry_write(id).await?;
        if !current.is_active {
            return Err(EngineError::Inactive(id));
        }
        let updated = merge(&current, patch)?;
        self.check_references(&updated).await?;

        let _gate = self.compact_gate.read().await;
        let keys = current
            .bucket_keys()
            .into_iter()
            .chain(updated.bucket_keys())
            .map(LockKey::Bucket);
        let _guards = self.locks.lock_all(keys).await;
        self.check_bucket_capacity(&updated, Some(&current))?;
        self.check_no_conflict(&updated, Some(id))?;

        self.persist_and_apply(vec![Event::EntryUpdated { entry: updated.clone() }])
            .await?;
        debug!("updated schedule entry {id}");
        Ok(updated)
    }

    /// Returns false if the entry was already inactive. Freeing a resource
    /// cannot create a conflict, so nothing is re-checked.
    pub async fn deactivate(&self, id: Ulid) -> Result<bool, EngineError> {
        let (_entry_guard, current) = self.resolve_entry_write(id).await?;
        if !current.is_active {
            return Ok(false);
        }

        let _gate = self.compact_gate.read().await;
        let _guards = self
            .locks
            .lock_all(current.bucket_keys().into_iter().map(LockKey::Bucket))
            .await;
        self.persist_and_apply(vec![Event::EntryDeactivated { id }]).await?;
        info!("deactivated schedule entry {id}");
        Ok(true)
    }

    /// Hard delete. Returns the removed record.
    pub async fn delete(&self, id: Ulid) -> Result<ScheduleEntry, EngineError> {
        let (entry_guard, current) = self.resolve_entry_write(id).await?;

        let gate = self.compact_gate.read().await;
        let guards = self
            .locks
            .lock_all(current.bucket_keys().into_iter().map(LockKey::Bucket))
            .await;
        self.persist_and_apply(vec![Event::EntryDeleted { id }]).await?;
        drop(guards);
        drop(gate);
        drop(entry_guard);
        self.locks.forget(&LockKey::Entry(id));
        info!("deleted schedule entry {id}");
        Ok(current)
    }

    /// Rewrite the WAL as one `EntryCreated` per stored entry, inactive ones included.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;
        let mut entries = self.store.scan(&|_| true);
        entries.sort_by_key(|e| e.id);
        let events: Vec<Event> = entries
            .into_iter()
            .map(|entry| Event::EntryCreated { entry })
            .collect();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

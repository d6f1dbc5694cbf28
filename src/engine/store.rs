use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Repository interface over persisted schedule entries. Pure data access:
/// no validation, no conflict rules, no locking beyond what the map itself does.
pub trait ScheduleStore: Send + Sync {
    fn get(&self, id: &Ulid) -> Option<ScheduleEntry>;

    /// Active entries holding `key.resource` on `key.day`, ordered by start time.
    fn find_active_by_resource_and_day(&self, key: &BucketKey) -> Vec<ScheduleEntry>;

    fn insert(&self, entry: ScheduleEntry);

    /// Replace a stored entry, returning the previous version.
    fn update(&self, entry: ScheduleEntry) -> Option<ScheduleEntry>;

    /// Returns true if the entry existed and was active.
    fn deactivate(&self, id: &Ulid) -> bool;

    fn remove(&self, id: &Ulid) -> Option<ScheduleEntry>;

    /// All entries (active or not) referencing `course_ref`.
    fn by_course(&self, course_ref: &str) -> Vec<ScheduleEntry>;

    fn scan(&self, filter: &dyn Fn(&ScheduleEntry) -> bool) -> Vec<ScheduleEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active entries in one bucket.
    fn bucket_len(&self, key: &BucketKey) -> usize;
}

pub struct InMemoryStore {
    entries: DashMap<Ulid, ScheduleEntry>,
    /// (resource, day) → active entry ids. The conflict-check hot path.
    buckets: DashMap<BucketKey, Vec<Ulid>>,
    /// course_ref → every entry id, active or not.
    courses: DashMap<String, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            buckets: DashMap::new(),
            courses: DashMap::new(),
        }
    }

    // ── Index maintenance ────────────────────────────────────

    fn index(&self, entry: &ScheduleEntry) {
        self.courses
            .entry(entry.course_ref.clone())
            .or_default()
            .push(entry.id);
        if entry.is_active {
            self.index_buckets(entry);
        }
    }

    fn index_buckets(&self, entry: &ScheduleEntry) {
        for key in entry.bucket_keys() {
            let mut ids = self.buckets.entry(key).or_default();
            if !ids.contains(&entry.id) {
                ids.push(entry.id);
            }
        }
    }

    fn unindex(&self, entry: &ScheduleEntry) {
        if let Some(mut ids) = self.courses.get_mut(&entry.course_ref) {
            ids.retain(|id| id != &entry.id);
        }
        self.courses.remove_if(&entry.course_ref, |_, ids| ids.is_empty());
        self.unindex_buckets(entry);
    }

    fn unindex_buckets(&self, entry: &ScheduleEntry) {
        for key in entry.bucket_keys() {
            if let Some(mut ids) = self.buckets.get_mut(&key) {
                ids.retain(|id| id != &entry.id);
            }
            self.buckets.remove_if(&key, |_, ids| ids.is_empty());
        }
    }

    fn collect(&self, ids: &[Ulid]) -> Vec<ScheduleEntry> {
        ids.iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.value().clone()))
            .collect()
    }
}

impl ScheduleStore for InMemoryStore {
    fn get(&self, id: &Ulid) -> Option<ScheduleEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    fn find_active_by_resource_and_day(&self, key: &BucketKey) -> Vec<ScheduleEntry> {
        let ids = match self.buckets.get(key) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };
        let mut found: Vec<_> = self
            .collect(&ids)
            .into_iter()
            .filter(|e| e.is_active)
            .collect();
        found.sort_by_key(|e| (e.time.start, e.id));
        found
    }

    fn insert(&self, entry: ScheduleEntry) {
        if let Some(previous) = self.entries.get(&entry.id).map(|e| e.value().clone()) {
            self.unindex(&previous);
        }
        self.index(&entry);
        self.entries.insert(entry.id, entry);
    }

    fn update(&self, entry: ScheduleEntry) -> Option<ScheduleEntry> {
        let previous = self.entries.get(&entry.id).map(|e| e.value().clone())?;
        self.unindex(&previous);
        self.index(&entry);
        self.entries.insert(entry.id, entry);
        Some(previous)
    }

    fn deactivate(&self, id: &Ulid) -> bool {
        let snapshot = match self.entries.get_mut(id) {
            Some(mut e) if e.is_active => {
                e.is_active = false;
                e.value().clone()
            }
            _ => return false,
        };
        self.unindex_buckets(&snapshot);
        true
    }

    fn remove(&self, id: &Ulid) -> Option<ScheduleEntry> {
        let (_, entry) = self.entries.remove(id)?;
        self.unindex(&entry);
        Some(entry)
    }

    fn by_course(&self, course_ref: &str) -> Vec<ScheduleEntry> {
        let ids = match self.courses.get(course_ref) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };
        self.collect(&ids)
    }

    fn scan(&self, filter: &dyn Fn(&ScheduleEntry) -> bool) -> Vec<ScheduleEntry> {
        self.entries
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn bucket_len(&self, key: &BucketKey) -> usize {
        self.buckets.get(key).map_or(0, |ids| ids.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    fn entry(instructor: &str, room: &str, h: u32) -> ScheduleEntry {
        ScheduleEntry {
            id: Ulid::new(),
            course_ref: "CS101".into(),
            instructor_ref: Some(instructor.into()),
            room: Some(room.into()),
            building: None,
            day_of_week: DayOfWeek::Monday,
            time: TimeSpan::new(
                NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(h + 1, 0, 0).unwrap(),
            )
            .unwrap(),
            window: DateWindow::open_ended(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            is_active: true,
            notes: String::new(),
        }
    }

    fn instructor_bucket(id: &str) -> BucketKey {
        BucketKey {
            resource: ResourceKey::Instructor(id.into()),
            day: DayOfWeek::Monday,
        }
    }

    #[test]
    fn insert_indexes_both_resources() {
        let store = InMemoryStore::new();
        let e = entry("X", "A-101", 9);
        store.insert(e.clone());

        assert_eq!(store.find_active_by_resource_and_day(&instructor_bucket("X")), vec![e.clone()]);
        let room = BucketKey {
            resource: ResourceKey::Room {
                room: "A-101".into(),
                building: None,
            },
            day: DayOfWeek::Monday,
        };
        assert_eq!(store.bucket_len(&room), 1);
        assert_eq!(store.by_course("CS101").len(), 1);
    }

    #[test]
    fn bucket_results_sorted_by_start() {
        let store = InMemoryStore::new();
        for h in [14, 9, 11] {
            store.insert(entry("X", &format!("R{h}"), h));
        }
        let starts: Vec<_> = store
            .find_active_by_resource_and_day(&instructor_bucket("X"))
            .iter()
            .map(|e| e.time.start)
            .collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn deactivate_drops_from_buckets_but_keeps_history() {
        let store = InMemoryStore::new();
        let e = entry("X", "A-101", 9);
        store.insert(e.clone());

        assert!(store.deactivate(&e.id));
        assert!(!store.deactivate(&e.id)); // already inactive
        assert!(store.find_active_by_resource_and_day(&instructor_bucket("X")).is_empty());
        assert_eq!(store.bucket_len(&instructor_bucket("X")), 0);
        assert!(!store.get(&e.id).unwrap().is_active);
        assert_eq!(store.by_course("CS101").len(), 1);
    }

    #[test]
    fn update_moves_between_buckets() {
        let store = InMemoryStore::new();
        let e = entry("X", "A-101", 9);
        store.insert(e.clone());

        let mut moved = e.clone();
        moved.instructor_ref = Some("Y".into());
        moved.course_ref = "CS102".into();
        let prev = store.update(moved.clone()).unwrap();
        assert_eq!(prev, e);

        assert!(store.find_active_by_resource_and_day(&instructor_bucket("X")).is_empty());
        assert_eq!(store.find_active_by_resource_and_day(&instructor_bucket("Y")), vec![moved]);
        assert!(store.by_course("CS101").is_empty());
        assert_eq!(store.by_course("CS102").len(), 1);
    }

    #[test]
    fn update_unknown_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.update(entry("X", "A-101", 9)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn remove_clears_indexes() {
        let store = InMemoryStore::new();
        let e = entry("X", "A-101", 9);
        store.insert(e.clone());
        assert_eq!(store.remove(&e.id), Some(e.clone()));
        assert!(store.remove(&e.id).is_none());
        assert_eq!(store.len(), 0);
        assert!(store.by_course("CS101").is_empty());
        assert_eq!(store.bucket_len(&instructor_bucket("X")), 0);
    }

    #[test]
    fn inactive_insert_is_not_bucketed() {
        let store = InMemoryStore::new();
        let mut e = entry("X", "A-101", 9);
        e.is_active = false;
        store.insert(e);
        assert_eq!(store.bucket_len(&instructor_bucket("X")), 0);
        assert_eq!(store.scan(&|e| !e.is_active).len(), 1);
    }
}

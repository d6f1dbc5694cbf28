use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::conflicts;
use super::mutations::normalize;
use super::{Engine, EngineError};

fn finish(mut entries: Vec<ScheduleEntry>, active_only: bool) -> Vec<ScheduleEntry> {
    if active_only {
        entries.retain(|e| e.is_active);
    }
    entries.sort_by_key(ScheduleEntry::sort_key);
    entries
}

impl Engine {
    pub fn get(&self, id: &Ulid) -> Option<ScheduleEntry> {
        self.store.get(id)
    }

    pub fn list(&self, active_only: bool) -> Vec<ScheduleEntry> {
        finish(self.store.scan(&|e| !active_only || e.is_active), false)
    }

    pub fn by_course(&self, course_ref: &str, active_only: bool) -> Vec<ScheduleEntry> {
        finish(self.store.by_course(course_ref), active_only)
    }

    /// The active view reads the per-day buckets; history needs a full scan.
    pub fn by_instructor(&self, instructor_ref: &str, active_only: bool) -> Vec<ScheduleEntry> {
        if active_only {
            let found = DayOfWeek::ALL
                .iter()
                .flat_map(|&day| {
                    self.store.find_active_by_resource_and_day(&BucketKey {
                        resource: ResourceKey::Instructor(instructor_ref.to_string()),
                        day,
                    })
                })
                .collect();
            return finish(found, true);
        }
        finish(
            self.store
                .scan(&|e| e.instructor_ref.as_deref() == Some(instructor_ref)),
            false,
        )
    }

    /// `building == None` matches the room in any building.
    pub fn by_room(&self, room: &str, building: Option<&str>, active_only: bool) -> Vec<ScheduleEntry> {
        let found = self.store.scan(&|e| {
            e.room.as_deref() == Some(room) && building.is_none_or(|b| e.building.as_deref() == Some(b))
        });
        finish(found, active_only)
    }

    pub fn by_day(&self, day: DayOfWeek, active_only: bool) -> Vec<ScheduleEntry> {
        finish(self.store.scan(&|e| e.day_of_week == day), active_only)
    }

    /// Active entries that meet on a calendar date.
    pub fn on_date(&self, date: NaiveDate) -> Vec<ScheduleEntry> {
        finish(self.store.scan(&|e| e.is_active && e.occurs_on(date)), true)
    }

    /// Dry run: every active entry the candidate would collide with. Takes no
    /// locks, so the answer may be stale by the time a write is attempted.
    pub fn find_conflicts(
        &self,
        candidate: NewEntry,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<ScheduleEntry>, EngineError> {
        let candidate = ScheduleEntry {
            id: exclude_id.unwrap_or_else(Ulid::new),
            course_ref: candidate.course_ref,
            instructor_ref: normalize(candidate.instructor_ref),
            room: normalize(candidate.room),
            building: normalize(candidate.building),
            day_of_week: candidate.day_of_week,
            time: TimeSpan::new(candidate.start_time, candidate.end_time)?,
            window: DateWindow::new(candidate.effective_from, candidate.effective_to)?,
            is_active: true,
            notes: candidate.notes,
        };

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for key in candidate.bucket_keys() {
            let existing = self.store.find_active_by_resource_and_day(&key);
            for conflict in conflicts(&candidate, &existing, exclude_id) {
                if seen.insert(conflict.entry_id)
                    && let Some(e) = existing.iter().find(|e| e.id == conflict.entry_id) {
                        found.push(e.clone());
                    }
            }
        }
        Ok(finish(found, true))
    }
}

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// An existing active entry that collides with a candidate, and the resource they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub entry_id: Ulid,
    pub resource: ResourceKey,
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        EngineError::Conflict {
            entry_id: c.entry_id,
            resource: c.resource,
        }
    }
}

/// Every entry in `existing` that collides with `candidate`, in iteration order.
///
/// An entry collides when it is active, is not `exclude_id`, sits on the same
/// weekday, shares the instructor or the room+building, has an overlapping
/// effective window, and its `[start, end)` overlaps the candidate's.
pub fn conflicts<'a, I>(
    candidate: &'a ScheduleEntry,
    existing: I,
    exclude_id: Option<Ulid>,
) -> impl Iterator<Item = Conflict> + 'a
where
    I: IntoIterator<Item = &'a ScheduleEntry>,
    I::IntoIter: 'a,
{
    let keys = candidate.resource_keys();
    existing.into_iter().filter_map(move |entry| {
        if !entry.is_active
            || Some(entry.id) == exclude_id
            || entry.day_of_week != candidate.day_of_week
        {
            return None;
        }
        let shared = keys.iter().find(|k| entry.holds(k))?;
        if entry.window.overlaps(&candidate.window) && entry.time.overlaps(&candidate.time) {
            Some(Conflict {
                entry_id: entry.id,
                resource: shared.clone(),
            })
        } else {
            None
        }
    })
}

pub fn find_conflict<'a, I>(
    candidate: &'a ScheduleEntry,
    existing: I,
    exclude_id: Option<Ulid>,
) -> Option<Conflict>
where
    I: IntoIterator<Item = &'a ScheduleEntry>,
    I::IntoIter: 'a,
{
    conflicts(candidate, existing, exclude_id).next()
}

pub fn has_conflict<'a, I>(candidate: &'a ScheduleEntry, existing: I, exclude_id: Option<Ulid>) -> bool
where
    I: IntoIterator<Item = &'a ScheduleEntry>,
    I::IntoIter: 'a,
{
    find_conflict(candidate, existing, exclude_id).is_some()
}

/// Field limits. Time and window ordering are enforced by `TimeSpan`/`DateWindow`.
pub(crate) fn validate_entry(entry: &ScheduleEntry) -> Result<(), EngineError> {
    if entry.course_ref.is_empty() {
        return Err(ValidationError::Missing("course_ref").into());
    }
    if entry.course_ref.len() > MAX_REF_LEN {
        return Err(ValidationError::TooLong("course_ref").into());
    }
    if entry.instructor_ref.as_ref().is_some_and(|i| i.len() > MAX_REF_LEN) {
        return Err(ValidationError::TooLong("instructor_ref").into());
    }
    if entry.room.as_ref().is_some_and(|r| r.len() > MAX_ROOM_LEN) {
        return Err(ValidationError::TooLong("room").into());
    }
    if entry.building.as_ref().is_some_and(|b| b.len() > MAX_ROOM_LEN) {
        return Err(ValidationError::TooLong("building").into());
    }
    if entry.notes.len() > MAX_NOTES_LEN {
        return Err(ValidationError::TooLong("notes").into());
    }
    Ok(())
}

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Recurring weekly slot a schedule entry occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts full names and three-letter abbreviations, case-insensitive.
impl FromStr for DayOfWeek {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let day = match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => DayOfWeek::Monday,
            "tuesday" | "tue" => DayOfWeek::Tuesday,
            "wednesday" | "wed" => DayOfWeek::Wednesday,
            "thursday" | "thu" => DayOfWeek::Thursday,
            "friday" | "fri" => DayOfWeek::Friday,
            "saturday" | "sat" => DayOfWeek::Saturday,
            "sunday" | "sun" => DayOfWeek::Sunday,
            _ => return Err(ValidationError::UnknownDay(s.to_string())),
        };
        Ok(day)
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Half-open time-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSpan {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvertedTimes { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_time(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Inclusive date range; `to == None` means "until further notice".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: Option<NaiveDate>) -> Result<Self, ValidationError> {
        if let Some(to) = to
            && from > to {
                return Err(ValidationError::InvertedWindow { from, to });
            }
        Ok(Self { from, to })
    }

    pub fn open_ended(from: NaiveDate) -> Self {
        Self { from, to: None }
    }

    pub fn overlaps(&self, other: &DateWindow) -> bool {
        other.to.is_none_or(|to| self.from <= to) && self.to.is_none_or(|to| other.from <= to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && self.to.is_none_or(|to| date <= to)
    }
}

/// The scarce thing a booking competes for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Instructor(String),
    Room {
        room: String,
        building: Option<String>,
    },
}

impl ResourceKey {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKey::Instructor(_) => "instructor",
            ResourceKey::Room { .. } => "room",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Instructor(id) => write!(f, "instructor {id}"),
            ResourceKey::Room { room, building: Some(b) } => write!(f, "room {room} ({b})"),
            ResourceKey::Room { room, building: None } => write!(f, "room {room}"),
        }
    }
}

/// A resource on one weekday: the unit of indexing and locking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub resource: ResourceKey,
    pub day: DayOfWeek,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub course_ref: String,
    pub instructor_ref: Option<String>,
    pub room: Option<String>,
    pub building: Option<String>,
    pub day_of_week: DayOfWeek,
    pub time: TimeSpan,
    pub window: DateWindow,
    pub is_active: bool,
    pub notes: String,
}

impl ScheduleEntry {
    /// Instructor key first, then room key. Empty if the entry books neither.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(instructor) = &self.instructor_ref {
            keys.push(ResourceKey::Instructor(instructor.clone()));
        }
        if let Some(room) = &self.room {
            keys.push(ResourceKey::Room {
                room: room.clone(),
                building: self.building.clone(),
            });
        }
        keys
    }

    pub fn holds(&self, key: &ResourceKey) -> bool {
        match key {
            ResourceKey::Instructor(id) => self.instructor_ref.as_deref() == Some(id.as_str()),
            ResourceKey::Room { room, building } => {
                self.room.as_deref() == Some(room.as_str()) && self.building == *building
            }
        }
    }

    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        self.resource_keys()
            .into_iter()
            .map(|resource| BucketKey {
                resource,
                day: self.day_of_week,
            })
            .collect()
    }

    /// True if this entry meets on the given calendar date.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        DayOfWeek::from(date.weekday()) == self.day_of_week && self.window.contains(date)
    }

    /// Ordering used by every query result.
    pub fn sort_key(&self) -> (DayOfWeek, NaiveTime, Ulid) {
        (self.day_of_week, self.time.start, self.id)
    }
}

/// Unvalidated input for a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub course_ref: String,
    pub instructor_ref: Option<String>,
    pub room: Option<String>,
    pub building: Option<String>,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub notes: String,
}

/// Partial update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub course_ref: Option<String>,
    pub instructor_ref: Option<Option<String>>,
    pub room: Option<Option<String>>,
    pub building: Option<Option<String>>,
    pub day_of_week: Option<DayOfWeek>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<Option<NaiveDate>>,
    pub notes: Option<String>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == EntryPatch::default()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EntryCreated { entry: ScheduleEntry },
    EntryUpdated { entry: ScheduleEntry },
    EntryDeactivated { id: Ulid },
    EntryDeleted { id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvertedTimes { start: NaiveTime, end: NaiveTime },
    InvertedWindow { from: NaiveDate, to: NaiveDate },
    UnknownDay(String),
    Missing(&'static str),
    TooLong(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvertedTimes { start, end } => {
                write!(f, "start_time {start} must be before end_time {end}")
            }
            ValidationError::InvertedWindow { from, to } => {
                write!(f, "effective_from {from} is after effective_to {to}")
            }
            ValidationError::UnknownDay(s) => write!(f, "unknown day_of_week: {s:?}"),
            ValidationError::Missing(field) => write!(f, "{field} is required"),
            ValidationError::TooLong(field) => write!(f, "{field} is too long"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(instructor: Option<&str>, room: Option<&str>, building: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            id: Ulid::new(),
            course_ref: "CS101".into(),
            instructor_ref: instructor.map(Into::into),
            room: room.map(Into::into),
            building: building.map(Into::into),
            day_of_week: DayOfWeek::Monday,
            time: TimeSpan::new(t(9, 0), t(10, 0)).unwrap(),
            window: DateWindow::open_ended(d(2024, 1, 1)),
            is_active: true,
            notes: String::new(),
        }
    }

    #[test]
    fn time_span_rejects_inverted_and_empty() {
        assert!(TimeSpan::new(t(10, 0), t(9, 0)).is_err());
        assert!(matches!(
            TimeSpan::new(t(9, 0), t(9, 0)),
            Err(ValidationError::InvertedTimes { .. })
        ));
        let s = TimeSpan::new(t(9, 0), t(10, 30)).unwrap();
        assert_eq!(s.duration(), TimeDelta::minutes(90));
    }

    #[test]
    fn time_span_half_open() {
        let a = TimeSpan::new(t(9, 0), t(10, 30)).unwrap();
        let b = TimeSpan::new(t(10, 30), t(12, 0)).unwrap();
        let c = TimeSpan::new(t(10, 0), t(11, 0)).unwrap();
        assert!(!a.overlaps(&b)); // back-to-back
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(a.contains_time(t(9, 0)));
        assert!(!a.contains_time(t(10, 30)));
    }

    #[test]
    fn date_window_validation() {
        assert!(DateWindow::new(d(2024, 2, 1), Some(d(2024, 1, 1))).is_err());
        // single-day window is legal
        assert!(DateWindow::new(d(2024, 1, 1), Some(d(2024, 1, 1))).is_ok());
        assert!(DateWindow::new(d(2024, 1, 1), None).is_ok());
    }

    #[test]
    fn date_window_overlap_shapes() {
        let open = DateWindow::open_ended(d(2024, 1, 1));
        let spring = DateWindow::new(d(2024, 1, 1), Some(d(2024, 5, 31))).unwrap();
        let autumn = DateWindow::new(d(2024, 9, 1), Some(d(2024, 12, 20))).unwrap();
        let last_year = DateWindow::new(d(2023, 1, 1), Some(d(2023, 12, 31))).unwrap();
        let touching = DateWindow::new(d(2024, 5, 31), Some(d(2024, 6, 30))).unwrap();

        assert!(open.overlaps(&spring));
        assert!(open.overlaps(&autumn));
        assert!(!open.overlaps(&last_year));
        assert!(!spring.overlaps(&autumn));
        // inclusive ends share a day
        assert!(spring.overlaps(&touching));
        assert!(touching.overlaps(&spring));
        assert!(open.overlaps(&DateWindow::open_ended(d(2030, 1, 1))));
    }

    #[test]
    fn day_parsing() {
        assert_eq!("Monday".parse::<DayOfWeek>().unwrap(), DayOfWeek::Monday);
        assert_eq!("SUN".parse::<DayOfWeek>().unwrap(), DayOfWeek::Sunday);
        assert_eq!(" wednesday ".parse::<DayOfWeek>().unwrap(), DayOfWeek::Wednesday);
        assert!(matches!(
            "funday".parse::<DayOfWeek>(),
            Err(ValidationError::UnknownDay(_))
        ));
        for day in DayOfWeek::ALL {
            assert_eq!(day.as_str().parse::<DayOfWeek>().unwrap(), day);
        }
    }

    #[test]
    fn resource_keys_by_shape() {
        assert!(entry(None, None, None).resource_keys().is_empty());
        assert_eq!(
            entry(Some("X"), None, None).resource_keys(),
            vec![ResourceKey::Instructor("X".into())]
        );
        let both = entry(Some("X"), Some("A-101"), Some("Main"));
        let keys = both.resource_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| both.holds(k)));
        assert_eq!(both.bucket_keys()[1].day, DayOfWeek::Monday);
    }

    #[test]
    fn room_key_includes_building() {
        let main = entry(None, Some("101"), Some("Main"));
        let annex = entry(None, Some("101"), Some("Annex"));
        let key = &main.resource_keys()[0];
        assert!(main.holds(key));
        assert!(!annex.holds(key));
        assert_eq!(key.to_string(), "room 101 (Main)");
    }

    #[test]
    fn occurs_on_checks_day_and_window() {
        let mut e = entry(Some("X"), None, None);
        e.window = DateWindow::new(d(2024, 1, 1), Some(d(2024, 1, 31))).unwrap();
        assert!(e.occurs_on(d(2024, 1, 8))); // a Monday
        assert!(!e.occurs_on(d(2024, 1, 9))); // Tuesday
        assert!(!e.occurs_on(d(2024, 2, 5))); // Monday after the window
    }

    #[test]
    fn patch_is_empty() {
        assert!(EntryPatch::default().is_empty());
        let p = EntryPatch {
            room: Some(None),
            ..Default::default()
        };
        assert!(!p.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::EntryCreated {
            entry: entry(Some("X"), Some("A-101"), None),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::{Europe::Zagreb, Tz};
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike};
use log::{error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a calendar entry. The stored labels are Croatian and the set is
/// open: unknown labels survive a load/save cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Lectures,
    LabExercises,
    Exam,
    #[default]
    Other,
    Custom(String),
}

impl EventKind {
    pub fn label(&self) -> &str {
        match self {
            EventKind::Lectures => "Predavanja",
            EventKind::LabExercises => "Laboratorijske vježbe",
            EventKind::Exam => "Ispit",
            EventKind::Other => "Ostalo",
            EventKind::Custom(label) => label,
        }
    }

    /// Guesses the kind of an imported timetable entry from its title.
    pub fn classify(title: &str) -> Self {
        let title = title.to_lowercase();
        if title.contains("predavanja") {
            EventKind::Lectures
        } else if title.contains("laboratorijske vježbe") {
            EventKind::LabExercises
        } else {
            EventKind::Other
        }
    }
}

impl From<String> for EventKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "Predavanja" => EventKind::Lectures,
            "Laboratorijske vježbe" => EventKind::LabExercises,
            "Ispit" => EventKind::Exam,
            "Ostalo" | "" => EventKind::Other,
            _ => EventKind::Custom(label),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.label().to_string()
    }
}

mod minute_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%Y-%m-%d %H:%M";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(D::Error::custom)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A user-created calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(rename = "Naziv")]
    pub title: String,
    #[serde(rename = "Vrijeme početka", with = "minute_format")]
    pub start: NaiveDateTime,
    #[serde(rename = "Vrijeme kraja", with = "minute_format")]
    pub end: NaiveDateTime,
    #[serde(rename = "Lokacija", default, deserialize_with = "null_as_empty")]
    pub location: String,
    #[serde(rename = "Opis", default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(rename = "Tip", default)]
    pub kind: EventKind,
}

impl CalendarEvent {
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Same entry as far as the calendar is concerned: title, times of day and kind.
    pub fn same_slot(&self, other: &CalendarEvent) -> bool {
        self.title == other.title
            && self.start.time() == other.start.time()
            && self.end.time() == other.end.time()
            && self.kind.label().to_lowercase() == other.kind.label().to_lowercase()
    }

    /// This event moved to `date`, keeping its times of day.
    pub fn on(&self, date: NaiveDate) -> CalendarEvent {
        CalendarEvent {
            start: date.and_time(self.start.time()),
            end: date.and_time(self.end.time()),
            ..self.clone()
        }
    }
}

/// Wall-clock time in Zagreb. Floating times and bare dates are taken as local.
fn zagreb_time(value: DatePerhapsTime) -> Option<NaiveDateTime> {
    match value {
        DatePerhapsTime::Date(date) => date.and_hms_opt(0, 0, 0),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => Some(naive),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(utc)) => Some(utc.with_timezone(&Zagreb).naive_local()),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            let Ok(tz) = tzid.parse::<Tz>() else {
                warn!("unknown timezone {tzid}, keeping the time as is");
                return Some(date_time);
            };
            let local = tz.from_local_datetime(&date_time).earliest()?;
            Some(local.with_timezone(&Zagreb).naive_local())
        }
    }
}

/// Calendar entries of an iCalendar document, in Zagreb time. Events
/// without a title or start are skipped; a missing end means a zero-length entry.
pub fn parse_ics(contents: &str) -> anyhow::Result<Vec<CalendarEvent>> {
    let calendar: Calendar = contents.parse().map_err(anyhow::Error::msg)?;
    let mut events = Vec::new();
    for component in &calendar.components {
        let CalendarComponent::Event(event) = component else {
            continue;
        };
        let (Some(title), Some(start)) = (event.get_summary(), event.get_start().and_then(zagreb_time)) else {
            warn!("skipping calendar entry without a title or start");
            continue;
        };
        let end = event.get_end().and_then(zagreb_time).unwrap_or(start);
        events.push(CalendarEvent {
            title: title.to_string(),
            start,
            end,
            location: event.get_location().unwrap_or_default().to_string(),
            description: event.get_description().unwrap_or_default().to_string(),
            kind: EventKind::classify(title),
        });
    }
    Ok(events)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Daily,
    Weekly,
}

/// Calendar entries keyed by day, loaded and saved as one JSON document.
#[derive(Debug, Clone)]
pub struct LocalEventStore {
    path: PathBuf,
    events: BTreeMap<NaiveDate, Vec<CalendarEvent>>,
}

impl LocalEventStore {
    /// Loads `path`. A missing file is an empty store; so is a corrupt one,
    /// which is logged and will be overwritten by the next save.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let events = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read events file {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(events) => events,
                Err(e) => {
                    error!("events file {} is corrupt, starting empty: {e}", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, events })
    }

    /// Writes the whole store, replacing the file in one step.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.events)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        info!("saved {} calendar days to {}", self.events.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn all(&self) -> &BTreeMap<NaiveDate, Vec<CalendarEvent>> {
        &self.events
    }

    /// Days that have at least one entry.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.events
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(date, _)| *date)
    }

    pub fn events_on(&self, date: NaiveDate) -> &[CalendarEvent] {
        self.events.get(&date).map(Vec::as_slice).unwrap_or_default()
    }

    /// Entries of `date` ordered by start time.
    pub fn day_schedule(&self, date: NaiveDate) -> Vec<&CalendarEvent> {
        let mut schedule: Vec<_> = self.events_on(date).iter().collect();
        schedule.sort_by_key(|event| event.start);
        schedule
    }

    /// Adds `event` under its start date. Exact duplicates are ignored.
    pub fn add(&mut self, event: CalendarEvent) -> bool {
        let day = self.events.entry(event.date()).or_default();
        if day.contains(&event) {
            return false;
        }
        day.push(event);
        true
    }

    /// Adds `event` on its own date and then every day (or every week) up to
    /// and including `until`. Returns how many entries were added.
    pub fn add_repeating(&mut self, event: CalendarEvent, until: NaiveDate, repeat: Repeat) -> usize {
        let first = event.date();
        let mut added = 0;
        let mut date = first;
        while date <= until {
            if repeat == Repeat::Daily || date.weekday() == first.weekday() {
                if self.add(event.on(date)) {
                    added += 1;
                }
            }
            let Some(next) = date.checked_add_days(Days::new(1)) else {
                break;
            };
            date = next;
        }
        added
    }

    /// Removes the first entry of `date` in the same slot as `event`.
    pub fn remove(&mut self, date: NaiveDate, event: &CalendarEvent) -> bool {
        let Some(day) = self.events.get_mut(&date) else {
            return false;
        };
        let Some(index) = day.iter().position(|e| e.same_slot(event)) else {
            return false;
        };
        day.remove(index);
        if day.is_empty() {
            self.events.remove(&date);
        }
        true
    }

    /// Merges a timetable exported as `.ics`. A missing file imports nothing.
    /// Returns how many entries were new.
    pub fn import_ics(&mut self, path: impl AsRef<Path>) -> anyhow::Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("no timetable at {}", path.display());
            return Ok(0);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read timetable {}", path.display()))?;
        let events = parse_ics(&contents).with_context(|| format!("failed to parse timetable {}", path.display()))?;
        let added = events.into_iter().filter(|event| self.add(event.clone())).count();
        info!("imported {added} calendar entries from {}", path.display());
        Ok(added)
    }

    /// Replaces an entry of `date` with `updated`, which may be on another day.
    pub fn replace(&mut self, date: NaiveDate, original: &CalendarEvent, updated: CalendarEvent) -> bool {
        if !self.remove(date, original) {
            return false;
        }
        self.add(updated);
        true
    }
}

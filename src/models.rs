use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub type CourseName = String;

static NOTIFICATION_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4}) u (\d{1,2})h$").expect("valid notification time regex")
});

/// A course as listed on the "my courses" page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseLink {
    /// Display name with parenthetical suffixes removed.
    pub name: CourseName,
    pub url: String,
    /// Value of the `studij` query parameter.
    pub studij: String,
}

/// A notification card as it appears on a course page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCard {
    pub title: String,
    pub message: String,
    /// `d.m.yyyy u Hh`, or the raw subtitle when it did not match.
    pub time: String,
}

impl NotificationCard {
    pub fn into_notification(self, course: &str) -> Notification {
        Notification {
            title: self.title,
            message: self.message,
            time: self.time,
            course: course.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub time: String,
    pub course: CourseName,
}

impl Notification {
    pub fn parsed_time(&self) -> Option<NaiveDateTime> {
        parse_notification_time(&self.time)
    }

    /// Identity of a notification within its course.
    pub fn identity(&self) -> NotificationId {
        NotificationId {
            course: self.course.clone(),
            title: self.title.clone(),
            time: self.time.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId {
    pub course: CourseName,
    pub title: String,
    pub time: String,
}

/// Parses the portal's `14.3.2025 u 9h` timestamps.
pub fn parse_notification_time(time: &str) -> Option<NaiveDateTime> {
    let caps = NOTIFICATION_TIME.captures(time.trim())?;
    let day = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    let hour = caps[4].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    /// Resource path after the repository marker, or the raw link for external files.
    pub extension: String,
    /// Icon name, e.g. `pdf` or `link`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `dd.mm.yy`, empty when the link carried no date tag.
    pub date: String,
    pub section: String,
}

impl FileRecord {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%d.%m.%y").ok()
    }
}

/// Everything scraped from one course page during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CourseSnapshot {
    pub name: CourseName,
    pub files: Vec<FileRecord>,
    pub notifications: Vec<NotificationCard>,
    pub reservation_link: Option<String>,
}

/// Notifications in display order, newest first.
#[derive(Debug, Clone, Default)]
pub struct NotificationFeed {
    items: Vec<Notification>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a feed from an unordered batch.
    pub fn from_batch(mut items: Vec<Notification>) -> Self {
        // Stable, so equal timestamps keep their arrival order. Unparseable times go last.
        items.sort_by(|a, b| b.parsed_time().cmp(&a.parsed_time()));
        Self { items }
    }

    /// Adds a notification that arrived from the poller. Those arrive oldest
    /// first, so each one goes on top.
    pub fn push(&mut self, notification: Notification) {
        self.items.insert(0, notification);
    }

    pub fn latest(&self, n: usize) -> &[Notification] {
        &self.items[..n.min(self.items.len())]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }
}

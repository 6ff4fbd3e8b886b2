use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::NaiveTime;

use crate::{
    download::{DownloadReport, DownloadRequest},
    error::ReservationError,
    models::{CourseName, FileRecord, Notification},
    reservation::{ReservationId, ReservationStatus},
};

/// Everything the core tells the UI layer.
///
/// Events from the poller and from reservation workers are independent
/// streams sharing one channel; there is no ordering between them.
pub enum PortalEvent<P> {
    NotificationAdded {
        course: CourseName,
        notification: Notification,
    },
    FileAdded {
        course: CourseName,
        file: FileRecord,
    },
    /// Sent once, right before [`PortalEvent::FirstLoadComplete`].
    ReservationLinksDiscovered {
        links: BTreeMap<CourseName, String>,
        session: Arc<P>,
    },
    FirstLoadComplete,
    /// The session has no token; the consumer should route back to login.
    NotLoggedIn,
    ReservationStatusChanged {
        id: ReservationId,
        attempt: u64,
        course: CourseName,
        time: NaiveTime,
        keyword: String,
        status: ReservationStatus,
    },
    ReservationResult {
        id: ReservationId,
        attempt: u64,
        result: Result<(), ReservationError>,
    },
    DownloadFinished {
        request: DownloadRequest,
        result: Result<DownloadReport, String>,
    },
}

impl<P> fmt::Debug for PortalEvent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalEvent::NotificationAdded {
                course,
                notification,
            } => f
                .debug_struct("NotificationAdded")
                .field("course", course)
                .field("notification", notification)
                .finish(),
            PortalEvent::FileAdded { course, file } => f
                .debug_struct("FileAdded")
                .field("course", course)
                .field("file", file)
                .finish(),
            PortalEvent::ReservationLinksDiscovered { links, .. } => f
                .debug_struct("ReservationLinksDiscovered")
                .field("links", links)
                .finish_non_exhaustive(),
            PortalEvent::FirstLoadComplete => f.write_str("FirstLoadComplete"),
            PortalEvent::NotLoggedIn => f.write_str("NotLoggedIn"),
            PortalEvent::ReservationStatusChanged {
                id,
                attempt,
                course,
                time,
                keyword,
                status,
            } => f
                .debug_struct("ReservationStatusChanged")
                .field("id", id)
                .field("attempt", attempt)
                .field("course", course)
                .field("time", time)
                .field("keyword", keyword)
                .field("status", status)
                .finish(),
            PortalEvent::ReservationResult {
                id,
                attempt,
                result,
            } => f
                .debug_struct("ReservationResult")
                .field("id", id)
                .field("attempt", attempt)
                .field("result", result)
                .finish(),
            PortalEvent::DownloadFinished { request, result } => f
                .debug_struct("DownloadFinished")
                .field("request", request)
                .field("result", result)
                .finish(),
        }
    }
}

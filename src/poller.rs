use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use log::{debug, error, info, warn};
use tokio::{
    sync::{mpsc::UnboundedSender, watch},
    task::JoinHandle,
    time::sleep,
};

use crate::{
    course_page_scraper::scrape_course_page,
    courses_page_scraper::extract_course_links,
    events::PortalEvent,
    home_page_scraper::find_my_courses_link,
    models::{CourseName, CourseSnapshot, FileRecord, Notification, NotificationId},
    portal::Portal,
};

/// What one sweep changed, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    FileAdded {
        course: CourseName,
        file: FileRecord,
    },
    NotificationAdded(Notification),
    /// Only produced by the first completed sweep.
    FirstLoad {
        links: BTreeMap<CourseName, String>,
    },
}

/// Local view of the portal, diffed against every sweep.
#[derive(Debug, Default)]
pub struct PollState {
    current_files: HashMap<CourseName, Vec<FileRecord>>,
    current_notifications: HashSet<NotificationId>,
    first_load: bool,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_load_done(&self) -> bool {
        self.first_load
    }

    pub fn files(&self, course: &str) -> &[FileRecord] {
        self.current_files.get(course).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn knows_notification(&self, course: &str, title: &str, time: &str) -> bool {
        self.current_notifications.contains(&NotificationId {
            course: course.to_string(),
            title: title.to_string(),
            time: time.to_string(),
        })
    }

    /// Records a completed sweep and returns what is new.
    ///
    /// Files come first, per course in ascending date order. Notifications
    /// follow in ascending time order across all courses, so a consumer can
    /// append them to one combined feed. Notifications whose time does not
    /// parse are dropped.
    pub fn apply(&mut self, sweep: &[CourseSnapshot]) -> Vec<Change> {
        let mut changes = vec![];

        for course in sweep {
            let mut files = course.files.clone();
            // Stable; undated files keep their page order in front.
            files.sort_by_key(FileRecord::parsed_date);

            let known = self.current_files.entry(course.name.clone()).or_default();
            for file in files {
                if !known.contains(&file) {
                    known.push(file.clone());
                    changes.push(Change::FileAdded {
                        course: course.name.clone(),
                        file,
                    });
                }
            }
        }

        let mut combined = vec![];
        for course in sweep {
            for card in &course.notifications {
                let notification = card.clone().into_notification(&course.name);
                match notification.parsed_time() {
                    Some(time) => combined.push((notification, time)),
                    None => error!(
                        "cannot parse time {:?} of notification {:?} in {}, dropping it",
                        notification.time, notification.title, course.name
                    ),
                }
            }
        }
        combined.sort_by_key(|(_, time)| *time);

        for (notification, _) in combined {
            if self.current_notifications.insert(notification.identity()) {
                changes.push(Change::NotificationAdded(notification));
            }
        }

        if !self.first_load {
            self.first_load = true;
            let links = sweep
                .iter()
                .filter_map(|course| {
                    course
                        .reservation_link
                        .clone()
                        .map(|link| (course.name.clone(), link))
                })
                .collect();
            changes.push(Change::FirstLoad { links });
        }

        changes
    }
}

/// Fetches the course list and every course page.
///
/// Failing to get the course list fails the sweep. A course page that
/// cannot be fetched is skipped.
pub async fn sweep<P: Portal>(portal: &P) -> anyhow::Result<Vec<CourseSnapshot>> {
    let home_url = portal.home_url()?;
    let home = portal
        .get(&home_url)
        .await
        .context("failed to fetch the portal root")?;
    let my_courses = find_my_courses_link(&home).context("no \"Moji predmeti\" entry on the portal root")?;
    let courses_page = portal
        .get(&portal.resolve(&my_courses))
        .await
        .context("failed to fetch the course list")?;

    let courses = extract_course_links(&courses_page);
    debug!("found {} courses", courses.len());

    let mut snapshots = Vec::with_capacity(courses.len());
    for course in courses {
        match portal.get(&portal.resolve(&course.url)).await {
            Ok(html) => snapshots.push(scrape_course_page(&course.name, &html)),
            Err(e) => warn!("skipping course {}: {e:#}", course.name),
        }
    }
    Ok(snapshots)
}

/// Background engine that keeps [`PollState`] in sync with the portal.
pub struct Poller<P> {
    portal: Arc<P>,
    interval: Duration,
    state: PollState,
}

impl<P: Portal> Poller<P> {
    pub fn new(portal: Arc<P>, interval: Duration) -> Self {
        Self {
            portal,
            interval,
            state: PollState::new(),
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// One full iteration: sweep, diff, and turn the changes into events.
    pub async fn poll_once(&mut self) -> anyhow::Result<Vec<PortalEvent<P>>> {
        let snapshots = sweep(self.portal.as_ref()).await?;
        let events = self
            .state
            .apply(&snapshots)
            .into_iter()
            .flat_map(|change| self.to_events(change))
            .collect();
        Ok(events)
    }

    fn to_events(&self, change: Change) -> Vec<PortalEvent<P>> {
        match change {
            Change::FileAdded { course, file } => vec![PortalEvent::FileAdded { course, file }],
            Change::NotificationAdded(notification) => vec![PortalEvent::NotificationAdded {
                course: notification.course.clone(),
                notification,
            }],
            Change::FirstLoad { links } => vec![
                PortalEvent::ReservationLinksDiscovered {
                    links,
                    session: Arc::clone(&self.portal),
                },
                PortalEvent::FirstLoadComplete,
            ],
        }
    }

    pub fn spawn(self, events: UnboundedSender<PortalEvent<P>>) -> PollerHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(events, stopped));
        PollerHandle { stop, task }
    }

    async fn run(mut self, events: UnboundedSender<PortalEvent<P>>, mut stopped: watch::Receiver<bool>) {
        info!("poller started, sweeping every {:?}", self.interval);
        loop {
            if *stopped.borrow() {
                break;
            }
            if self.portal.home_url().is_err() {
                warn!("not logged in, poller stopping");
                let _ = events.send(PortalEvent::NotLoggedIn);
                break;
            }

            match self.poll_once().await {
                Ok(batch) => {
                    debug!("sweep produced {} events", batch.len());
                    for event in batch {
                        if events.send(event).is_err() {
                            debug!("event receiver dropped, poller stopping");
                            return;
                        }
                    }
                }
                Err(e) => warn!("poll iteration failed: {e:#}"),
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = stopped.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("poller stopped");
    }
}

pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop at its next boundary and waits for it. A request in
    /// flight is allowed to complete (or time out) first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("poller task ended abnormally: {e}");
        }
    }
}

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Local, NaiveTime, TimeDelta};
use log::{debug, info, warn};
use tokio::{
    sync::{mpsc::UnboundedSender, watch},
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};

use crate::{
    error::{ReservationError, ReservationStage},
    events::PortalEvent,
    models::CourseName,
    portal::Portal,
    reservation_page_scraper::{Candidate, HiddenForm, extract_candidates, is_enrolment_confirmed},
};

/// Longest single sleep while waiting for the deadline; bounds cancellation latency.
pub const WAIT_SLICE: Duration = Duration::from_secs(1);
/// How long [`ReservationWorker::stop`] waits for the task before aborting it.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(250);

// Selects the lab-support category on the first reservation page.
const SUPPORT_TYPE_FIELD: (&str, &str) = ("supporttype", "labo");
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub u64);

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Inactive,
    Active,
    Fulfilled,
    Failed,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Fulfilled | ReservationStatus::Failed)
    }

    /// Whether the user may (re)start a reservation in this state.
    pub fn can_start(self) -> bool {
        matches!(self, ReservationStatus::Inactive | ReservationStatus::Failed)
    }

    /// Label shown in the portal's language.
    pub fn label(self) -> &'static str {
        match self {
            ReservationStatus::Inactive => "Neaktivno",
            ReservationStatus::Active => "Aktivno",
            ReservationStatus::Fulfilled => "Uspjelo",
            ReservationStatus::Failed => "Neuspjelo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordSign {
    Boost,
    Penalty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub sign: KeywordSign,
    /// Lowercased, without the sign.
    pub text: String,
}

/// Signed free-text hints used to pick one card among several.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordFilter {
    keywords: Vec<Keyword>,
}

impl KeywordFilter {
    /// Parses `+G1, +10:00, -srijeda`. Tokens without a sign are ignored.
    pub fn parse(raw: &str) -> Self {
        Self::from_tokens(raw.split(','))
    }

    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let keywords = tokens
            .into_iter()
            .filter_map(|token| {
                let token = token.trim();
                let (sign, text) = if let Some(text) = token.strip_prefix('+') {
                    (KeywordSign::Boost, text)
                } else if let Some(text) = token.strip_prefix('-') {
                    (KeywordSign::Penalty, text)
                } else {
                    if !token.is_empty() {
                        debug!("ignoring unsigned keyword {token:?}");
                    }
                    return None;
                };
                Some(Keyword {
                    sign,
                    text: text.to_lowercase(),
                })
            })
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// +1 per boost found in `title`, -1 per penalty, case-insensitive.
    pub fn score(&self, title: &str) -> i32 {
        let title = title.to_lowercase();
        self.keywords
            .iter()
            .filter(|keyword| title.contains(&keyword.text))
            .map(|keyword| match keyword.sign {
                KeywordSign::Boost => 1,
                KeywordSign::Penalty => -1,
            })
            .sum()
    }
}

impl std::fmt::Display for KeywordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<String> = self
            .keywords
            .iter()
            .map(|keyword| match keyword.sign {
                KeywordSign::Boost => format!("+{}", keyword.text),
                KeywordSign::Penalty => format!("-{}", keyword.text),
            })
            .collect();
        write!(f, "{}", tokens.join(","))
    }
}

/// Highest scoring candidate that can actually be submitted; the first one wins ties.
pub fn select_best<'a>(
    candidates: &'a [Candidate],
    filter: &KeywordFilter,
) -> Option<(&'a Candidate, &'a HiddenForm, i32)> {
    let mut best: Option<(&Candidate, &HiddenForm, i32)> = None;
    for candidate in candidates {
        let Some(form) = &candidate.form else {
            continue;
        };
        let score = filter.score(&candidate.title);
        if best.is_none_or(|(_, _, best_score)| score > best_score) {
            best = Some((candidate, form, score));
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDefinition {
    pub course: CourseName,
    /// Local wall-clock time of day, fired today or at its next occurrence.
    pub target_time: NaiveTime,
    pub keywords: KeywordFilter,
    pub link: String,
}

impl ReservationDefinition {
    /// Builds a definition from the UI's text fields (`HH:mm`, comma separated keywords).
    pub fn parse(course: &str, target_time: &str, keywords: &str, link: &str) -> anyhow::Result<Self> {
        let target_time = NaiveTime::parse_from_str(target_time.trim(), "%H:%M")
            .with_context(|| format!("invalid reservation time {target_time:?}, expected HH:mm"))?;
        anyhow::ensure!(!link.trim().is_empty(), "course {course} has no reservation link");
        let keywords = KeywordFilter::parse(keywords);
        anyhow::ensure!(!keywords.is_empty(), "no +/- keywords given for {course}");
        Ok(Self {
            course: course.to_string(),
            target_time,
            keywords,
            link: link.trim().to_string(),
        })
    }
}

/// Time left until `target` next occurs after `now`. A target at or before
/// `now` means tomorrow.
pub fn wait_duration(target: NaiveTime, now: NaiveTime) -> Duration {
    let mut delta = target.signed_duration_since(now);
    if delta <= TimeDelta::zero() {
        delta += TimeDelta::seconds(SECONDS_PER_DAY);
    }
    delta.to_std().unwrap_or_default()
}

/// Runs the two-stage reservation form chain starting at `link`.
pub async fn run_reservation_flow<P: Portal>(
    portal: &P,
    link: &str,
    filter: &KeywordFilter,
) -> Result<(), ReservationError> {
    let form = vec![(
        SUPPORT_TYPE_FIELD.0.to_string(),
        SUPPORT_TYPE_FIELD.1.to_string(),
    )];
    let category_page = portal
        .post_form(&portal.resolve(link), &form)
        .await
        .map_err(request_error)?;

    let category = choose(&category_page, filter, ReservationStage::Category)?;
    let slot_page = portal
        .post_form(&portal.resolve(&category.action), &category.fields)
        .await
        .map_err(request_error)?;

    let slot = choose(&slot_page, filter, ReservationStage::TimeSlot)?;
    let final_page = portal
        .post_form(&portal.resolve(&slot.action), &slot.fields)
        .await
        .map_err(request_error)?;

    if is_enrolment_confirmed(&final_page) {
        Ok(())
    } else {
        Err(ReservationError::NotConfirmed)
    }
}

fn choose(
    html: &str,
    filter: &KeywordFilter,
    stage: ReservationStage,
) -> Result<HiddenForm, ReservationError> {
    let candidates = extract_candidates(html);
    if candidates.is_empty() {
        return Err(ReservationError::NoCandidates { stage });
    }
    let (candidate, form, score) =
        select_best(&candidates, filter).ok_or(ReservationError::NoUsableForm { stage })?;
    info!(
        "picked {stage} {:?} (score {score}) out of {}",
        candidate.title,
        candidates.len()
    );
    Ok(form.clone())
}

fn request_error(e: anyhow::Error) -> ReservationError {
    ReservationError::Request(format!("{e:#}"))
}

/// Everything a worker needs to drive one definition.
#[derive(Debug, Clone)]
pub struct ReservationJob {
    pub id: ReservationId,
    /// Distinguishes restarts of the same definition.
    pub attempt: u64,
    pub definition: ReservationDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task ended on its own, in this state.
    Finished(ReservationStatus),
    /// The task ignored the cancellation past the grace period and was aborted.
    Aborted,
}

/// Background task that waits for the deadline and then reserves.
#[derive(Debug)]
pub struct ReservationWorker {
    id: ReservationId,
    attempt: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<ReservationStatus>,
}

impl ReservationWorker {
    pub fn spawn<P: Portal>(
        portal: Arc<P>,
        job: ReservationJob,
        events: UnboundedSender<PortalEvent<P>>,
    ) -> Self {
        let (cancel, cancelled) = watch::channel(false);
        let (id, attempt) = (job.id, job.attempt);
        let task = tokio::spawn(drive(portal, job, cancelled, events));
        Self {
            id,
            attempt,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the worker to stop and waits for it, aborting it after
    /// [`STOP_GRACE_PERIOD`]. A worker past its deadline does not look at
    /// the cancellation until its requests complete, so it usually ends up aborted.
    pub async fn stop(mut self) -> StopOutcome {
        let _ = self.cancel.send(true);
        match timeout(STOP_GRACE_PERIOD, &mut self.task).await {
            Ok(Ok(status)) => StopOutcome::Finished(status),
            Ok(Err(e)) => {
                warn!("reservation worker {} ended abnormally: {e}", self.id);
                StopOutcome::Aborted
            }
            Err(_) => {
                warn!(
                    "reservation worker {} did not stop within {:?}, aborting",
                    self.id, STOP_GRACE_PERIOD
                );
                self.task.abort();
                StopOutcome::Aborted
            }
        }
    }
}

async fn drive<P: Portal>(
    portal: Arc<P>,
    job: ReservationJob,
    mut cancelled: watch::Receiver<bool>,
    events: UnboundedSender<PortalEvent<P>>,
) -> ReservationStatus {
    let emit_status = |status: ReservationStatus| {
        let _ = events.send(PortalEvent::ReservationStatusChanged {
            id: job.id,
            attempt: job.attempt,
            course: job.definition.course.clone(),
            time: job.definition.target_time,
            keyword: job.definition.keywords.to_string(),
            status,
        });
    };
    emit_status(ReservationStatus::Active);

    let wait = wait_duration(job.definition.target_time, Local::now().time());
    info!(
        "reservation {} for {} fires at {} (in {}s)",
        job.id,
        job.definition.course,
        job.definition.target_time.format("%H:%M"),
        wait.as_secs()
    );

    if !wait_for_deadline(Instant::now() + wait, &mut cancelled).await {
        info!("reservation {} cancelled before its deadline", job.id);
        emit_status(ReservationStatus::Inactive);
        return ReservationStatus::Inactive;
    }

    let result =
        run_reservation_flow(portal.as_ref(), &job.definition.link, &job.definition.keywords).await;
    let status = match &result {
        Ok(()) => {
            info!("reservation {} for {} fulfilled", job.id, job.definition.course);
            ReservationStatus::Fulfilled
        }
        Err(e) => {
            warn!("reservation {} for {} failed: {e}", job.id, job.definition.course);
            ReservationStatus::Failed
        }
    };
    emit_status(status);
    let _ = events.send(PortalEvent::ReservationResult {
        id: job.id,
        attempt: job.attempt,
        result,
    });
    status
}

/// Sleeps in [`WAIT_SLICE`] steps until `deadline`. False when cancelled first.
async fn wait_for_deadline(deadline: Instant, cancelled: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *cancelled.borrow() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let slice = (deadline - now).min(WAIT_SLICE);
        tokio::select! {
            _ = sleep(slice) => {}
            changed = cancelled.changed() => {
                // A dropped sender means nobody owns this worker any more.
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    error::{RegistryError, ReservationError},
    events::PortalEvent,
    portal::Portal,
    reservation::{
        ReservationDefinition, ReservationId, ReservationJob, ReservationStatus, ReservationWorker,
        StopOutcome,
    },
};

#[derive(Debug)]
pub struct ReservationEntry {
    pub id: ReservationId,
    pub definition: ReservationDefinition,
    pub status: ReservationStatus,
    /// Outcome of the last attempt that got past its deadline.
    pub last_result: Option<Result<(), ReservationError>>,
    attempt: u64,
    worker: Option<ReservationWorker>,
}

impl ReservationEntry {
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }
}

/// In-memory reservations of this run and the workers driving them.
///
/// Owned by the event consumer; workers report back through
/// [`ReservationRegistry::observe`].
#[derive(Debug, Default)]
pub struct ReservationRegistry {
    entries: Vec<ReservationEntry>,
    next_id: u64,
}

impl ReservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, definition: ReservationDefinition) -> ReservationId {
        let id = ReservationId(self.next_id);
        self.next_id += 1;
        self.entries.push(ReservationEntry {
            id,
            definition,
            status: ReservationStatus::Inactive,
            last_result: None,
            attempt: 0,
            worker: None,
        });
        id
    }

    /// Id of an existing entry with this definition, or a new one.
    pub fn find_or_add(&mut self, definition: ReservationDefinition) -> ReservationId {
        match self.find(&definition) {
            Some(id) => id,
            None => self.add(definition),
        }
    }

    pub fn find(&self, definition: &ReservationDefinition) -> Option<ReservationId> {
        self.entries
            .iter()
            .find(|entry| entry.definition == *definition)
            .map(|entry| entry.id)
    }

    pub fn get(&self, id: ReservationId) -> Option<&ReservationEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn status(&self, id: ReservationId) -> Option<ReservationStatus> {
        self.get(id).map(|entry| entry.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReservationEntry> {
        self.entries.iter()
    }

    fn entry_mut(&mut self, id: ReservationId) -> Result<&mut ReservationEntry, RegistryError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(RegistryError::UnknownReservation(id.0))
    }

    /// Spawns a fresh worker for `id`, fully stopping the previous one first.
    pub async fn start<P: Portal>(
        &mut self,
        id: ReservationId,
        portal: Arc<P>,
        events: UnboundedSender<PortalEvent<P>>,
    ) -> Result<(), RegistryError> {
        let entry = self.entry_mut(id)?;
        if entry.status == ReservationStatus::Fulfilled {
            return Err(RegistryError::AlreadyFulfilled(id.0));
        }
        if let Some(worker) = entry.worker.take() {
            debug!("replacing worker {} attempt {}", id, worker.attempt());
            // The old attempt may have finished before its report was observed.
            if let StopOutcome::Finished(status) = worker.stop().await {
                if status.is_terminal() {
                    entry.status = status;
                }
            }
            if entry.status == ReservationStatus::Fulfilled {
                return Err(RegistryError::AlreadyFulfilled(id.0));
            }
        }

        entry.attempt += 1;
        entry.status = ReservationStatus::Active;
        let job = ReservationJob {
            id,
            attempt: entry.attempt,
            definition: entry.definition.clone(),
        };
        info!("starting reservation {id} for {}", entry.definition.course);
        entry.worker = Some(ReservationWorker::spawn(portal, job, events));
        Ok(())
    }

    /// Cancels the worker of `id`. Terminal states are left untouched.
    pub async fn stop(&mut self, id: ReservationId) -> Result<(), RegistryError> {
        let entry = self.entry_mut(id)?;
        let Some(worker) = entry.worker.take() else {
            return Ok(());
        };
        match worker.stop().await {
            StopOutcome::Finished(status) if status.is_terminal() => entry.status = status,
            StopOutcome::Finished(_) | StopOutcome::Aborted => entry.status = ReservationStatus::Inactive,
        }
        info!("reservation {id} is now {:?}", entry.status);
        Ok(())
    }

    /// Stops and forgets `id`.
    pub async fn remove(&mut self, id: ReservationId) -> Result<ReservationDefinition, RegistryError> {
        self.stop(id).await?;
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(RegistryError::UnknownReservation(id.0))?;
        Ok(self.entries.remove(index).definition)
    }

    pub async fn stop_all(&mut self) {
        let ids: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.worker.is_some())
            .map(|entry| entry.id)
            .collect();
        for id in ids {
            let _ = self.stop(id).await;
        }
    }

    /// Applies a worker report. Reports from replaced or stopped attempts
    /// are ignored; returns whether the report was applied.
    pub fn observe<P>(&mut self, event: &PortalEvent<P>) -> bool {
        match event {
            PortalEvent::ReservationStatusChanged {
                id,
                attempt,
                status,
                ..
            } => {
                let Some(entry) = self.current_attempt(*id, *attempt) else {
                    return false;
                };
                entry.status = *status;
                if status.is_terminal() || *status == ReservationStatus::Inactive {
                    // The task has finished or is about to; nothing left to stop.
                    entry.worker = None;
                }
                true
            }
            PortalEvent::ReservationResult {
                id,
                attempt,
                result,
            } => {
                let Some(entry) = self.entries.iter_mut().find(|e| e.id == *id && e.attempt == *attempt) else {
                    return false;
                };
                entry.last_result = Some(result.clone());
                true
            }
            _ => false,
        }
    }

    // An attempt is current while its worker is still owned by the entry.
    fn current_attempt(&mut self, id: ReservationId, attempt: u64) -> Option<&mut ReservationEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id && entry.attempt == attempt && entry.worker.is_some())
    }
}

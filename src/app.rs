use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use log::{debug, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    cookies::clear_cookie_file,
    download::DownloadRequest,
    events::PortalEvent,
    home_page_scraper::extract_student_name,
    poller::{Poller, PollerHandle},
    portal::Portal,
    registry::ReservationRegistry,
    reservation::{ReservationDefinition, ReservationId},
};

/// What the UI layer can ask of the core.
#[derive(Debug, Clone)]
pub enum Command {
    StartPolling,
    StopPolling,
    StartReservation(ReservationDefinition),
    StopReservation(ReservationDefinition),
    DownloadFile(DownloadRequest),
    Logout,
}

/// Owns the background tasks of one logged-in run and the single event
/// stream they report on.
pub struct App<P: Portal> {
    portal: Arc<P>,
    poll_interval: Duration,
    cookie_file: PathBuf,
    events_tx: UnboundedSender<PortalEvent<P>>,
    events_rx: UnboundedReceiver<PortalEvent<P>>,
    poller: Option<PollerHandle>,
    registry: ReservationRegistry,
}

impl<P: Portal> App<P> {
    pub fn new(portal: Arc<P>, poll_interval: Duration, cookie_file: impl Into<PathBuf>) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            portal,
            poll_interval,
            cookie_file: cookie_file.into(),
            events_tx,
            events_rx,
            poller: None,
            registry: ReservationRegistry::new(),
        }
    }

    pub fn portal(&self) -> &Arc<P> {
        &self.portal
    }

    pub fn registry(&self) -> &ReservationRegistry {
        &self.registry
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }

    pub async fn handle(&mut self, command: Command) -> anyhow::Result<()> {
        debug!("handling {command:?}");
        match command {
            Command::StartPolling => self.start_polling(),
            Command::StopPolling => self.stop_polling().await,
            Command::StartReservation(definition) => {
                self.start_reservation(definition).await?;
            }
            Command::StopReservation(definition) => {
                let Some(id) = self.registry.find(&definition) else {
                    warn!("no reservation for {} to stop", definition.course);
                    return Ok(());
                };
                self.registry.stop(id).await?;
            }
            Command::DownloadFile(request) => self.download(request),
            Command::Logout => self.logout().await?,
        }
        Ok(())
    }

    /// Starts the poller unless one is already running.
    pub fn start_polling(&mut self) {
        if self.is_polling() {
            debug!("poller already running");
            return;
        }
        let poller = Poller::new(Arc::clone(&self.portal), self.poll_interval);
        self.poller = Some(poller.spawn(self.events_tx.clone()));
    }

    pub async fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
    }

    pub fn add_reservation(&mut self, definition: ReservationDefinition) -> ReservationId {
        self.registry.find_or_add(definition)
    }

    /// Registers `definition` if needed and (re)starts its worker.
    pub async fn start_reservation(&mut self, definition: ReservationDefinition) -> anyhow::Result<ReservationId> {
        let id = self.registry.find_or_add(definition);
        self.registry
            .start(id, Arc::clone(&self.portal), self.events_tx.clone())
            .await?;
        Ok(id)
    }

    pub async fn stop_reservation(&mut self, id: ReservationId) -> anyhow::Result<()> {
        self.registry.stop(id).await?;
        Ok(())
    }

    pub async fn remove_reservation(&mut self, id: ReservationId) -> anyhow::Result<ReservationDefinition> {
        Ok(self.registry.remove(id).await?)
    }

    /// Downloads in the background; the outcome arrives as
    /// [`PortalEvent::DownloadFinished`].
    pub fn download(&self, request: DownloadRequest) {
        let portal = Arc::clone(&self.portal);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = portal.download(&request).await.map_err(|e| e.to_string());
            match &result {
                Ok(report) => info!("downloaded {} bytes to {}", report.bytes, report.path.display()),
                Err(e) => warn!("download of {} failed: {e}", request.suggested_name),
            }
            let _ = events.send(PortalEvent::DownloadFinished { request, result });
        });
    }

    /// Next event from any background task. Reservation reports are applied
    /// to the registry before they are handed out.
    pub async fn next_event(&mut self) -> Option<PortalEvent<P>> {
        let event = self.events_rx.recv().await?;
        if self.registry.observe(&event) {
            debug!("registry updated from {event:?}");
        }
        Some(event)
    }

    /// Name shown on the portal's home page.
    pub async fn student_name(&self) -> anyhow::Result<String> {
        let home_url = self.portal.home_url()?;
        let html = self.portal.get(&home_url).await?;
        extract_student_name(&html).context("no student name on the portal home page")
    }

    /// Stops every task and forgets the stored login.
    pub async fn logout(&mut self) -> anyhow::Result<()> {
        self.shutdown().await;
        clear_cookie_file(&self.cookie_file)?;
        info!("logged out, cleared {}", self.cookie_file.display());
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.stop_polling().await;
        self.registry.stop_all().await;
    }
}

use std::sync::Arc;

use dotenv::dotenv;
use log::{LevelFilter, error, info, warn};
use portal_companion::{
    App, Command, LocalEventStore, PortalConfig, PortalEvent, Session, models::NotificationFeed,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = PortalConfig::new()?;
    let session = Session::load(&config)?;
    if !session.is_authenticated() {
        error!(
            "no session in {}, log in through the portal first",
            config.cookie_file.display()
        );
        return Ok(());
    }

    let mut calendar = LocalEventStore::load(&config.events_file)?;
    match calendar.import_ics(&config.timetable_file) {
        Ok(0) => {}
        Ok(_) => calendar.save()?,
        Err(e) => warn!("timetable not imported: {e:#}"),
    }
    info!(
        "{} calendar days loaded from {}",
        calendar.dates().count(),
        calendar.path().display()
    );

    let mut app = App::new(Arc::new(session), config.poll_interval(), &config.cookie_file);
    match app.student_name().await {
        Ok(name) => info!("logged in as {name}"),
        Err(e) => warn!("could not read the student name: {e:#}"),
    }

    app.handle(Command::StartPolling).await?;
    let mut feed = NotificationFeed::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = app.next_event() => {
                let Some(event) = event else { break };
                match event {
                    PortalEvent::NotificationAdded { course, notification } => {
                        info!("[{course}] {} ({})", notification.title, notification.time);
                        feed.push(notification);
                    }
                    PortalEvent::FileAdded { course, file } => {
                        info!("[{course}] new file {} in {}", file.name, file.section);
                    }
                    PortalEvent::ReservationLinksDiscovered { links, .. } => {
                        info!("{} courses take lab reservations", links.len());
                    }
                    PortalEvent::FirstLoadComplete => {
                        info!("first load complete, {} notifications", feed.len());
                        for notification in feed.latest(5) {
                            info!("  [{}] {}", notification.course, notification.title);
                        }
                    }
                    PortalEvent::NotLoggedIn => {
                        error!("session expired, log in again");
                        break;
                    }
                    other => info!("{other:?}"),
                }
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

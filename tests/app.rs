mod common;

use std::{fs, sync::Arc, time::Duration};

use chrono::{Local, NaiveTime, TimeDelta};
use common::*;
use portal_companion::{
    App, Command, PortalEvent,
    download::DownloadRequest,
    error::ReservationError,
    reservation::{KeywordFilter, ReservationDefinition, ReservationStatus},
};

fn definition(target_time: NaiveTime) -> ReservationDefinition {
    ReservationDefinition {
        course: "Baze podataka".to_string(),
        target_time,
        keywords: KeywordFilter::parse("+G1"),
        link: "rez?p=101".to_string(),
    }
}

/// A minute ago, so the worker has almost a full day to wait.
fn just_passed() -> NaiveTime {
    (Local::now() - TimeDelta::minutes(1)).time()
}

fn app(portal: &Arc<FakePortal>) -> App<FakePortal> {
    App::new(Arc::clone(portal), Duration::from_secs(60), "unused-cookies.json")
}

async fn next_status(app: &mut App<FakePortal>) -> (u64, ReservationStatus) {
    loop {
        match app.next_event().await.unwrap() {
            PortalEvent::ReservationStatusChanged { attempt, status, .. } => return (attempt, status),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn stopping_while_waiting_sends_no_requests() {
    let portal = Arc::new(FakePortal::logged_in());
    let mut app = app(&portal);
    let target = just_passed();

    let id = app.start_reservation(definition(target)).await.unwrap();
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Active));

    app.handle(Command::StopReservation(definition(target)))
        .await
        .unwrap();
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Inactive));
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Inactive));
    assert_eq!(portal.request_count(), 0);
}

#[tokio::test]
async fn restart_ignores_reports_of_the_replaced_attempt() {
    let portal = Arc::new(FakePortal::logged_in());
    let mut app = app(&portal);
    let target = just_passed();

    let id = app.start_reservation(definition(target)).await.unwrap();
    app.stop_reservation(id).await.unwrap();
    let again = app.start_reservation(definition(target)).await.unwrap();
    assert_eq!(id, again);
    assert_eq!(app.registry().iter().count(), 1);

    // Attempt 1: Active, Inactive. Attempt 2: Active.
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Inactive));
    assert_eq!(next_status(&mut app).await, (2, ReservationStatus::Active));
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Active));
    assert!(app.registry().get(id).unwrap().has_worker());

    app.shutdown().await;
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Inactive));
}

#[tokio::test(start_paused = true)]
async fn worker_reserves_when_the_time_comes() {
    let portal = Arc::new(FakePortal::logged_in());
    portal.set_post_page(
        "https://portal.test/rez?p=101",
        &page(&[card("Laboratorijske vježbe", Some("kat?id=1"), &[])]),
    );
    portal.set_post_page(
        "https://portal.test/kat?id=1",
        &page(&[card("G1 utorak 10:00", Some("upis?g=1"), &[("grupa", "1")])]),
    );
    portal.set_post_page("https://portal.test/upis?g=1", "Obriši me iz grupe");

    let mut app = app(&portal);
    let target = (Local::now() + TimeDelta::minutes(2)).time();
    let id = app.start_reservation(definition(target)).await.unwrap();

    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Fulfilled));
    let PortalEvent::ReservationResult { result, .. } = app.next_event().await.unwrap() else {
        panic!("expected the reservation result");
    };
    assert_eq!(result, Ok(()));

    let entry = app.registry().get(id).unwrap();
    assert_eq!(entry.status, ReservationStatus::Fulfilled);
    assert_eq!(entry.last_result, Some(Ok(())));
    assert!(!entry.has_worker());
    assert_eq!(portal.posted().len(), 3);

    // A fulfilled reservation stays fulfilled.
    assert!(app.start_reservation(definition(target)).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn success_is_kept_even_before_its_report_is_read() {
    let portal = Arc::new(FakePortal::logged_in());
    portal.set_post_page(
        "https://portal.test/rez?p=101",
        &page(&[card("Laboratorijske vježbe", Some("kat?id=1"), &[])]),
    );
    portal.set_post_page(
        "https://portal.test/kat?id=1",
        &page(&[card("G1 utorak 10:00", Some("upis?g=1"), &[("grupa", "1")])]),
    );
    portal.set_post_page("https://portal.test/upis?g=1", "Obriši me iz grupe");

    let mut app = app(&portal);
    let target = (Local::now() + TimeDelta::minutes(1)).time();
    let id = app.start_reservation(definition(target)).await.unwrap();

    // Let the worker fire without reading any event.
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(portal.posted().len(), 3);

    assert!(app.start_reservation(definition(target)).await.is_err());
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Fulfilled));
    assert!(!app.registry().get(id).unwrap().has_worker());

    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Fulfilled));
    let PortalEvent::ReservationResult { attempt, result, .. } = app.next_event().await.unwrap() else {
        panic!("expected the reservation result");
    };
    assert_eq!((attempt, result), (1, Ok(())));
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Fulfilled));
    assert_eq!(app.registry().get(id).unwrap().last_result, Some(Ok(())));
    assert_eq!(portal.posted().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_reservation_can_be_restarted() {
    let portal = Arc::new(FakePortal::logged_in());
    let mut app = app(&portal);
    let target = (Local::now() + TimeDelta::minutes(1)).time();
    let id = app.start_reservation(definition(target)).await.unwrap();

    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Failed));
    let PortalEvent::ReservationResult { result, .. } = app.next_event().await.unwrap() else {
        panic!("expected the reservation result");
    };
    assert!(matches!(result, Err(ReservationError::Request(_))));
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Failed));

    app.start_reservation(definition(target)).await.unwrap();
    assert_eq!(next_status(&mut app).await, (2, ReservationStatus::Active));
    app.shutdown().await;
}

#[tokio::test]
async fn added_reservations_wait_until_started_and_can_be_removed() {
    let portal = Arc::new(FakePortal::logged_in());
    let mut app = app(&portal);
    let target = just_passed();

    let id = app.add_reservation(definition(target));
    assert_eq!(app.add_reservation(definition(target)), id);
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Inactive));
    assert!(!app.registry().get(id).unwrap().has_worker());

    assert_eq!(app.start_reservation(definition(target)).await.unwrap(), id);
    assert_eq!(next_status(&mut app).await, (1, ReservationStatus::Active));

    let removed = app.remove_reservation(id).await.unwrap();
    assert_eq!(removed, definition(target));
    assert_eq!(app.registry().iter().count(), 0);
    assert!(app.remove_reservation(id).await.is_err());
    assert_eq!(portal.request_count(), 0);
}

#[tokio::test]
async fn downloaded_file_lands_in_the_chosen_directory() {
    let dir = tempfile::tempdir().unwrap();
    let portal = Arc::new(FakePortal::logged_in());
    portal.set_file("/1234/P01.pdf", b"%PDF-1.4 lecture");
    let mut app = app(&portal);

    app.handle(Command::DownloadFile(DownloadRequest {
        resource_path: "/1234/P01.pdf".to_string(),
        suggested_name: "P01.pdf".to_string(),
        destination: dir.path().to_path_buf(),
    }))
    .await
    .unwrap();

    let PortalEvent::DownloadFinished { result, .. } = app.next_event().await.unwrap() else {
        panic!("expected a download event");
    };
    let report = result.unwrap();
    assert_eq!(report.path, dir.path().join("P01.pdf"));
    assert_eq!(report.bytes, 16);
    assert_eq!(fs::read(&report.path).unwrap(), b"%PDF-1.4 lecture");
}

#[tokio::test]
async fn short_download_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let portal = Arc::new(FakePortal::logged_in());
    portal.set_file("/x.zip", b"abc");
    portal.announce_length(10);
    let mut app = app(&portal);

    app.handle(Command::DownloadFile(DownloadRequest {
        resource_path: "/x.zip".to_string(),
        suggested_name: "x.zip".to_string(),
        destination: dir.path().join("renamed.zip"),
    }))
    .await
    .unwrap();

    let PortalEvent::DownloadFinished { result, .. } = app.next_event().await.unwrap() else {
        panic!("expected a download event");
    };
    let message = result.unwrap_err();
    assert!(message.contains("10"), "{message}");
}

#[tokio::test]
async fn reads_the_student_name() {
    let portal = Arc::new(FakePortal::logged_in());
    assert_eq!(app(&portal).student_name().await.unwrap(), "Ivana");

    let logged_out = Arc::new(FakePortal::logged_out());
    assert!(app(&logged_out).student_name().await.is_err());
}

#[tokio::test]
async fn logout_stops_everything_and_clears_cookies() {
    let dir = tempfile::tempdir().unwrap();
    let cookie_file = dir.path().join("cookies.json");
    fs::write(&cookie_file, r#"[{"name":"MOJTVZ","value":"tok","domain":"moj.tvz.hr"}]"#).unwrap();

    let portal = Arc::new(FakePortal::logged_in());
    portal.set_page(COURSES_URL, &courses_page(&[]));
    let mut app = App::new(Arc::clone(&portal), Duration::from_secs(60), &cookie_file);

    app.handle(Command::StartPolling).await.unwrap();
    assert!(matches!(app.next_event().await, Some(PortalEvent::ReservationLinksDiscovered { .. })));
    assert!(matches!(app.next_event().await, Some(PortalEvent::FirstLoadComplete)));
    let id = app.start_reservation(definition(just_passed())).await.unwrap();

    app.handle(Command::Logout).await.unwrap();
    assert!(!app.is_polling());
    assert_eq!(app.registry().status(id), Some(ReservationStatus::Inactive));
    assert_eq!(fs::read_to_string(&cookie_file).unwrap().trim(), "[]");
}

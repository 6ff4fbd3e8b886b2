use std::sync::LazyLock;

use log::warn;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{
    models::{CourseSnapshot, FileRecord, NotificationCard},
    text_manipulators::{extract_clean_text, selector},
};

static CARD_HEADER: LazyLock<Selector> = LazyLock::new(|| selector("div.card-header"));
static CARD_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h5.card-title"));
static CARD_SUBTITLE: LazyLock<Selector> = LazyLock::new(|| selector("h6.card-subtitle"));
static FILE_SECTION: LazyLock<Selector> = LazyLock::new(|| selector("div.col-sm-3 div.shadow.p-3.mb-5.rounded"));
static SECTION_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h5"));
static FILE_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li.list-group-item"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static ICON: LazyLock<Selector> = LazyLock::new(|| selector("img[src]"));
static NAV_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.nav-link.mojtvzlink[onclick]"));

/// Marker in front of the resource path of every downloadable file.
pub const REPOSITORY_MARKER: &str = "skini/repoz";
const RESERVATION_ENTRY: &str = "Rezervacija labosa";

static NOTIFICATION_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,2}\.\d{1,2}\.\d{4} u \d{1,2}h").expect("valid notification time regex")
});
static DATE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("valid date tag regex"));

/// Runs every course page extractor over one page.
pub fn scrape_course_page(course: &str, html: &str) -> CourseSnapshot {
    let document = Html::parse_document(html);
    CourseSnapshot {
        name: course.to_string(),
        files: files_in(&document),
        notifications: notifications_in(&document),
        reservation_link: reservation_link_in(&document),
    }
}

pub fn extract_notifications(html: &str) -> Vec<NotificationCard> {
    notifications_in(&Html::parse_document(html))
}

pub fn extract_files(html: &str) -> Vec<FileRecord> {
    files_in(&Html::parse_document(html))
}

pub fn extract_reservation_link(html: &str) -> Option<String> {
    reservation_link_in(&Html::parse_document(html))
}

fn notifications_in(document: &Html) -> Vec<NotificationCard> {

    let mut notifications = vec![];
    for header in document.select(&CARD_HEADER) {
        let Some(title) = header.select(&CARD_TITLE).next() else {
            warn!("notification card without a title, skipping");
            continue;
        };
        let Some(subtitle) = header.select(&CARD_SUBTITLE).next() else {
            warn!("notification card without a subtitle, skipping");
            continue;
        };
        let Some(body) = header
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "div" && el.value().classes().any(|c| c == "card-body"))
        else {
            warn!("notification card without a body, skipping");
            continue;
        };

        let time_raw = extract_clean_text(subtitle);
        // Keep the raw subtitle when the pattern misses; parsing it later will drop the record.
        let time = NOTIFICATION_TIME
            .find(&time_raw)
            .map(|m| m.as_str().to_string())
            .unwrap_or(time_raw);

        notifications.push(NotificationCard {
            title: extract_clean_text(title),
            message: extract_clean_text(body),
            time,
        });
    }
    notifications
}

fn files_in(document: &Html) -> Vec<FileRecord> {

    let mut files = vec![];
    for container in document.select(&FILE_SECTION) {
        let Some(section) = container.select(&SECTION_HEADING).next() else {
            warn!("file section without a heading, skipping");
            continue;
        };
        let section = extract_clean_text(section);

        for item in container.select(&FILE_ITEM) {
            match file_from_item(item, &section) {
                Some(file) => files.push(file),
                None => warn!("file entry in section {section:?} does not have two links, skipping"),
            }
        }
    }
    files
}

/// A file entry is an icon link followed by the named download link.
fn file_from_item(item: ElementRef, section: &str) -> Option<FileRecord> {

    let mut anchors = item.select(&ANCHOR);
    let (icon, link) = (anchors.next()?, anchors.next()?);

    let kind = icon
        .select(&ICON)
        .next()
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| src.rsplit('/').next())
        .and_then(|file_name| file_name.split('.').next())
        .unwrap_or_default()
        .to_string();

    let href = link.value().attr("href").unwrap_or_default();
    let extension = match href.find(REPOSITORY_MARKER) {
        Some(at) => href[at + REPOSITORY_MARKER.len()..].to_string(),
        None => href.to_string(),
    };

    let text = extract_clean_text(link);
    let (name, date) = match DATE_TAG.captures(&text) {
        Some(caps) => (
            DATE_TAG.replace_all(&text, "").trim().to_string(),
            caps[1].trim().to_string(),
        ),
        None => (text.clone(), String::new()),
    };

    Some(FileRecord {
        name,
        extension,
        kind,
        date,
        section: section.to_string(),
    })
}

fn reservation_link_in(document: &Html) -> Option<String> {
    let anchor = document
        .select(&NAV_LINK)
        .find(|a| extract_clean_text(*a).contains(RESERVATION_ENTRY))?;
    let onclick = anchor.value().attr("onclick")?;
    let link = quoted_url(onclick);
    if link.is_none() {
        warn!("reservation entry has no quoted URL in {onclick:?}");
    }
    link
}

/// First single-quoted literal of a click handler such as `openLink('url', '_self')`.
fn quoted_url(onclick: &str) -> Option<String> {
    let start = onclick.find('\'')? + 1;
    let rest = &onclick[start..];
    let end = rest.find("',").or_else(|| rest.find('\''))?;
    Some(rest[..end].to_string()).filter(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COURSE_PAGE: &str = r##"
        <html><body>
        <ul class="nav">
          <a class="nav-link mojtvzlink" onclick="otvori('index.php?TVZ=tok&amp;link=rezervacija&amp;p=7', 'main')">
            Rezervacija labosa</a>
          <a class="nav-link mojtvzlink" onclick="otvori('index.php?link=ispiti', 'main')">Ispiti</a>
        </ul>
        <div class="card">
          <div class="card-header">
            <h5 class="card-title">Kolokvij</h5>
            <h6 class="card-subtitle">Objavljeno: 4.3.2025 u 9h (prof. Horvat)</h6>
          </div>
          <div class="card-body">Kolokvij se piše u   utorak.</div>
        </div>
        <div class="card">
          <div class="card-header">
            <h5 class="card-title">Bez datuma</h5>
            <h6 class="card-subtitle">jučer</h6>
          </div>
          <div class="card-body">Tekst</div>
        </div>
        <div class="card">
          <div class="card-header"><h6 class="card-subtitle">1.1.2025 u 8h</h6></div>
          <div class="card-body">No title</div>
        </div>
        <div class="row"><div class="col-sm-3">
          <div class="shadow p-3 mb-5 rounded">
            <h5>Predavanja</h5>
            <ul>
              <li class="list-group-item">
                <a href="#"><img src="/slike/ikone/pdf.png"></a>
                <a href="index.php?TVZ=tok&amp;link=skini/repoz/1234/P01.pdf">Uvod [05.03.25]</a>
              </li>
              <li class="list-group-item"><a href="#">only one link</a></li>
              <li class="list-group-item">
                <a href="#"><img src="/slike/ikone/link.gif"></a>
                <a href="https://example.org/materijali">Vanjski materijali</a>
              </li>
            </ul>
          </div>
        </div></div>
        </body></html>"##;

    #[test]
    fn notification_time_is_pulled_out_of_subtitle() {
        let notifications = extract_notifications(COURSE_PAGE);
        assert_eq!(notifications.len(), 2);
        assert_eq!(
            notifications[0],
            NotificationCard {
                title: "Kolokvij".to_string(),
                message: "Kolokvij se piše u utorak.".to_string(),
                time: "4.3.2025 u 9h".to_string(),
            }
        );
        // Pattern miss keeps the raw subtitle.
        assert_eq!(notifications[1].time, "jučer");
    }

    #[test]
    fn single_anchor_entry_is_skipped_but_siblings_survive() {
        let files = extract_files(COURSE_PAGE);
        assert_eq!(files.len(), 2);

        assert_eq!(files[0].name, "Uvod");
        assert_eq!(files[0].date, "05.03.25");
        assert_eq!(files[0].kind, "pdf");
        assert_eq!(files[0].extension, "/1234/P01.pdf");
        assert_eq!(files[0].section, "Predavanja");

        assert_eq!(files[1].kind, "link");
        assert_eq!(files[1].extension, "https://example.org/materijali");
        assert_eq!(files[1].date, "");
    }

    #[test]
    fn reservation_link_comes_from_click_handler() {
        assert_eq!(
            extract_reservation_link(COURSE_PAGE).as_deref(),
            Some("index.php?TVZ=tok&link=rezervacija&p=7")
        );
        assert_eq!(extract_reservation_link("<a class='nav-link'>Rezervacija labosa</a>"), None);
    }

    #[test]
    fn quoted_url_without_second_argument() {
        assert_eq!(quoted_url("go('a.php')").as_deref(), Some("a.php"));
        assert_eq!(quoted_url("go()"), None);
    }

    #[test]
    fn snapshot_bundles_all_extractors() {
        let snapshot = scrape_course_page("Baze podataka", COURSE_PAGE);
        assert_eq!(snapshot.name, "Baze podataka");
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.notifications.len(), 2);
        assert!(snapshot.reservation_link.is_some());
    }
}

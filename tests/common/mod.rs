#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::anyhow;
use futures::stream;
use portal_companion::{
    Portal,
    download::{DownloadReport, DownloadRequest, resolve_destination, write_stream},
    error::{DownloadError, SessionError},
};

pub const BASE: &str = "https://portal.test/";
pub const COURSES_URL: &str = "https://portal.test/predmeti";

/// Portal backed by canned pages, recording every request it serves.
#[derive(Default)]
pub struct FakePortal {
    token: Option<String>,
    pages: Mutex<HashMap<String, String>>,
    post_pages: Mutex<HashMap<String, String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    announced_length: Mutex<Option<u64>>,
    requests: AtomicUsize,
    posted: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakePortal {
    pub fn logged_in() -> Self {
        let portal = Self {
            token: Some("tok".to_string()),
            ..Self::default()
        };
        portal.set_page(&home_url(), HOME_PAGE);
        portal
    }

    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn set_page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }

    pub fn remove_page(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }

    pub fn set_post_page(&self, url: &str, html: &str) {
        self.post_pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }

    pub fn set_file(&self, resource_path: &str, bytes: &[u8]) {
        self.files.lock().unwrap().insert(resource_path.to_string(), bytes.to_vec());
    }

    /// Content-Length to claim for downloads instead of the real size.
    pub fn announce_length(&self, length: u64) {
        *self.announced_length.lock().unwrap() = Some(length);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.posted.lock().unwrap().clone()
    }
}

pub fn home_url() -> String {
    format!("{BASE}index.php?state=tok")
}

impl Portal for FakePortal {
    fn home_url(&self) -> Result<String, SessionError> {
        self.token
            .as_ref()
            .map(|_| home_url())
            .ok_or(SessionError::NotAuthenticated)
    }

    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http") {
            link.to_string()
        } else {
            format!("{BASE}{}", link.trim_start_matches('/'))
        }
    }

    async fn get(&self, url: &str) -> anyhow::Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {url}"))
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> anyhow::Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.posted.lock().unwrap().push((url.to_string(), form.to_vec()));
        self.post_pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for POST {url}"))
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, DownloadError> {
        self.home_url()?;
        self.requests.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(&request.resource_path)
            .cloned()
            .unwrap_or_default();
        let expected = self.announced_length.lock().unwrap().unwrap_or(bytes.len() as u64);

        let path = resolve_destination(&request.destination, &request.suggested_name, None);
        let body = stream::iter(vec![Ok::<_, std::io::Error>(bytes)]);
        let bytes = write_stream(body, &path, Some(expected)).await?;
        Ok(DownloadReport { path, bytes })
    }
}

pub const HOME_PAGE: &str = r#"
    <html><body>
      <a href="predmeti">Moji predmeti</a>
      <p class="card-text">Student Ivana Horvat</p>
    </body></html>"#;

pub fn courses_page(courses: &[(&str, &str)]) -> String {
    let cards: String = courses
        .iter()
        .map(|(studij, name)| {
            format!(
                r#"<div class="card"><div class="card-body">
                     <form action="index.php?studij={studij}"><a href="index.php?studij={studij}">{name}</a></form>
                   </div></div>"#
            )
        })
        .collect();
    format!("<html><body>{cards}</body></html>")
}

pub fn course_url(studij: &str) -> String {
    format!("{BASE}index.php?studij={studij}")
}

pub fn notification(title: &str, time: &str, body: &str) -> String {
    format!(
        r#"<div class="card">
             <div class="card-header">
               <h5 class="card-title">{title}</h5>
               <h6 class="card-subtitle">{time}</h6>
             </div>
             <div class="card-body">{body}</div>
           </div>"#
    )
}

pub fn file_section(section: &str, files: &[(&str, &str)]) -> String {
    let items: String = files
        .iter()
        .map(|(name, date)| {
            format!(
                r##"<li class="list-group-item">
                     <a href="#"><img src="/ikone/pdf.png"></a>
                     <a href="index.php?link=skini/repoz/{name}.pdf">{name} [{date}]</a>
                   </li>"##
            )
        })
        .collect();
    format!(
        r#"<div class="col-sm-3"><div class="shadow p-3 mb-5 rounded"><h5>{section}</h5><ul>{items}</ul></div></div>"#
    )
}

pub fn reservation_entry(link: &str) -> String {
    format!(r#"<a class="nav-link mojtvzlink" onclick="otvori('{link}', 'main')">Rezervacija labosa</a>"#)
}

pub fn course_page(parts: &[String]) -> String {
    format!("<html><body>{}</body></html>", parts.concat())
}

/// A reservation card; `action` of `None` renders a full card with no form.
pub fn card(title: &str, action: Option<&str>, hidden: &[(&str, &str)]) -> String {
    let form = action
        .map(|action| {
            let inputs: String = hidden
                .iter()
                .map(|(name, value)| format!(r#"<input type="hidden" name="{name}" value="{value}">"#))
                .collect();
            format!(r#"<form action="{action}" method="post">{inputs}<input type="submit" value="Upiši"></form>"#)
        })
        .unwrap_or_default();
    format!(r#"<div class="card card-default"><div class="col-5">{title}</div>{form}</div>"#)
}

pub fn page(cards: &[String]) -> String {
    format!("<html><body>{}</body></html>", cards.concat())
}

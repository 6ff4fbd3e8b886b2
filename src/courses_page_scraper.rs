use std::{collections::HashSet, sync::LazyLock};

use log::warn;
use regex::Regex;
use scraper::{Html, Selector};

use crate::{
    models::CourseLink,
    text_manipulators::{extract_text, selector, strip_parentheticals},
};

static CARD_FORM: LazyLock<Selector> = LazyLock::new(|| selector("div.card-body form"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

static STUDIJ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"studij=([^&]+)").expect("valid studij regex"));

/// Courses listed on the "my courses" page, in page order.
///
/// A course can be listed several times with different display text; the
/// `studij` parameter of the card's form identifies it, and the first card
/// for a given course wins.
pub fn extract_course_links(html: &str) -> Vec<CourseLink> {
    let document = Html::parse_document(html);

    let mut seen_studij = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut courses = vec![];

    for form in document.select(&CARD_FORM) {
        let Some(action) = form.value().attr("action") else {
            warn!("course card form without an action, skipping");
            continue;
        };
        let Some(studij) = STUDIJ.captures(action).map(|caps| caps[1].to_string()) else {
            continue;
        };

        let needle = format!("studij={studij}");
        let Some(anchor) = form.select(&LINK).find(|a| {
            a.value()
                .attr("href")
                .is_some_and(|href| href.contains(&needle))
        }) else {
            warn!("course card for studij={studij} has no course link, skipping");
            continue;
        };

        let name = strip_parentheticals(extract_text(anchor).trim());
        if name.is_empty() || seen_studij.contains(&studij) || seen_names.contains(&name) {
            continue;
        }

        seen_studij.insert(studij.clone());
        seen_names.insert(name.clone());
        courses.push(CourseLink {
            name,
            url: anchor.value().attr("href").unwrap_or_default().to_string(),
            studij,
        });
    }

    courses
}

use std::sync::LazyLock;

use log::warn;
use scraper::{ElementRef, Html, Selector};

use crate::text_manipulators::{extract_clean_text, selector};

static CARD: LazyLock<Selector> = LazyLock::new(|| selector("div.card.card-default"));
static CARD_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("div.col-5"));
static FORM: LazyLock<Selector> = LazyLock::new(|| selector("form[action]"));
static HIDDEN_INPUT: LazyLock<Selector> = LazyLock::new(|| selector(r#"input[type="hidden"]"#));

/// Shown on the slot page once the student is in the group ("remove me from the group").
const ENROLMENT_CONFIRMATION: &str = "obriši me iz grupe";

/// A category or time slot card on a reservation page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub form: Option<HiddenForm>,
}

/// The form behind a card: where to post and the hidden fields to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenForm {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

pub fn extract_candidates(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);

    let mut candidates = vec![];
    for card in document.select(&CARD) {
        let Some(title) = card.select(&CARD_TITLE).next() else {
            warn!("reservation card without a title column, skipping");
            continue;
        };
        candidates.push(Candidate {
            title: extract_clean_text(title),
            form: hidden_form(card),
        });
    }
    candidates
}

fn hidden_form(card: ElementRef) -> Option<HiddenForm> {

    let form = card.select(&FORM).next()?;
    let action = form.value().attr("action")?.trim().to_string();
    if action.is_empty() {
        return None;
    }
    let fields = form
        .select(&HIDDEN_INPUT)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    Some(HiddenForm { action, fields })
}

pub fn is_enrolment_confirmed(html: &str) -> bool {
    html.to_lowercase().contains(ENROLMENT_CONFIRMATION)
}

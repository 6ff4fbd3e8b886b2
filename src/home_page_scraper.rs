use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::text_manipulators::{extract_clean_text, selector};

static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static CARD_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("p.card-text"));

const MY_COURSES: &str = "Moji predmeti";

/// Link of the "my courses" navigation entry on the portal root page.
pub fn find_my_courses_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK)
        .find(|anchor| extract_clean_text(*anchor) == MY_COURSES)
        .and_then(|anchor| anchor.value().attr("href"))
        .map(str::to_string)
}

/// Name shown in the profile card, the word following `Student`.
pub fn extract_student_name(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let text = extract_clean_text(document.select(&CARD_TEXT).next()?);
    let mut words = text.split_whitespace();
    words.find(|word| *word == "Student")?;
    words.next().map(str::to_string)
}

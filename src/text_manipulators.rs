use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*?\)").expect("valid parenthetical regex"));

pub fn extract_text(node: ElementRef) -> String {
    node.text().collect::<String>()
}

/// Text content with runs of whitespace folded to single spaces.
pub fn extract_clean_text(node: ElementRef) -> String {
    node.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn strip_parentheticals(text: &str) -> String {
    PARENTHETICAL.replace_all(text, "").trim().to_string()
}

/// Builds a selector from a literal known to be valid.
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

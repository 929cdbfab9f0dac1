use crate::models::{EntityKind, Keyword, NamedEntity};

pub const UNKNOWN_TITLE: &str = "عنوان غير معروف";

const CANDIDATE_LINES: usize = 5;
const MIN_TITLE_WORDS: usize = 3;
const TITLE_CHARS: std::ops::RangeInclusive<usize> = 10..=100;
const TITLE_KEYWORDS: usize = 3;

/// Picks a human-readable title for a document.
///
/// A heading-like line near the top of the first page wins. Otherwise the
/// title is assembled from authors, leading keywords and the first
/// organization, and only when all of those are missing does it fall back
/// to [`UNKNOWN_TITLE`].
pub fn synthesize_title(
    first_page_raw: &str,
    keywords: &[Keyword],
    entities: &[NamedEntity],
) -> String {
    if let Some(line) = heading_line(first_page_raw) {
        return line;
    }

    let mut parts = Vec::new();

    let authors: Vec<&str> = entities
        .iter()
        .filter(|entity| entity.kind == EntityKind::Person)
        .map(|entity| entity.text.as_str())
        .collect();
    if !authors.is_empty() {
        parts.push(authors.join("، "));
    }

    let leading: Vec<&str> = keywords
        .iter()
        .take(TITLE_KEYWORDS)
        .map(|keyword| keyword.word.as_str())
        .collect();
    if !leading.is_empty() {
        parts.push(leading.join(" - "));
    }

    if let Some(organization) = entities
        .iter()
        .find(|entity| entity.kind == EntityKind::Organization)
    {
        parts.push(format!("إعداد {}", organization.text));
    }

    if parts.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        parts.join(" | ")
    }
}

fn heading_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(CANDIDATE_LINES)
        .find(|line| {
            line.split_whitespace().count() >= MIN_TITLE_WORDS
                && TITLE_CHARS.contains(&line.chars().count())
        })
        .map(str::to_string)
}

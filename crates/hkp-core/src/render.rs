//! Plain-text rendering for chat replies.

use std::time::Duration;

use crate::{
    errors::Error,
    favorites::{DeleteOutcome, FavoritePage, FavoriteRecord},
    sentence::Sentence,
};

const LIST_PREVIEW_CHARS: usize = 30;
const RULE: &str = "----------";

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// A freshly served sentence. `favorite_window` adds the "save it" hint.
pub fn format_sentence(sentence: &Sentence, favorite_window: Option<Duration>) -> String {
    let mut lines = vec![sentence.text.clone(), RULE.to_string()];
    lines.push(format!("Type: {}", sentence.category.display_name()));
    if let Some(author) = sentence.author.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Author: {author}"));
    }
    if let Some(source) = sentence.source.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Source: {source}"));
    }
    if let Some(window) = favorite_window {
        lines.push(String::new());
        lines.push(format!(
            "Send /fav within {}s to save this sentence.",
            window.as_secs()
        ));
    }
    lines.join("\n")
}

pub fn format_added(record: &FavoriteRecord) -> String {
    format!("Saved to favorites:\n{}", record.content)
}

pub fn format_page(owner: &str, page: &FavoritePage) -> String {
    if page.total == 0 {
        return "You have no favorites yet.".to_string();
    }

    let mut lines = vec![
        format!("Favorites of {owner}"),
        format!(
            "(page {}/{}, {} total)",
            page.page, page.total_pages, page.total
        ),
        RULE.to_string(),
    ];
    for (index, record) in &page.items {
        lines.push(format!(
            "{index}. {}",
            truncate_text(&record.content, LIST_PREVIEW_CHARS)
        ));
    }
    lines.push(RULE.to_string());
    lines.push("/view <n> shows details, /del <n> deletes, /favs <page> turns pages".to_string());
    lines.join("\n")
}

pub fn format_detail(record: &FavoriteRecord) -> String {
    let or_unknown = |v: &Option<String>| {
        v.as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    };
    [
        record.content.clone(),
        RULE.to_string(),
        format!("Type: {}", record.category_name),
        format!("Creator: {}", or_unknown(&record.creator)),
        format!("Source: {}", or_unknown(&record.source)),
        format!(
            "Saved at: {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        ),
    ]
    .join("\n")
}

pub fn format_delete(outcome: &DeleteOutcome) -> String {
    match outcome {
        DeleteOutcome::ConfirmRequired {
            index,
            record,
            expires_in,
        } => format!(
            "Delete favorite #{index}?\n{}\nSend /del {index} again within {}s to confirm.",
            truncate_text(&record.content, LIST_PREVIEW_CHARS),
            expires_in.as_secs()
        ),
        DeleteOutcome::Deleted { index, record } => format!(
            "Deleted favorite #{index}:\n{}",
            truncate_text(&record.content, LIST_PREVIEW_CHARS)
        ),
    }
}

/// Reply text for a failed request. Internal failures get a generic line.
pub fn format_error(err: &Error) -> String {
    match err {
        Error::RateLimited { remaining_secs } => {
            format!("Slow down, try again in {remaining_secs:.1}s.")
        }
        Error::NoRecentSentence => {
            "Nothing to save: fetch a sentence first, then send /fav shortly after.".to_string()
        }
        Error::AlreadyFavorited => "That sentence is already in your favorites.".to_string(),
        Error::QuotaExceeded { max } => {
            format!("Your favorites are full ({max} max). Delete some first.")
        }
        Error::InvalidPage { page, total_pages } => {
            format!("Page {page} does not exist (1-{total_pages}).")
        }
        Error::InvalidIndex { index, len: 0 } => {
            format!("No favorite #{index}: your list is empty.")
        }
        Error::InvalidIndex { index, len } => {
            format!("No favorite #{index} (1-{len}).")
        }
        Error::AccessDenied => "You are not allowed to use this command.".to_string(),
        Error::TransientFetch(_) | Error::MalformedResponse(_) => {
            "Could not fetch a sentence right now, please try again later.".to_string()
        }
        _ => "Something went wrong, please try again later.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::sentence::{sample, Category};

    fn record(content: &str) -> FavoriteRecord {
        FavoriteRecord {
            content: content.to_string(),
            uuid: "u".to_string(),
            sentence_id: Some(1),
            category_name: "Poetry".to_string(),
            source: Some("Some Book".to_string()),
            creator: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        let s = "一".repeat(31);
        let t = truncate_text(&s, 30);
        assert_eq!(t.chars().count(), 33);
        assert!(t.ends_with("..."));
        assert_eq!(truncate_text("short", 30), "short");
    }

    #[test]
    fn sentence_includes_source_and_hint() {
        let s = sample(3, Category::Poetry);
        let out = format_sentence(&s, Some(Duration::from_secs(30)));
        assert!(out.starts_with("sentence number 3\n"));
        assert!(out.contains("Source: Some Book"));
        assert!(!out.contains("Author:"));
        assert!(out.contains("within 30s"));
        assert!(!format_sentence(&s, None).contains("/fav"));
    }

    #[test]
    fn page_lists_indices_and_footer() {
        let page = FavoritePage {
            page: 2,
            total_pages: 3,
            total: 12,
            items: vec![(6, record(&"x".repeat(40))), (7, record("short"))],
        };
        let out = format_page("qq:alice", &page);
        assert!(out.contains("(page 2/3, 12 total)"));
        assert!(out.contains(&format!("6. {}...", "x".repeat(30))));
        assert!(out.contains("7. short"));
    }

    #[test]
    fn detail_falls_back_to_unknown() {
        let out = format_detail(&record("text"));
        assert!(out.contains("Creator: unknown"));
        assert!(out.contains("Saved at: 2024-05-01 08:30:00"));
    }

    #[test]
    fn errors_render_user_text() {
        assert_eq!(
            format_error(&Error::RateLimited { remaining_secs: 1.26 }),
            "Slow down, try again in 1.3s."
        );
        assert!(format_error(&Error::InvalidIndex { index: 2, len: 0 }).contains("empty"));
        assert!(!format_error(&Error::External("db exploded".into())).contains("db"));
    }
}

//! Conversation title derivation
//!
//! A conversation is titled after its first question. Titles are capped at
//! [`MAX_TITLE_LENGTH`] human-perceived characters (grapheme clusters).

use unicode_segmentation::UnicodeSegmentation;

pub const MAX_TITLE_LENGTH: usize = 60;
pub const ELLIPSIS: &str = "...";

/// Title of a conversation nobody has asked anything in yet
pub const DEFAULT_TITLE: &str = "New conversation";

/// Characters kept when a title has to be cut
const KEPT_ON_TRUNCATION: usize = MAX_TITLE_LENGTH - 3;

/// Cap a title at 60 characters; longer titles keep their first 57
/// characters followed by `...`.
pub fn truncate_title(title: &str) -> String {
    if title.graphemes(true).count() <= MAX_TITLE_LENGTH {
        return title.to_string();
    }

    let mut truncated: String = title.graphemes(true).take(KEPT_ON_TRUNCATION).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Title for a conversation whose first question is `question`.
///
/// Returns None for blank questions.
pub fn title_from_question(question: &str) -> Option<String> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(truncate_title(trimmed))
    }
}

/// Length of a title in the unit the cap is measured in
pub fn title_length(title: &str) -> usize {
    title.graphemes(true).count()
}

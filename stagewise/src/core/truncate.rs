//! Size limits for text handed between agents.

use std::borrow::Cow;

const TRUNCATION_NOTICE: &str = "\n\n[... middle section truncated to fit token limits ...]\n\n";

/// Keep the first three quarters and last quarter of `max_chars`, dropping the middle.
///
/// Counts characters, not bytes. Text within the limit is returned borrowed.
pub fn truncate_summary(text: &str, max_chars: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(text);
    }
    let keep_start = max_chars * 3 / 4;
    let keep_end = max_chars / 4;
    let head: String = text.chars().take(keep_start).collect();
    let tail: String = text.chars().skip(total - keep_end).collect();
    Cow::Owned(format!("{head}{TRUNCATION_NOTICE}{tail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_borrowed() {
        assert!(matches!(truncate_summary("short", 10), Cow::Borrowed("short")));
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(30), "b".repeat(40), "c".repeat(30));
        let truncated = truncate_summary(&text, 40);
        assert!(truncated.starts_with(&"a".repeat(30)));
        assert!(truncated.ends_with(&"c".repeat(10)));
        assert!(truncated.contains("middle section truncated"));
        assert!(!truncated.contains('b'));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(8);
        assert_eq!(truncate_summary(&text, 8), Cow::Borrowed(text.as_str()));
    }
}

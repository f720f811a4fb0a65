use regex::{NoExpand, Regex};

/// Replace one occurrence of `target` in `text` with `markup`.
///
/// Source text frequently contains the same word or phrase several times
/// (a link and a later bold instance of the same word, say), so a plain
/// first-occurrence replacement misfires often. Two attempts, in order:
///
/// 1. the first match of `target` bounded by word edges;
/// 2. failing that, the first raw occurrence, which may land inside a
///    larger word.
///
/// The fallback is deliberately lossy; callers tolerate occasional
/// misplacement on highly repetitive sentences. Empty `text` or `target`
/// is a no-op.
pub fn smart_replace(text: &str, target: &str, markup: &str) -> String {
    if text.is_empty() || target.is_empty() {
        return text.to_string();
    }

    let escaped = regex::escape(target);
    if let Ok(bounded) = Regex::new(&format!(r"\b{escaped}\b"))
        && bounded.is_match(text)
    {
        // NoExpand: markup is literal text, not a replacement template.
        return bounded.replace(text, NoExpand(markup)).into_owned();
    }

    text.replacen(target, markup, 1)
}

#[cfg(test)]
mod tests {
    use super::smart_replace;

    #[test]
    fn replaces_first_word_boundary_match_only() {
        assert_eq!(
            smart_replace("cat sat on the cat mat", "cat", "**cat**"),
            "**cat** sat on the cat mat"
        );
    }

    #[test]
    fn prefers_word_boundary_over_earlier_substring() {
        // "cat" occurs inside "concatenate" first; the whole word wins.
        assert_eq!(
            smart_replace("concatenate the cat", "cat", "**cat**"),
            "concatenate the **cat**"
        );
    }

    #[test]
    fn falls_back_to_raw_substring_replacement() {
        assert_eq!(
            smart_replace("several cats scattered", "cat", "**cat**"),
            "several **cat**s scattered"
        );
    }

    #[test]
    fn missing_target_leaves_text_unchanged() {
        assert_eq!(smart_replace("no match here", "dog", "**dog**"), "no match here");
    }

    #[test]
    fn empty_inputs_are_noops() {
        assert_eq!(smart_replace("", "cat", "**cat**"), "");
        assert_eq!(smart_replace("some text", "", "**x**"), "some text");
    }

    #[test]
    fn escapes_regex_metacharacters_in_target() {
        assert_eq!(
            smart_replace("price (USD) listed", "(USD)", "__(USD)__"),
            "price __(USD)__ listed"
        );
        assert_eq!(
            smart_replace("fun*2.Co runs", "fun*2.Co", "**fun*2.Co**"),
            "**fun*2.Co** runs"
        );
    }

    #[test]
    fn markup_dollar_signs_are_literal() {
        assert_eq!(
            smart_replace("pay here", "pay", "[$1 fee]($0)"),
            "[$1 fee]($0) here"
        );
    }
}

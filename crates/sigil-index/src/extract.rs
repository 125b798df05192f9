use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use sigil_core::constants::MIN_TERM_CHARS;

// Universal token patterns. Tokens matching any of these are indexed into
// the public layer regardless of length, and short search terms matching
// them are accepted.
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).unwrap());
static CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{3}\b").unwrap());
static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[\w-]+\.(?:pdf|docx?|xlsx?|pptx?|txt|csv|json|xml|png|jpe?g|gif|zip|gz)\b")
        .unwrap()
});
static ACRONYM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{3,5}\b").unwrap());
static CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]+-?[0-9][0-9A-Z-]*\b").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3,}\b").unwrap());

static ALL_PATTERNS: Lazy<Vec<&'static Lazy<Regex>>> = Lazy::new(|| {
    vec![
        &YEAR, &ISO_DATE, &EMAIL, &URL, &CURRENCY, &FILE_NAME, &ACRONYM, &CODE, &NUMBER,
    ]
});

/// Lowercase a term and strip surrounding whitespace.
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Pull every universal token out of free text, normalized to lowercase.
pub fn extract_universal_tokens(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for pattern in ALL_PATTERNS.iter() {
        for found in pattern.find_iter(text) {
            tokens.insert(found.as_str().to_lowercase());
        }
    }
    tokens
}

/// Validate a search term: terms of at least [`MIN_TERM_CHARS`] characters
/// are accepted unconditionally; shorter tokens only when they match a
/// universal pattern (currency code, short acronym, short code, digit
/// run). Blank input yields `None` — the caller returns an empty result
/// set without error.
pub fn validate_term(term: &str) -> Option<String> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() >= MIN_TERM_CHARS {
        return Some(trimmed.to_lowercase());
    }
    let upper = trimmed.to_uppercase();
    let whole = |re: &Regex| {
        re.find(&upper)
            .map(|m| m.start() == 0 && m.end() == upper.len())
            .unwrap_or(false)
    };
    if whole(&CURRENCY) || whole(&ACRONYM) || whole(&CODE) || whole(&NUMBER) {
        Some(trimmed.to_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_universal_token_families() {
        let text = "Paid 1500 EUR to jo.doe@example.org on 2024-03-01 \
                    (ref INV-2024, scan report.pdf, see https://ledger.example/a) NASA 2024";
        let tokens = extract_universal_tokens(text);

        assert!(tokens.contains("1500"));
        assert!(tokens.contains("eur"));
        assert!(tokens.contains("jo.doe@example.org"));
        assert!(tokens.contains("2024-03-01"));
        assert!(tokens.contains("inv-2024"));
        assert!(tokens.contains("report.pdf"));
        assert!(tokens.contains("https://ledger.example/a"));
        assert!(tokens.contains("nasa"));
        assert!(tokens.contains("2024"));
    }

    #[test]
    fn years_and_digit_runs() {
        assert!(extract_universal_tokens("year 1985").contains("1985"));
        // Outside the year range, four digits still surface as a digit run.
        assert!(extract_universal_tokens("room 3101").contains("3101"));
    }

    #[test]
    fn long_terms_always_valid() {
        assert_eq!(validate_term("  Diabetes "), Some("diabetes".into()));
    }

    #[test]
    fn short_terms_need_a_universal_shape() {
        assert_eq!(validate_term("USD"), Some("usd".into()));
        assert_eq!(validate_term("A-1"), Some("a-1".into()));
        assert_eq!(validate_term("123"), Some("123".into()));
        assert_eq!(validate_term("ab"), None);
        assert_eq!(validate_term("to"), None);
    }

    #[test]
    fn blank_terms_yield_none() {
        assert_eq!(validate_term(""), None);
        assert_eq!(validate_term("   "), None);
    }
}

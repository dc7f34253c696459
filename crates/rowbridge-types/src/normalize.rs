//! Text normalization for entity matching and staging cleanup.
//!
//! Matching keys are built from uppercased, accent-stripped,
//! whitespace-collapsed text; company names additionally drop French legal
//! forms and city names drop SAINT/CEDEX variants so that spelling noise
//! does not defeat deduplication.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static LEGAL_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(SASU?|SARU|SARL|SA|EURL|SCI|SNC|SELARL|SCP|ASSOCIATION|ASSOC|ETABLISSEMENT|ENTREPRISE|SOCIETE|GROUPE)\b",
    )
    .expect("valid legal form regex")
});

static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid non-word regex"));

static CITY_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d+E?\s*$|\s+CEDEX.*$").expect("valid city suffix regex"));

const SAINT_PREFIXES: &[&str] = &["SAINT-", "SAINT ", "ST-", "ST ", "SAINTE-", "SAINTE "];

/// Uppercases, strips accents, and collapses whitespace.
///
/// This is the base pass every migrated name/text field goes through during
/// transfer, so downstream matching never re-cleans staging data.
#[must_use]
pub fn clean_text(input: &str) -> String {
    let stripped: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    let upper = stripped.to_uppercase();
    upper.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

/// Normalizes a company name for comparison: base cleanup plus removal of
/// legal forms and punctuation.
#[must_use]
pub fn company_name_key(name: &str) -> String {
    let cleaned = clean_text(name);
    let without_forms = LEGAL_FORM_RE.replace_all(&cleaned, "");
    let without_punct = NON_WORD_RE.replace_all(&without_forms, " ");
    without_punct.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes a city name for comparison: base cleanup, SAINT→ST prefix
/// folding, district/CEDEX suffix removal, and dash flattening.
#[must_use]
pub fn city_name_key(name: &str) -> String {
    let mut normalized = clean_text(name);

    for prefix in SAINT_PREFIXES {
        if let Some(rest) = normalized.strip_prefix(prefix) {
            normalized = format!("ST{rest}");
            break;
        }
    }

    let normalized = CITY_SUFFIX_RE.replace_all(&normalized, "");
    let normalized = normalized.replace('-', " ");
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title-cases a first name: first letter of each hyphen- or
/// space-separated part uppercased, the rest lowered.
#[must_use]
pub fn first_name_case(name: &str) -> String {
    fn title_part(part: &str) -> String {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
            None => String::new(),
        }
    }

    name.trim()
        .split(' ')
        .filter(|p| !p.is_empty())
        .map(|word| {
            word.split('-')
                .map(title_part)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercases a last name.
#[must_use]
pub fn last_name_case(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Counts significant common words (longer than 2 characters) between two
/// normalized company names. This is the name component of the correction
/// match score.
#[must_use]
pub fn significant_common_words(expected_key: &str, actual_key: &str) -> usize {
    let expected: std::collections::HashSet<&str> = expected_key.split(' ').collect();
    actual_key
        .split(' ')
        .filter(|w| w.len() > 2 && expected.contains(w))
        .count()
}

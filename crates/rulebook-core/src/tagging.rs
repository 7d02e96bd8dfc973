//! Deterministic metadata post-pass over chunk text.
//!
//! Entity tags are uppercase, keywords lowercase; both are ordered sets so a
//! re-index of identical text yields identical metadata.
use std::collections::BTreeSet;

use crate::config::TaggingConfig;

const DURATION_UNITS: &[&str] = &["yaş", "gün", "hafta", "ay", "yıl"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTags {
    pub keywords: BTreeSet<String>,
    pub entity_tags: BTreeSet<String>,
    pub has_conditions: bool,
}

pub struct Tagger {
    entities: Vec<Vec<String>>,
    suffixes: Vec<String>,
    condition_phrases: Vec<String>,
}

impl Tagger {
    pub fn new(config: &TaggingConfig) -> Self {
        let entities = config
            .entities
            .iter()
            .map(|e| tokenize_lower(e))
            .filter(|toks| !toks.is_empty())
            .collect();
        let suffixes = config.entity_suffixes.iter().map(|s| s.to_lowercase()).filter(|s| !s.is_empty()).collect();
        let condition_phrases = config
            .condition_phrases
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entities, suffixes, condition_phrases }
    }

    pub fn tag(&self, text: &str) -> ChunkTags {
        let tokens = tokenize_lower(text);
        ChunkTags {
            keywords: extract_keywords(text, &tokens),
            entity_tags: self.entity_tags(&tokens),
            has_conditions: self.condition_markers(text) >= 2,
        }
    }

    fn entity_tags(&self, tokens: &[String]) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        for entity in &self.entities {
            if tokens.windows(entity.len()).any(|w| w == entity.as_slice()) {
                tags.insert(entity.join(" ").to_uppercase());
            }
        }
        for token in tokens {
            let len = token.chars().count();
            if self.suffixes.iter().any(|s| token.ends_with(s.as_str()) && len > s.chars().count() + 1) {
                tags.insert(token.to_uppercase());
            }
        }
        tags
    }

    /// List-marker lines plus occurrences of conditional phrases.
    pub fn condition_markers(&self, text: &str) -> usize {
        let list_lines = text.lines().filter(|l| is_list_marker(l)).count();
        let lower = text.to_lowercase();
        let phrases: usize = self.condition_phrases.iter().map(|p| lower.matches(p.as_str()).count()).sum();
        list_lines + phrases
    }
}

/// True for lines opening an enumerated, lettered or bulleted item:
/// `1.`, `12)`, `a.`, `b)`, `(c)`, `-`, `•`, `*`, `–` followed by whitespace.
pub fn is_list_marker(line: &str) -> bool {
    let t = line.trim_start();
    let chars: Vec<char> = t.chars().take(6).collect();
    let ws_at = |i: usize| chars.get(i).is_some_and(|c| c.is_whitespace());
    match chars.first() {
        Some('-' | '•' | '*' | '–') => ws_at(1),
        Some('(') => {
            let inner = chars.iter().skip(1).take_while(|c| c.is_alphanumeric()).count();
            (1..=2).contains(&inner) && chars.get(1 + inner) == Some(&')') && ws_at(2 + inner)
        }
        Some(c) if c.is_ascii_digit() => {
            let digits = chars.iter().take_while(|c| c.is_ascii_digit()).count();
            digits <= 2 && matches!(chars.get(digits), Some('.' | ')')) && ws_at(digits + 1)
        }
        Some(c) if c.is_alphabetic() => matches!(chars.get(1), Some('.' | ')')) && ws_at(2),
        _ => false,
    }
}

/// Lowercase alphanumeric tokens.
pub fn tokenize_lower(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn extract_keywords(text: &str, tokens: &[String]) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '-' || c == '_')) {
        let candidate = raw.trim_matches(|c| c == '.' || c == ',');
        if looks_like_icd_code(candidate) {
            keywords.insert(candidate.to_lowercase());
        }
    }
    for pair in tokens.windows(2) {
        if pair[0].chars().all(|c| c.is_ascii_digit()) && DURATION_UNITS.contains(&pair[1].as_str()) {
            keywords.insert(format!("{}{}", pair[0], pair[1]));
        }
    }
    keywords
}

/// `E78`, `G62.9`: an uppercase letter, two or more digits, optional `.digits`.
fn looks_like_icd_code(token: &str) -> bool {
    let mut chars = token.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }
    let rest = chars.as_str();
    let (int_part, frac) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    int_part.len() >= 2
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_markers() {
        for line in ["1. ilk", "12) on iki", "a) harf", "b. harf", "(c) parantez", "- tire", "• madde"] {
            assert!(is_list_marker(line), "{line}");
        }
        for line in ["4.2.28 Başlık", "20.00 – EK-4/D", "Metin", "123. çok basamak", "-bitişik"] {
            assert!(!is_list_marker(line), "{line}");
        }
    }

    #[test]
    fn icd_codes() {
        assert!(looks_like_icd_code("G62.9"));
        assert!(looks_like_icd_code("E78"));
        assert!(!looks_like_icd_code("E7"));
        assert!(!looks_like_icd_code("g62.9"));
        assert!(!looks_like_icd_code("G62."));
    }
}

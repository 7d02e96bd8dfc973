//! Detection of explicit references to auxiliary corpora in free text.
//!
//! A reference is the configured marker, the separator and one variant code,
//! e.g. `EK-4/D`. Matching is case-insensitive; codes are normalized to
//! uppercase and mapped to corpus ids through the configured variant table.
use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use rulebook_core::config::ReferenceConfig;
use rulebook_core::error::{Error, Result};
use rulebook_core::types::CorpusId;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CorpusReference {
    pub variant: String,
    pub corpus_id: CorpusId,
}

pub struct ReferenceDetector {
    pattern: Regex,
    variants: BTreeMap<String, CorpusId>,
}

impl ReferenceDetector {
    pub fn new(config: &ReferenceConfig) -> Result<Self> {
        let marker = config.marker.trim();
        let lead = if marker.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
        let source = format!(
            r"(?i){lead}{}{}([\p{{L}}\p{{N}}])\b",
            regex::escape(marker),
            regex::escape(&config.separator)
        );
        let pattern = Regex::new(&source).map_err(|e| Error::InvalidConfig(format!("reference pattern: {e}")))?;
        let variants = config
            .variants
            .iter()
            .map(|(code, corpus)| (code.to_uppercase(), CorpusId::new(corpus.clone())))
            .collect();
        Ok(Self { pattern, variants })
    }

    /// Mapped references in `text`; duplicates collapse, unmapped codes are
    /// logged and skipped.
    pub fn detect(&self, text: &str) -> BTreeSet<CorpusReference> {
        let mut found = BTreeSet::new();
        for caps in self.pattern.captures_iter(text) {
            let Some(code) = caps.get(1) else { continue };
            let variant = code.as_str().to_uppercase();
            match self.variants.get(&variant) {
                Some(corpus_id) => {
                    found.insert(CorpusReference { variant, corpus_id: corpus_id.clone() });
                }
                None => warn!(variant = %variant, matched = &caps[0], "reference to unmapped variant ignored"),
            }
        }
        found
    }

    pub fn has_reference(&self, text: &str) -> bool {
        !self.detect(text).is_empty()
    }

    /// Configured variant codes, uppercase and sorted.
    pub fn variants(&self) -> Vec<&str> {
        self.variants.keys().map(String::as_str).collect()
    }

    pub fn corpus_for(&self, variant: &str) -> Option<&CorpusId> {
        self.variants.get(&variant.to_uppercase())
    }
}

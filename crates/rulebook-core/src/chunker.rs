//! Section-aware paragraph chunker for sectioned regulatory text.
//!
//! A line whose first token is a hierarchical clause number (`4.2.28`,
//! `4.2.28.C`) opens a new section. Within a section, paragraphs are packed up
//! to `max_chars`; each new chunk re-includes the trailing `overlap_chars` of
//! its predecessor. Oversized paragraphs are split between sentences, runs of
//! list items are never split, and chunks under `min_chars` are folded into a
//! neighbour from the same section.
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{ChunkingConfig, TaggingConfig};
use crate::error::{Error, Result};
use crate::tagging::{is_list_marker, Tagger};
use crate::types::{Chunk, CorpusId};

pub struct Chunker {
    config: ChunkingConfig,
    tagger: Tagger,
}

struct Section {
    label: Option<String>,
    lines: Vec<String>,
}

/// Paragraph-level unit; `atomic` units are list runs that must stay whole.
struct Unit {
    text: String,
    atomic: bool,
}

/// Chunk text before tagging. `overlap_len` is the byte length of the
/// carried-over prefix (including its separator).
struct Draft {
    text: String,
    overlap_len: usize,
}

impl Draft {
    fn fresh_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig, tagging: &TaggingConfig) -> Self {
        Self { config, tagger: Tagger::new(tagging) }
    }

    /// Chunk `raw_text` into the ordered chunk set of `corpus_id`.
    ///
    /// Empty or unusable input yields an empty sequence; the failure is logged.
    pub fn index(&self, corpus_id: &CorpusId, raw_text: &str, source_document: &str) -> Vec<Chunk> {
        match self.try_index(corpus_id, raw_text, source_document) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(corpus = %corpus_id, source = source_document, error = %e, "indexing produced no chunks");
                Vec::new()
            }
        }
    }

    /// Like [`Chunker::index`] for raw bytes; non-UTF-8 input yields no chunks.
    pub fn index_bytes(&self, corpus_id: &CorpusId, raw: &[u8], source_document: &str) -> Vec<Chunk> {
        match std::str::from_utf8(raw) {
            Ok(text) => self.index(corpus_id, text, source_document),
            Err(e) => {
                let err = Error::Indexing(format!("{source_document}: not UTF-8 text ({e})"));
                warn!(corpus = %corpus_id, source = source_document, error = %err, "indexing produced no chunks");
                Vec::new()
            }
        }
    }

    /// Read and chunk a text file; unreadable files yield no chunks.
    pub fn index_file(&self, corpus_id: &CorpusId, path: &Path) -> Vec<Chunk> {
        let source = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());
        match std::fs::read(path) {
            Ok(bytes) => self.index_bytes(corpus_id, &bytes, &source),
            Err(e) => {
                warn!(corpus = %corpus_id, path = %path.display(), error = %e, "cannot read corpus file");
                Vec::new()
            }
        }
    }

    pub fn try_index(&self, corpus_id: &CorpusId, raw_text: &str, source_document: &str) -> Result<Vec<Chunk>> {
        let cleaned = clean_text(raw_text);
        if cleaned.is_empty() {
            return Err(Error::Indexing(format!("{source_document}: no text content")));
        }
        let sections = split_sections(&cleaned);
        let mut drafts: Vec<(Option<String>, String)> = Vec::new();
        for section in &sections {
            for text in self.chunk_section(&section.lines) {
                drafts.push((section.label.clone(), text));
            }
        }
        let total_chunks = drafts.len();
        let slug = corpus_id.slug();
        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (section, content))| {
                let tags = self.tagger.tag(&content);
                Chunk {
                    id: format!("{slug}:{chunk_index:04}"),
                    corpus_id: corpus_id.clone(),
                    source_document: source_document.to_string(),
                    section,
                    content,
                    keywords: tags.keywords,
                    entity_tags: tags.entity_tags,
                    has_conditions: tags.has_conditions,
                    chunk_index,
                    total_chunks,
                }
            })
            .collect();
        debug!(corpus = %corpus_id, sections = sections.len(), chunks = chunks.len(), "chunked corpus text");
        Ok(chunks)
    }

    fn chunk_section(&self, lines: &[String]) -> Vec<String> {
        let units = build_units(lines);
        let mut pieces: Vec<String> = Vec::new();
        for unit in units {
            if unit.atomic || char_len(&unit.text) <= self.config.max_chars {
                pieces.push(unit.text);
            } else {
                pieces.extend(pack_sentences(&unit.text, self.config.max_chars));
            }
        }
        let drafts = self.accumulate(pieces);
        merge_small(drafts, self.config.min_chars)
    }

    fn accumulate(&self, pieces: Vec<String>) -> Vec<Draft> {
        let max = self.config.max_chars;
        let mut drafts = Vec::new();
        let mut buf = String::new();
        let mut overlap_len = 0usize;
        let mut pending_overlap = String::new();
        let mut fresh = false;

        for piece in pieces {
            if fresh && char_len(&buf) + 2 + char_len(&piece) > max {
                pending_overlap = overlap_tail(&buf, self.config.overlap_chars).to_string();
                drafts.push(Draft { text: std::mem::take(&mut buf), overlap_len });
                overlap_len = 0;
                fresh = false;
            }
            if buf.is_empty() && !pending_overlap.is_empty() {
                buf = std::mem::take(&mut pending_overlap);
                buf.push_str("\n\n");
                overlap_len = buf.len();
            } else if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(&piece);
            fresh = true;
        }
        if fresh {
            drafts.push(Draft { text: buf, overlap_len });
        }
        drafts
    }
}

/// Normalizes line endings, trims lines, collapses blank runs and drops
/// page-marker lines such as `=== Sayfa 12 ===`.
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = true;
    for raw in normalized.split('\n') {
        let line = raw.trim();
        if is_page_marker(line) {
            continue;
        }
        if line.is_empty() {
            if !previous_blank {
                out.push("");
            }
            previous_blank = true;
            continue;
        }
        out.push(line);
        previous_blank = false;
    }
    out.join("\n").trim().to_string()
}

fn is_page_marker(line: &str) -> bool {
    let Some(inner) = line.strip_prefix("===").and_then(|l| l.strip_suffix("===")) else {
        return false;
    };
    inner.split_whitespace().last().is_some_and(|t| t.chars().all(|c| c.is_ascii_digit()))
}

/// Normalized clause number when the line's first token is one: at least three
/// dot-separated numeric parts, optionally followed by alphanumeric parts.
///
/// Numeric parts have one or two digits and no zero padding, so dates
/// (`15.03.2021`) and amounts (`1.250.000`) never open a section.
pub fn section_token(line: &str) -> Option<String> {
    let first = line.split_whitespace().next()?;
    let token = first.trim_end_matches([':', ';', ',']).trim_end_matches('.');
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 3 {
        return None;
    }
    let numeric_ok = parts[..3].iter().all(|p| is_clause_number(p));
    let rest_ok = parts[3..].iter().all(|p| !p.is_empty() && p.chars().all(char::is_alphanumeric));
    (numeric_ok && rest_ok).then(|| parts.join("."))
}

fn is_clause_number(part: &str) -> bool {
    matches!(part.len(), 1 | 2) && part.chars().all(|c| c.is_ascii_digit()) && !(part.len() == 2 && part.starts_with('0'))
}

fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section { label: None, lines: Vec::new() };
    for line in text.lines() {
        if let Some(label) = section_token(line) {
            if current.lines.iter().any(|l| !l.is_empty()) {
                sections.push(current);
            }
            current = Section { label: Some(label), lines: vec![line.to_string()] };
        } else {
            current.lines.push(line.to_string());
        }
    }
    if current.lines.iter().any(|l| !l.is_empty()) {
        sections.push(current);
    }
    sections
}

/// Groups lines into paragraphs and fuses list runs holding two or more
/// list-marker lines into one atomic unit. A run starts at any paragraph with a
/// marker line and extends over the following paragraphs that open with one.
fn build_units(lines: &[String]) -> Vec<Unit> {
    let paragraphs: Vec<Vec<&str>> = lines
        .split(|l| l.is_empty())
        .filter(|p| !p.is_empty())
        .map(|p| p.iter().map(String::as_str).collect())
        .collect();

    let mut units = Vec::new();
    let mut run: Vec<String> = Vec::new();
    let mut run_markers = 0usize;
    let flush = |run: &mut Vec<String>, markers: &mut usize, units: &mut Vec<Unit>| {
        if run.is_empty() {
            return;
        }
        let atomic = *markers >= 2;
        if atomic {
            units.push(Unit { text: run.join("\n\n"), atomic });
        } else {
            units.extend(run.drain(..).map(|text| Unit { text, atomic: false }));
        }
        run.clear();
        *markers = 0;
    };

    for para in paragraphs {
        let markers = para.iter().filter(|l| is_list_marker(l)).count();
        let text = para.join("\n");
        if markers == 0 {
            flush(&mut run, &mut run_markers, &mut units);
            units.push(Unit { text, atomic: false });
            continue;
        }
        // A paragraph that opens with an item continues the open run; one with
        // an intro line before its first item starts a new run.
        if run.is_empty() || !para.first().is_some_and(|l| is_list_marker(l)) {
            flush(&mut run, &mut run_markers, &mut units);
        }
        run.push(text);
        run_markers += markers;
    }
    flush(&mut run, &mut run_markers, &mut units);
    units
}

/// Splits between sentences, never inside one: a boundary is `.`, `?` or `!`
/// followed by whitespace, except a `.` closing a bare number (`3.`).
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();
    while let Some((pos, c)) = iter.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        let at_boundary = iter.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if !at_boundary {
            continue;
        }
        let end = pos + c.len_utf8();
        if c == '.' && ends_with_number(&text[start..pos]) {
            continue;
        }
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn ends_with_number(segment: &str) -> bool {
    segment
        .split_whitespace()
        .last()
        .is_some_and(|t| t.chars().all(|c| c.is_ascii_digit()))
}

/// Greedily packs whole sentences into pieces of at most `max` characters; a
/// single sentence longer than `max` becomes its own piece.
fn pack_sentences(text: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(text) {
        if !current.is_empty() && char_len(&current) + 1 + char_len(sentence) > max {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// The last `n` characters of `text`, advanced to the next word boundary so the
/// window never starts mid-word or mid-number.
fn overlap_tail(text: &str, n: usize) -> &str {
    let len = char_len(text);
    if n == 0 || len == 0 {
        return "";
    }
    if n >= len {
        return text.trim();
    }
    let start = text.char_indices().nth(len - n).map_or(text.len(), |(i, _)| i);
    let starts_clean = text[..start].chars().next_back().is_some_and(char::is_whitespace);
    let window = &text[start..];
    if starts_clean {
        return window.trim();
    }
    match window.find(char::is_whitespace) {
        Some(ws) => window[ws..].trim(),
        None => "",
    }
}

/// Folds chunks shorter than `min` into the previous chunk of the same
/// section, or into the next one when there is no previous chunk.
fn merge_small(drafts: Vec<Draft>, min: usize) -> Vec<String> {
    let mut out: Vec<Draft> = Vec::new();
    let mut carry: Option<Draft> = None;
    for mut draft in drafts {
        let small = char_len(&draft.text) < min;
        if let Some(c) = carry.take() {
            let text = format!("{}\n\n{}", c.text, draft.fresh_text());
            draft = Draft { text, overlap_len: c.overlap_len };
        }
        if small && char_len(&draft.text) < min {
            if let Some(prev) = out.last_mut() {
                prev.text.push_str("\n\n");
                prev.text.push_str(draft.fresh_text());
            } else {
                carry = Some(draft);
            }
            continue;
        }
        out.push(draft);
    }
    if let Some(c) = carry {
        out.push(c);
    }
    out.into_iter().map(|d| d.text).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

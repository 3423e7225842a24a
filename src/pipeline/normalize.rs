//! Normalisation: deterministic cleanup of pasted source before anything runs.
//!
//! ## Why is normalisation necessary?
//!
//! Code pasted from a chat assistant rarely arrives clean. It is often still
//! wrapped in ` ```python … ``` ` fences, and carries citation markers such as
//! `[cite_start]` or `[cite: 12]` glued onto lines. Both are syntax errors the
//! user never meant to write. This module strips them, then optionally
//! rewrites the literal font size in recognised drawing-library calls so the
//! "font size" field of a request actually takes effect.
//!
//! ## Rule Order
//!
//! Fences first, then citations, then font-size rewriting (which must see the
//! calls without citation junk inside them), then a final trim. Every rule is
//! a pure `&str → String` pass.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// The user's input, exactly as given. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBuffer {
    text: String,
    font_size: Option<u32>,
}

impl SourceBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_size: None,
        }
    }

    /// Attach a font size; `0` means "unset".
    pub fn with_font_size(mut self, size: Option<u32>) -> Self {
        self.font_size = size.filter(|s| *s > 0);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn font_size(&self) -> Option<u32> {
        self.font_size
    }

    pub fn normalize(&self) -> NormalizedCode {
        NormalizedCode(normalize(&self.text, self.font_size))
    }
}

/// Source after fence/citation stripping and font-size substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedCode(String);

impl NormalizedCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for NormalizedCode {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Apply all normalisation rules.
///
/// Rules (applied in order):
/// 1. Remove markdown fences (` ```python ` openers and bare ` ``` ` closers)
/// 2. Remove citation markers: `[cite_start]`, `[cite_end]`, `[cite: N]`
/// 3. When `font_size` is a positive number, rewrite the size literal in
///    `.set_font_size(N)`, `.set_font(…, size=N)`, `.set_font("Face", N)`
///    and `.setFont("Face", N)`
/// 4. Trim surrounding whitespace
pub fn normalize(raw: &str, font_size: Option<u32>) -> String {
    let s = strip_fences(raw);
    let s = strip_citations(&s);
    let s = match font_size.filter(|size| *size > 0) {
        Some(size) => rewrite_font_sizes(&s, size),
        None => s,
    };
    s.trim().to_string()
}

// ── Rule 1: Strip markdown fences ────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```python|```").unwrap());

fn strip_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").into_owned()
}

// ── Rule 2: Strip citation markers ───────────────────────────────────────────

static RE_CITE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[cite_start\]").unwrap());
static RE_CITE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[cite: \d+\]").unwrap());
static RE_CITE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[cite_end\]").unwrap());

fn strip_citations(input: &str) -> String {
    let s = RE_CITE_START.replace_all(input, "");
    let s = RE_CITE_REF.replace_all(&s, "");
    RE_CITE_END.replace_all(&s, "").into_owned()
}

// ── Rule 3: Font-size substitution ───────────────────────────────────────────
//
// Each pattern captures everything before the size literal (and, for the
// positional form, the closing paren after it) so only the digits change.
// The call names are distinct, so the rules never fight over a line.

/// `pdf.set_font_size(12)`
static RE_SET_FONT_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\bset_font_size\s*\()\s*\d+").unwrap());

/// `pdf.set_font("Arial", size=12)`
static RE_SET_FONT_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\bset_font\s*\([^)]*?size\s*=\s*)\d+").unwrap());

/// `pdf.set_font("Arial", 12)` / `pdf.set_font("Arial", "B", 12)`
static RE_SET_FONT_POSITIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\bset_font\s*\((?:[^()=]+,)\s*)\d+(\s*\))").unwrap());

/// `canvas.setFont("Helvetica", 12)`
static RE_SET_FONT_CAMEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\bsetFont\s*\([^,]+,\s*)\d+").unwrap());

fn rewrite_font_sizes(input: &str, size: u32) -> String {
    let lead = format!("${{1}}{size}");
    let lead_and_tail = format!("${{1}}{size}${{2}}");
    let s = RE_SET_FONT_SIZE.replace_all(input, lead.as_str());
    let s = RE_SET_FONT_KEYWORD.replace_all(&s, lead.as_str());
    let s = RE_SET_FONT_POSITIONAL.replace_all(&s, lead_and_tail.as_str());
    RE_SET_FONT_CAMEL.replace_all(&s, lead.as_str()).into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

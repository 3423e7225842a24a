//! Diagnosis: turn a compile failure or an escaped exception into guidance.
//!
//! The runtime tells us *that* something failed and, usually, where. This
//! module adds the *why* and the *what now*: it looks at the offending line
//! for the handful of mistakes pasted code makes over and over (missing
//! colons, `=` for `==`, unbalanced delimiters, Python 2 `print`), and falls
//! back to matching the runtime's own message when no line rule applies.
//!
//! These are pattern heuristics, not a parser. They can misfire on unusual
//! code; the only promise is that producing a [`Diagnosis`] never fails.

use crate::messages;
use crate::sandbox::{
    CompileFailure, CompileFailureKind, Runtime, RuntimeException, SANDBOX_ERROR_TYPE,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ── Types ────────────────────────────────────────────────────────────────────

/// Error category of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Syntax,
    Indentation,
    Name,
    Type,
    Attribute,
    Import,
    Index,
    Key,
    Timeout,
    NoOutput,
    Other,
    System,
}

/// Coarse failure taxonomy: where in the pipeline things went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Detected before execution.
    Compile,
    /// Raised (or hung) while executing.
    Runtime,
    /// Ran fine but produced nothing to deliver.
    Resolution,
    /// The pipeline itself failed.
    System,
}

impl ErrorKind {
    /// Map an exception class name onto a kind.
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "SyntaxError" => ErrorKind::Syntax,
            "IndentationError" | "TabError" => ErrorKind::Indentation,
            "NameError" | "UnboundLocalError" => ErrorKind::Name,
            "TypeError" => ErrorKind::Type,
            "AttributeError" => ErrorKind::Attribute,
            "ImportError" | "ModuleNotFoundError" => ErrorKind::Import,
            "IndexError" => ErrorKind::Index,
            "KeyError" => ErrorKind::Key,
            SANDBOX_ERROR_TYPE => ErrorKind::System,
            _ => ErrorKind::Other,
        }
    }

    pub fn category(self) -> FailureCategory {
        match self {
            ErrorKind::Syntax | ErrorKind::Indentation => FailureCategory::Compile,
            ErrorKind::Name
            | ErrorKind::Type
            | ErrorKind::Attribute
            | ErrorKind::Import
            | ErrorKind::Index
            | ErrorKind::Key
            | ErrorKind::Timeout
            | ErrorKind::Other => FailureCategory::Runtime,
            ErrorKind::NoOutput => FailureCategory::Resolution,
            ErrorKind::System => FailureCategory::System,
        }
    }

    pub fn is_compile(self) -> bool {
        self.category() == FailureCategory::Compile
    }
}

/// Structured description of a failure plus human-readable guidance.
///
/// Serialises with the field names the presentation layer expects:
/// `type`, `line`, `message`, `explanation`, `suggestion`, `proposedFix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    /// Exception-style name, e.g. `SyntaxError`.
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: ErrorKind,
    /// 1-based line in the user's buffer, when known.
    pub line: Option<usize>,
    pub message: String,
    pub explanation: String,
    pub suggestion: String,
    /// Whole rewritten buffer offered as a one-click fix.
    pub proposed_fix: Option<String>,
}

impl Diagnosis {
    fn new(
        kind: ErrorKind,
        type_name: impl Into<String>,
        message: impl Into<String>,
        line: Option<usize>,
        explanation: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            line,
            message: message.into(),
            explanation: explanation.into(),
            suggestion: suggestion.into(),
            proposed_fix: None,
        }
    }

    pub fn category(&self) -> FailureCategory {
        self.kind.category()
    }

    /// Execution exceeded the wall-clock limit.
    pub fn timeout(secs: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            "TimeoutError",
            messages::timeout_message(secs),
            None,
            messages::TIMEOUT_EXPLANATION,
            messages::TIMEOUT_SUGGESTION,
        )
    }

    /// Execution succeeded but no artifact could be produced.
    pub fn no_output() -> Self {
        Self::new(
            ErrorKind::NoOutput,
            "NoOutputError",
            messages::NO_OUTPUT_MESSAGE,
            None,
            messages::NO_OUTPUT_EXPLANATION,
            messages::NO_OUTPUT_SUGGESTION,
        )
    }

    /// The pipeline itself failed.
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::System,
            "SystemError",
            message,
            None,
            messages::SYSTEM_EXPLANATION,
            messages::SYSTEM_SUGGESTION,
        )
    }

    pub fn with_proposed_fix(mut self, fix: impl Into<String>) -> Self {
        self.proposed_fix = Some(fix.into());
        self
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {}): {}", self.type_name, line, self.message),
            None => write!(f, "{}: {}", self.type_name, self.message),
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Compile `code` without running it; `None` when it compiles.
pub async fn diagnose(runtime: &dyn Runtime, code: &str) -> Option<Diagnosis> {
    match runtime.compile(code).await {
        Ok(()) => None,
        Err(failure) => {
            let diagnosis = diagnose_compile_failure(code, &failure);
            debug!("compile failed: {}", diagnosis);
            Some(diagnosis)
        }
    }
}

/// Classify a compile failure.
///
/// Line rules are tried top to bottom on the offending line; the first match
/// wins. Without a line, or when no rule matches, the runtime's message is
/// matched against known phrasings.
pub fn diagnose_compile_failure(code: &str, failure: &CompileFailure) -> Diagnosis {
    let (kind, type_name) = match failure.kind {
        CompileFailureKind::Syntax => (ErrorKind::Syntax, "SyntaxError"),
        CompileFailureKind::Indentation => (ErrorKind::Indentation, "IndentationError"),
    };
    let offending = failure.line.and_then(|n| line_at(code, n));
    let (explanation, suggestion) = offending
        .and_then(classify_line)
        .unwrap_or_else(|| classify_message(&failure.message, failure.kind));
    Diagnosis::new(
        kind,
        type_name,
        failure.message.clone(),
        failure.line,
        explanation,
        suggestion,
    )
}

/// Classify an exception that escaped user code.
pub fn diagnose_exception(code: &str, exc: &RuntimeException) -> Diagnosis {
    let kind = ErrorKind::from_type_name(&exc.type_name);
    let line = exc.user_line();

    if kind.is_compile() {
        let failure = CompileFailure {
            kind: if kind == ErrorKind::Indentation {
                CompileFailureKind::Indentation
            } else {
                CompileFailureKind::Syntax
            },
            message: exc.message.clone(),
            line,
        };
        let mut diagnosis = diagnose_compile_failure(code, &failure);
        diagnosis.type_name = exc.type_name.clone();
        return diagnosis;
    }

    let msg = exc.message.as_str();
    let (explanation, suggestion) = match kind {
        ErrorKind::Name => {
            let name = quoted(msg, 1).unwrap_or(messages::UNKNOWN_IDENTIFIER);
            (
                messages::name_error_explanation(name),
                messages::name_error_suggestion(name),
            )
        }
        ErrorKind::Attribute => {
            let owner = quoted(msg, 1).unwrap_or("This object");
            let attribute = quoted(msg, 3).unwrap_or(messages::UNKNOWN_IDENTIFIER);
            (
                messages::attribute_error_explanation(owner, attribute),
                messages::attribute_error_suggestion(attribute),
            )
        }
        ErrorKind::Import => {
            let position = if msg.starts_with("cannot import name") { 3 } else { 1 };
            let module = quoted(msg, position).unwrap_or(messages::UNKNOWN_IDENTIFIER);
            (
                messages::import_error_explanation(module),
                messages::IMPORT_ERROR_SUGGESTION.to_string(),
            )
        }
        ErrorKind::Type => (
            messages::TYPE_ERROR_EXPLANATION.to_string(),
            messages::TYPE_ERROR_SUGGESTION.to_string(),
        ),
        ErrorKind::Index => (
            messages::INDEX_ERROR_EXPLANATION.to_string(),
            messages::INDEX_ERROR_SUGGESTION.to_string(),
        ),
        ErrorKind::Key => (
            messages::KEY_ERROR_EXPLANATION.to_string(),
            messages::KEY_ERROR_SUGGESTION.to_string(),
        ),
        ErrorKind::System => (
            messages::SYSTEM_EXPLANATION.to_string(),
            messages::SYSTEM_SUGGESTION.to_string(),
        ),
        _ => (
            messages::GENERIC_EXPLANATION.to_string(),
            messages::GENERIC_SUGGESTION.to_string(),
        ),
    };

    Diagnosis::new(
        kind,
        exc.type_name.clone(),
        exc.message.clone(),
        line,
        explanation,
        suggestion,
    )
}

// ── Line rules ───────────────────────────────────────────────────────────────

/// Keywords that open a block and need a trailing colon.
pub(crate) static RE_BLOCK_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(if|elif|else|for|while|def|class|try|except|finally|with)\b").unwrap()
});

static RE_ENDS_WITH_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(if|elif|else|for|while|def|class|try|except|finally)\s*$").unwrap()
});

static RE_IF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bif\b").unwrap());

static RE_PRINT_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*print\s").unwrap());

type Guidance = (String, String);

fn guidance(explanation: &str, suggestion: impl Into<String>) -> Guidance {
    (explanation.to_string(), suggestion.into())
}

fn classify_line(line: &str) -> Option<Guidance> {
    let (code, _comment) = split_comment(line);
    let code = code.trim_end();
    if code.trim().is_empty() {
        return None;
    }

    // 1. Ends on a bare block keyword: `else`, `try`, `x if`
    if RE_ENDS_WITH_KEYWORD.is_match(code) {
        return Some(guidance(
            messages::MISSING_COLON_EXPLANATION,
            messages::MISSING_COLON_SUGGESTION,
        ));
    }
    // 2. Block opener whose line does not end in a colon
    if let Some(caps) = RE_BLOCK_OPENER.captures(code) {
        if !code.ends_with(':') {
            return Some(guidance(
                messages::MISSING_COLON_EXPLANATION,
                messages::missing_colon_after(&caps[1]),
            ));
        }
    }
    // 3. Assignment where a comparison belongs
    if RE_IF.is_match(code) && !lone_assignments(code).is_empty() {
        return Some(guidance(
            messages::ASSIGN_IN_CONDITION_EXPLANATION,
            messages::ASSIGN_IN_CONDITION_SUGGESTION,
        ));
    }
    // 4–6. Delimiter counts
    let count = |c: char| code.chars().filter(|x| *x == c).count();
    let (open_paren, close_paren) = (count('('), count(')'));
    if open_paren > close_paren {
        return Some(guidance(
            messages::UNCLOSED_PAREN_EXPLANATION,
            messages::UNCLOSED_PAREN_SUGGESTION,
        ));
    }
    if close_paren > open_paren {
        return Some(guidance(
            messages::EXTRA_PAREN_EXPLANATION,
            messages::EXTRA_PAREN_SUGGESTION,
        ));
    }
    if count('[') > count(']') {
        return Some(guidance(
            messages::UNCLOSED_BRACKET_EXPLANATION,
            messages::UNCLOSED_BRACKET_SUGGESTION,
        ));
    }
    // 7. Python 2 print statement
    if RE_PRINT_STATEMENT.is_match(code) && !code.contains('(') {
        return Some(guidance(
            messages::PRINT_STATEMENT_EXPLANATION,
            messages::PRINT_STATEMENT_SUGGESTION,
        ));
    }
    None
}

// ── Message rules ────────────────────────────────────────────────────────────

static RE_EXPECTED_COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r"expected .*':'").unwrap());

fn classify_message(message: &str, kind: CompileFailureKind) -> Guidance {
    let lower = message.to_lowercase();
    if lower.contains("unexpected eof") || lower.contains("was never closed") {
        guidance(
            messages::UNEXPECTED_EOF_EXPLANATION,
            messages::UNEXPECTED_EOF_SUGGESTION,
        )
    } else if lower.contains("unterminated string")
        || lower.contains("unterminated triple-quoted")
        || lower.contains("eol while scanning")
    {
        guidance(
            messages::UNTERMINATED_STRING_EXPLANATION,
            messages::UNTERMINATED_STRING_SUGGESTION,
        )
    } else if lower.contains("invalid syntax") {
        guidance(
            messages::INVALID_SYNTAX_EXPLANATION,
            messages::INVALID_SYNTAX_SUGGESTION,
        )
    } else if lower.contains("unmatched") {
        guidance(messages::UNMATCHED_EXPLANATION, messages::UNMATCHED_SUGGESTION)
    } else if RE_EXPECTED_COLON.is_match(&lower) {
        guidance(
            messages::EXPECTED_COLON_EXPLANATION,
            messages::MISSING_COLON_SUGGESTION,
        )
    } else if kind == CompileFailureKind::Indentation {
        guidance(
            messages::INDENTATION_EXPLANATION,
            messages::INDENTATION_SUGGESTION,
        )
    } else {
        guidance(
            messages::GENERIC_SYNTAX_EXPLANATION,
            messages::INVALID_SYNTAX_SUGGESTION,
        )
    }
}

// ── Lexical helpers (shared with the auto-fixer) ─────────────────────────────

/// 1-based line lookup.
pub(crate) fn line_at(code: &str, line: usize) -> Option<&str> {
    line.checked_sub(1).and_then(|i| code.lines().nth(i))
}

/// Split a line into its code and a trailing `# comment` (with the
/// whitespace before it). A `#` inside a string literal is not a comment.
pub(crate) fn split_comment(line: &str) -> (&str, &str) {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '#' => {
                    let code_end = line[..i].trim_end().len();
                    return (&line[..code_end], &line[code_end..]);
                }
                _ => {}
            },
        }
    }
    (line, "")
}

/// Byte offsets of `=` signs that are plain assignments: not part of `==`,
/// `!=`, `<=`, `>=`, `:=` or an augmented operator.
pub(crate) fn lone_assignments(code: &str) -> Vec<usize> {
    let bytes = code.as_bytes();
    (0..bytes.len())
        .filter(|&i| bytes[i] == b'=')
        .filter(|&i| {
            let prev = if i > 0 { bytes[i - 1] } else { b' ' };
            let next = bytes.get(i + 1).copied().unwrap_or(b' ');
            next != b'=' && !b"=!<>:+-*/%&|^@".contains(&prev)
        })
        .collect()
}

/// Whether the line already compares values.
pub(crate) fn has_comparison(code: &str) -> bool {
    ["==", "!=", "<=", ">=", "<", ">"]
        .iter()
        .any(|op| code.contains(op))
}

/// The `n`-th piece of `text` split on quote characters, provided a closing
/// quote follows it. `quoted("name 'x' is not defined", 1) == Some("x")`.
fn quoted(text: &str, n: usize) -> Option<&str> {
    let parts: Vec<&str> = text.split(['\'', '"']).collect();
    if parts.len() > n + 1 && n % 2 == 1 && !parts[n].is_empty() {
        Some(parts[n])
    } else {
        None
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

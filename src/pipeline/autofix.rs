//! Auto-fix: one deterministic repair of the line a compile failure points at.
//!
//! The fixer rewrites a single line and then asks the runtime to compile the
//! whole buffer again. A candidate that still fails is discarded, so a
//! proposal is never *worse* than the input. Every other line of the buffer
//! is carried over byte for byte, line endings included.
//!
//! ## Rewrite Order
//!
//! At most one of the first four rules fires, in this order:
//! 1. Block opener without a colon → append `:`
//! 2. `if` with exactly one bare `=` and no comparison → `=` becomes `==`
//! 3. Assignment with nothing after `=` → append ` None`
//! 4. `a = 1, 2` without brackets → `a = [1, 2]`
//!
//! The cleanup steps below are then always applied:
//! 5. Close a dangling string quote
//! 6. Wrap a Python 2 `print x` as `print(x)`
//! 7. Close any unclosed `(`, `[` or `{` in reverse opening order

use super::diagnose::{has_comparison, lone_assignments, split_comment, Diagnosis, RE_BLOCK_OPENER};
use crate::sandbox::Runtime;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Propose a corrected buffer for a compile-time diagnosis.
///
/// Returns `None` when the diagnosis is not a syntax/indentation failure,
/// has no line, the rules change nothing, or the candidate still does not
/// compile.
pub async fn attempt_fix(runtime: &dyn Runtime, code: &str, diagnosis: &Diagnosis) -> Option<String> {
    if !diagnosis.kind.is_compile() {
        return None;
    }
    let line = diagnosis.line?;
    let candidate = propose_fix(code, line)?;

    match runtime.compile(&candidate).await {
        Ok(()) => {
            debug!("auto-fix: line {} repaired", line);
            Some(candidate)
        }
        Err(failure) => {
            debug!(
                "auto-fix: candidate for line {} still fails ({})",
                line, failure.message
            );
            None
        }
    }
}

/// Rewrite line `line` (1-based) of `code`; `None` when nothing changes.
pub fn propose_fix(code: &str, line: usize) -> Option<String> {
    let index = line.checked_sub(1)?;
    let lines: Vec<&str> = code.split_inclusive('\n').collect();
    let raw = *lines.get(index)?;

    let content = raw.trim_end_matches(['\n', '\r']);
    let ending = &raw[content.len()..];
    let rewritten = rewrite_line(content);
    if rewritten.trim_end() == content.trim_end() {
        return None;
    }

    let mut out = String::with_capacity(code.len() + 8);
    for (i, original) in lines.iter().enumerate() {
        if i == index {
            out.push_str(&rewritten);
            out.push_str(ending);
        } else {
            out.push_str(original);
        }
    }
    Some(out)
}

static RE_IF_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(el)?if\b").unwrap());

static RE_EMPTY_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][\w.]*(\[[^\]]*\])?\s*=$").unwrap());

static RE_PRINT_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^print\s+(.+)$").unwrap());

/// Apply the rewrite rules to one line (without its line ending).
pub fn rewrite_line(line: &str) -> String {
    let body_start = line.len() - line.trim_start().len();
    let (indent, body) = line.split_at(body_start);
    let (code, comment) = split_comment(body);
    let mut code = code.trim_end().to_string();

    if RE_BLOCK_OPENER.is_match(&code) && !code.ends_with(':') {
        code.push(':');
    } else if let Some(pos) = single_assignment_in_if(&code) {
        code.replace_range(pos..pos + 1, "==");
    } else if RE_EMPTY_ASSIGNMENT.is_match(&code) {
        code.push_str(" None");
    } else if let Some(pos) = bare_tuple_assignment(&code) {
        code = format!("{} = [{}]", code[..pos].trim_end(), code[pos + 1..].trim());
    }

    close_dangling_quote(&mut code);
    if !code.contains('(') {
        if let Some(caps) = RE_PRINT_STATEMENT.captures(&code) {
            code = format!("print({})", caps[1].trim_end());
        }
    }
    close_open_delimiters(&mut code);

    format!("{indent}{code}{comment}")
}

fn single_assignment_in_if(code: &str) -> Option<usize> {
    if !RE_IF_STATEMENT.is_match(code) || has_comparison(code) {
        return None;
    }
    match lone_assignments(code).as_slice() {
        [pos] => Some(*pos),
        _ => None,
    }
}

fn bare_tuple_assignment(code: &str) -> Option<usize> {
    if !code.contains(',') || code.contains(['[', '(']) {
        return None;
    }
    lone_assignments(code).first().copied()
}

/// Quote character left open at the end of `code`, if any.
fn open_quote(code: &str) -> Option<char> {
    let mut quote = None;
    let mut escaped = false;
    for c in code.chars() {
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
            None if c == '\'' || c == '"' => quote = Some(c),
            None => {}
        }
    }
    quote
}

fn close_dangling_quote(code: &mut String) {
    if let Some(q) = open_quote(code) {
        code.push(q);
    }
}

fn close_open_delimiters(code: &mut String) {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    code.extend(stack.into_iter().rev());
}

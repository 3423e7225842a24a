//! Human-facing explanation and suggestion texts for diagnoses.
//!
//! Every sentence a user can see in a diagnosis lives here, so wording can
//! be reviewed (or translated) in one place and tests can assert against the
//! same constants the diagnostician uses.

// ── Compile-time: line heuristics ────────────────────────────────────────────

pub const MISSING_COLON_EXPLANATION: &str =
    "Python block statements (if, for, while, def, class, try…) must end with a colon.";
pub const MISSING_COLON_SUGGESTION: &str = "Add a missing colon (:) at the end of the line.";

pub fn missing_colon_after(keyword: &str) -> String {
    format!("Add a missing colon (:) at the end of the `{keyword}` statement.")
}

pub const ASSIGN_IN_CONDITION_EXPLANATION: &str =
    "A single `=` assigns a value; conditions compare values with `==`.";
pub const ASSIGN_IN_CONDITION_SUGGESTION: &str =
    "Replace `=` with `==` to compare the two values.";

pub const UNCLOSED_PAREN_EXPLANATION: &str = "An opening parenthesis `(` is never closed.";
pub const UNCLOSED_PAREN_SUGGESTION: &str = "Add the missing closing parenthesis `)`.";

pub const EXTRA_PAREN_EXPLANATION: &str =
    "There is a closing parenthesis `)` without a matching `(`.";
pub const EXTRA_PAREN_SUGGESTION: &str = "Remove the extra closing parenthesis `)`.";

pub const UNCLOSED_BRACKET_EXPLANATION: &str = "An opening bracket `[` is never closed.";
pub const UNCLOSED_BRACKET_SUGGESTION: &str = "Add the missing closing bracket `]`.";

pub const PRINT_STATEMENT_EXPLANATION: &str =
    "`print` is a function in Python 3, not a statement.";
pub const PRINT_STATEMENT_SUGGESTION: &str =
    "Call it with parentheses: print(\"text\") instead of print \"text\".";

// ── Compile-time: message matching ───────────────────────────────────────────

pub const UNEXPECTED_EOF_EXPLANATION: &str =
    "The code ended while a statement, bracket or block was still open.";
pub const UNEXPECTED_EOF_SUGGESTION: &str =
    "Check the last lines for unclosed brackets, parentheses or an unfinished block.";

pub const UNTERMINATED_STRING_EXPLANATION: &str = "A string literal is missing its closing quote.";
pub const UNTERMINATED_STRING_SUGGESTION: &str =
    "Close the string with the same quote character it was opened with.";

pub const INVALID_SYNTAX_EXPLANATION: &str = "Python could not understand this line.";
pub const INVALID_SYNTAX_SUGGESTION: &str =
    "Check for missing parentheses, matching quotes, or correct colons at the end of statements.";

pub const UNMATCHED_EXPLANATION: &str = "A closing bracket does not match any opening bracket.";
pub const UNMATCHED_SUGGESTION: &str =
    "Remove the stray closing bracket or add the opening one it belongs to.";

pub const EXPECTED_COLON_EXPLANATION: &str =
    "Python expected a colon here, usually at the end of a block statement.";

pub const INDENTATION_EXPLANATION: &str =
    "Python uses indentation to group statements, and this line is indented inconsistently.";
pub const INDENTATION_SUGGESTION: &str =
    "Check your code indentation. Python relies on consistent spacing (tabs vs spaces).";

pub const GENERIC_SYNTAX_EXPLANATION: &str = "The code is not valid Python syntax.";

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Shown when an identifier cannot be recovered from the error text.
pub const UNKNOWN_IDENTIFIER: &str = "this name";

pub fn name_error_explanation(name: &str) -> String {
    format!("`{name}` is used before it was defined or imported.")
}
pub fn name_error_suggestion(name: &str) -> String {
    format!("Define or import `{name}` before using it, and check its spelling.")
}

pub const TYPE_ERROR_EXPLANATION: &str =
    "A value of the wrong type was passed to an operation or function.";
pub const TYPE_ERROR_SUGGESTION: &str =
    "Check the argument types and the number of arguments in the failing call.";

pub fn attribute_error_explanation(owner: &str, attribute: &str) -> String {
    format!("`{owner}` has no attribute `{attribute}`.")
}
pub fn attribute_error_suggestion(attribute: &str) -> String {
    format!("Check the spelling of `{attribute}` and the library documentation for the right method name.")
}

pub fn import_error_explanation(module: &str) -> String {
    format!("The module `{module}` could not be imported.")
}
pub const IMPORT_ERROR_SUGGESTION: &str =
    "The library you are trying to import might not be available in this environment.";

pub const INDEX_ERROR_EXPLANATION: &str = "A list or sequence was indexed past its end.";
pub const INDEX_ERROR_SUGGESTION: &str =
    "Check the length of the sequence before indexing, and remember indexes start at 0.";

pub const KEY_ERROR_EXPLANATION: &str = "A dictionary was asked for a key it does not contain.";
pub const KEY_ERROR_SUGGESTION: &str =
    "Check the key's spelling, or use dict.get(key, default) for optional keys.";

pub const GENERIC_EXPLANATION: &str = "An error occurred while running your code.";
pub const GENERIC_SUGGESTION: &str = "Review the error details above to identify the issue.";

// ── Pipeline-level ───────────────────────────────────────────────────────────

pub const NO_OUTPUT_MESSAGE: &str = "No PDF generated; auto-fix attempts failed";
pub const NO_OUTPUT_EXPLANATION: &str =
    "Your code ran without errors but did not save a PDF, print anything, or define a function that does.";
pub const NO_OUTPUT_SUGGESTION: &str =
    "Make sure you call `pdf.output('filename.pdf')` at the end.";

pub fn timeout_message(secs: u64) -> String {
    format!("Execution timed out after {secs}s")
}
pub const TIMEOUT_EXPLANATION: &str =
    "The code kept running past the time limit, often because of an endless loop.";
pub const TIMEOUT_SUGGESTION: &str =
    "Look for loops whose exit condition is never reached, or raise the timeout.";

pub const SYSTEM_EXPLANATION: &str = "The conversion machinery itself failed, not your code.";
pub const SYSTEM_SUGGESTION: &str = "Try again; if it keeps failing, report the error message.";

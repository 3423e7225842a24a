//! Error types for the code2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Code2PdfError`]: **Fatal**: the request cannot produce any artifact
//!   at all (empty input, no runtime available, the sandbox filesystem is
//!   unwritable). Returned as `Err(Code2PdfError)` from the top-level
//!   `convert*` functions.
//!
//! * [`crate::pipeline::diagnose::Diagnosis`]: **Recoverable**: the user's
//!   code failed to compile, raised, timed out or saved nothing. These never
//!   surface as `Err`; the fallback renderer turns them into a diagnostic PDF
//!   and the diagnosis rides along in [`crate::output::ConversionOutput`].
//!
//! Drawing-capability failures use [`crate::draw::DrawError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the code2pdf library.
#[derive(Debug, Error)]
pub enum Code2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Nothing left to run once fences and citation markers were stripped.
    #[error("No code provided\nPaste some Python code that builds a PDF.")]
    EmptySource,

    // ── Runtime errors ────────────────────────────────────────────────────
    /// No runtime was injected and none could be constructed.
    #[error("No code runtime is configured.\n{hint}")]
    RuntimeNotConfigured { hint: String },

    // ── Sandbox errors ────────────────────────────────────────────────────
    /// The sandbox itself misbehaved (not the user's code).
    #[error("Sandbox failure: {detail}")]
    Sandbox { detail: String },

    /// A sandbox filesystem operation failed.
    #[error("Sandbox I/O failed on '{path}': {source}")]
    SandboxIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request ended in the diagnostic fallback report.
    ///
    /// Only produced by [`crate::output::ConversionOutput::into_result`] for
    /// callers that treat a fallback PDF as failure.
    #[error("{type_name}: {message}")]
    Diagnosed { type_name: String, message: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

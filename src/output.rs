//! Result types returned by the conversion entry points.

use crate::error::Code2PdfError;
use crate::pipeline::diagnose::Diagnosis;
use serde::{Deserialize, Serialize};

/// How the delivered PDF came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// User code saved it.
    Saved,
    /// Typeset from what the code printed.
    FromStdout,
    /// Produced by calling a function the code defined.
    AutoInvoked { function: String },
    /// The diagnostic error report.
    Fallback,
}

impl Outcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback)
    }
}

/// Wall-clock timings of one conversion, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub normalize_ms: u64,
    pub diagnose_ms: u64,
    pub execute_ms: u64,
    pub resolve_ms: u64,
    pub fallback_ms: u64,
    pub total_ms: u64,
    /// Whether an auto-fix was found and run in place of the input.
    pub auto_fixed: bool,
    /// PDFs left in the sandbox; only the first is delivered.
    pub artifacts_found: usize,
}

/// The delivered PDF plus everything learned while producing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Download name: the requested name with `.pdf` ensured, or
    /// [`artifact`](Self::artifact) when none was requested.
    pub filename: String,
    /// File name inside the sandbox.
    pub artifact: String,
    /// PDF bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
    /// Why the request failed; set whenever `outcome` is `Fallback`. On a
    /// run that only succeeded after an auto-fix, the compile error that
    /// was fixed, with its `proposed_fix`.
    pub diagnosis: Option<Diagnosis>,
    /// Corrected buffer the caller may offer as a one-click fix.
    pub proposed_fix: Option<String>,
    /// Everything the code printed during execution.
    pub stdout: String,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    pub fn is_fallback(&self) -> bool {
        self.outcome.is_fallback()
    }

    /// Treat the fallback report as an error.
    pub fn into_result(self) -> Result<ConversionOutput, Code2PdfError> {
        match (&self.outcome, &self.diagnosis) {
            (Outcome::Fallback, Some(d)) => Err(Code2PdfError::Diagnosed {
                type_name: d.type_name.clone(),
                message: d.message.clone(),
            }),
            (Outcome::Fallback, None) => Err(Code2PdfError::Internal(
                "fallback report without a diagnosis".into(),
            )),
            _ => Ok(self),
        }
    }
}

/// `name` with a `.pdf` extension, unless it already has one (any case).
pub fn download_name(name: &str) -> String {
    let name = name.trim();
    if name.to_ascii_lowercase().ends_with(crate::sandbox::PDF_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{}", crate::sandbox::PDF_EXTENSION)
    }
}

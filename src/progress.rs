//! Progress-callback trait for per-stage conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to follow a
//! request through the pipeline: a terminal spinner, a web socket, a log
//! line per stage. The library knows nothing about how the host reports
//! progress.
//!
//! # Example
//!
//! ```rust
//! use code2pdf::{ConversionConfig, ConversionProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ConversionProgressCallback for Printer {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("{}…", stage);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Outcome;
use crate::pipeline::diagnose::Diagnosis;
use std::fmt;
use std::sync::Arc;

/// Pipeline stages, in the order a request passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Normalize,
    Diagnose,
    AutoFix,
    Execute,
    Resolve,
    Fallback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Normalize => "Normalizing",
            Stage::Diagnose => "Checking syntax",
            Stage::AutoFix => "Attempting auto-fix",
            Stage::Execute => "Running code",
            Stage::Resolve => "Collecting output",
            Stage::Fallback => "Rendering error report",
        })
    }
}

/// Called by the conversion pipeline as a request moves through it.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. One request never calls back concurrently.
pub trait ConversionProgressCallback: Send + Sync {
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// # Arguments
    /// * `stage`: the stage that just finished
    /// * `elapsed_ms`: wall-clock time spent in it
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// An auto-fix was found. `fixed_code` is the whole corrected buffer.
    fn on_fix_proposed(&self, diagnosis: &Diagnosis, fixed_code: &str) {
        let _ = (diagnosis, fixed_code);
    }

    /// The request ended in the error report.
    fn on_fallback(&self, diagnosis: &Diagnosis) {
        let _ = diagnosis;
    }

    /// Called once, with the final outcome and the delivered file name.
    fn on_conversion_complete(&self, outcome: &Outcome, filename: &str) {
        let _ = (outcome, filename);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

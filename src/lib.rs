//! # code2pdf
//!
//! Turn pasted Python-like source into a PDF, repairing it on the way when
//! it can and explaining what went wrong when it cannot.
//!
//! ## Why this crate?
//!
//! Code pasted from a chat assistant into a "make me a PDF" box fails in
//! boring ways: markdown fences left in, a missing colon, a `print` that
//! should have been a saved file. Rather than bouncing the user with a
//! traceback, this crate normalises the text, repairs the common mistakes,
//! runs it in a sandbox and harvests whatever PDF it can. When nothing works
//! the user still gets a PDF: an error report with their code in it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source
//!  │
//!  ├─ 1. Normalize  strip fences / citation markers, rewrite font sizes
//!  ├─ 2. Diagnose   compile without running, classify the failure
//!  ├─ 3. Auto-fix   rewrite the offending line once, re-check
//!  ├─ 4. Execute    run in the sandbox with drawing patches, capture stdout
//!  ├─ 5. Resolve    saved PDF → printed text → auto-invoked function
//!  └─ 6. Fallback   error report with the original code
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use code2pdf::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Runs with `$CODE2PDF_PYTHON` or `python3`
//!     let config = ConversionConfig::builder().output_name("hello").build()?;
//!     let output = convert("print('hi')", &config).await?;
//!     std::fs::write(&output.filename, &output.bytes)?;
//!     if let Some(d) = &output.diagnosis {
//!         eprintln!("{}: {}", d.type_name, d.suggestion);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `code2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `python` | on      | [`sandbox::PythonProcess`], a runtime driving a local interpreter |
//!
//! Without `python`, pass your own [`Runtime`] through
//! [`ConversionConfigBuilder::runtime`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod draw;
pub mod error;
pub mod messages;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod sandbox;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{convert, convert_sync, convert_to_file, diagnose_source};
pub use draw::{DrawError, DrawingBackend, PatchSet};
pub use error::Code2PdfError;
pub use output::{ConversionOutput, ConversionStats, Outcome};
pub use pipeline::diagnose::{Diagnosis, ErrorKind, FailureCategory};
pub use pipeline::normalize::{normalize, NormalizedCode, SourceBuffer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use sandbox::{ExecutionContext, Runtime, Sandbox};

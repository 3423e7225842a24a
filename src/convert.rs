//! Conversion entry points: source text in, one PDF out.
//!
//! Every request ends in exactly one delivered PDF: the user's own, one
//! typeset from what the code printed, one produced by an auto-invoked
//! function, or the diagnostic error report. Only problems with the
//! machinery itself (no runtime, unusable sandbox, empty input) are `Err`.

use crate::config::ConversionConfig;
use crate::error::Code2PdfError;
use crate::output::{download_name, ConversionOutput, ConversionStats, Outcome};
use crate::pipeline::autofix::attempt_fix;
use crate::pipeline::diagnose::{diagnose, Diagnosis};
use crate::pipeline::execute::{execute, ExecutionResult};
use crate::pipeline::fallback::render_fallback;
use crate::pipeline::normalize::SourceBuffer;
use crate::pipeline::resolve::{resolve, ResolveOptions, STDOUT_PDF_NAME};
use crate::progress::{ConversionProgressCallback, Stage};
use crate::sandbox::{ExecutionContext, Sandbox};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert pasted source to a PDF.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `source`: the code, exactly as pasted (fences and citation markers are fine)
/// * `config`: Conversion configuration
///
/// # Returns
/// `Ok(ConversionOutput)` whenever a PDF was delivered, including the
/// error report (check `output.outcome` / `output.diagnosis`). When the
/// code only ran after an auto-fix, `output.diagnosis` is the compile
/// error that was fixed and carries the fix.
///
/// # Errors
/// Returns `Err(Code2PdfError)` only for fatal errors:
/// - Nothing left to run after normalisation
/// - No runtime available
/// - The sandbox filesystem cannot be cleaned, read or written
pub async fn convert(
    source: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Code2PdfError> {
    let total_start = Instant::now();
    let buffer = SourceBuffer::new(source.as_ref()).with_font_size(config.effective_font_size());
    let progress = Progress::new(config);
    let mut stats = ConversionStats::default();
    info!("Starting conversion ({} bytes of source)", buffer.text().len());

    // ── Step 1: Normalize ────────────────────────────────────────────────
    let started = progress.start(Stage::Normalize);
    let code = buffer.normalize();
    stats.normalize_ms = progress.complete(Stage::Normalize, started);
    if code.is_empty() {
        return Err(Code2PdfError::EmptySource);
    }

    // ── Step 2: Runtime and sandbox ──────────────────────────────────────
    let runtime = config.resolve_runtime()?;
    let sandbox = config.resolve_sandbox()?;
    let _request = sandbox.begin_request().await;
    let removed = sandbox.fs().remove_pdfs()?;
    if removed > 0 {
        debug!("Removed {} PDF(s) left by an earlier request", removed);
    }

    // ── Step 3: Diagnose, with one auto-fix retry ────────────────────────
    let started = progress.start(Stage::Diagnose);
    let compile_failure = diagnose(runtime.as_ref(), &code).await;
    stats.diagnose_ms = progress.complete(Stage::Diagnose, started);

    let mut run_code = code.to_string();
    let mut proposed_fix = None;
    let mut fixed_diagnosis = None;
    if let Some(diagnosis) = compile_failure {
        info!("Compile check failed: {}", diagnosis);
        let fix = if config.auto_fix {
            let started = progress.start(Stage::AutoFix);
            let fix = attempt_fix(runtime.as_ref(), &code, &diagnosis).await;
            progress.complete(Stage::AutoFix, started);
            fix
        } else {
            None
        };
        match fix {
            Some(fixed) => {
                info!("Auto-fix found for line {:?}; running the fixed code", diagnosis.line);
                progress.fix_proposed(&diagnosis, &fixed);
                stats.auto_fixed = true;
                run_code = fixed.clone();
                proposed_fix = Some(fixed.clone());
                fixed_diagnosis = Some(diagnosis.with_proposed_fix(fixed));
            }
            None => {
                return deliver_fallback(
                    &sandbox, diagnosis, &buffer, String::new(), None, stats, total_start,
                    config, &progress,
                );
            }
        }
    }

    // ── Step 4: Execute ──────────────────────────────────────────────────
    let started = progress.start(Stage::Execute);
    let mut ctx = ExecutionContext::new(Arc::clone(&sandbox), run_code.clone());
    if config.auto_invoke {
        ctx.allow_auto_invoke(STDOUT_PDF_NAME);
    }
    let (result, stdout) = execute(runtime.as_ref(), &run_code, &mut ctx, config.timeout()).await;
    stats.execute_ms = progress.complete(Stage::Execute, started);

    // ── Step 5: Resolve output ───────────────────────────────────────────
    let resolved = match result {
        ExecutionResult::Success(pdfs) => {
            let started = progress.start(Stage::Resolve);
            let options = ResolveOptions {
                font_size: config.effective_font_size(),
                auto_invoke: config.auto_invoke,
                timeout: config.timeout(),
            };
            let resolved = resolve(runtime.as_ref(), &mut ctx, pdfs, &stdout, options).await;
            stats.resolve_ms = progress.complete(Stage::Resolve, started);
            resolved
        }
        ExecutionResult::Failure(diagnosis) => Err(diagnosis),
    };

    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(diagnosis) => {
            return deliver_fallback(
                &sandbox, diagnosis, &buffer, stdout, proposed_fix, stats, total_start, config,
                &progress,
            );
        }
    };

    // ── Step 6: Deliver the first artifact ───────────────────────────────
    stats.artifacts_found = resolved.artifacts.len();
    let Some(artifact) = resolved.artifacts.into_iter().next() else {
        return Err(Code2PdfError::Internal("resolution returned no artifact".into()));
    };
    let bytes = match sandbox.fs().read(&artifact) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not read {} from the sandbox: {}", artifact, e);
            return deliver_fallback(
                &sandbox,
                Diagnosis::system(e.to_string()),
                &buffer,
                stdout,
                proposed_fix,
                stats,
                total_start,
                config,
                &progress,
            );
        }
    };

    let filename = config
        .output_name
        .as_deref()
        .map(download_name)
        .unwrap_or_else(|| artifact.clone());
    stats.total_ms = elapsed_ms(total_start);
    info!(
        "Conversion complete: {} ({:?}, {} bytes, {}ms total)",
        filename,
        resolved.outcome,
        bytes.len(),
        stats.total_ms
    );
    progress.complete_conversion(&resolved.outcome, &filename);

    Ok(ConversionOutput {
        filename,
        artifact,
        bytes,
        outcome: resolved.outcome,
        diagnosis: fixed_diagnosis,
        proposed_fix,
        stdout,
        stats,
    })
}

/// Convert and write the PDF directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    source: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Code2PdfError> {
    let output = convert(source, config).await?;
    let path = output_path.as_ref();

    // Atomic write: write to temp, then rename
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Code2PdfError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &output.bytes)
        .await
        .map_err(|e| Code2PdfError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Code2PdfError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    source: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Code2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Code2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(source, config))
}

/// Check source without running it.
///
/// Normalises, compiles and, when `auto_fix` is on, attaches a proposed fix.
/// `Ok(None)` means the code compiles.
pub async fn diagnose_source(
    source: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<Option<Diagnosis>, Code2PdfError> {
    let code = SourceBuffer::new(source.as_ref())
        .with_font_size(config.effective_font_size())
        .normalize();
    if code.is_empty() {
        return Err(Code2PdfError::EmptySource);
    }
    let runtime = config.resolve_runtime()?;
    let Some(diagnosis) = diagnose(runtime.as_ref(), &code).await else {
        return Ok(None);
    };
    if !config.auto_fix {
        return Ok(Some(diagnosis));
    }
    Ok(Some(match attempt_fix(runtime.as_ref(), &code, &diagnosis).await {
        Some(fix) => diagnosis.with_proposed_fix(fix),
        None => diagnosis,
    }))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Render the error report and wrap it up as the request's output.
#[allow(clippy::too_many_arguments)]
fn deliver_fallback(
    sandbox: &Sandbox,
    diagnosis: Diagnosis,
    buffer: &SourceBuffer,
    stdout: String,
    proposed_fix: Option<String>,
    mut stats: ConversionStats,
    total_start: Instant,
    config: &ConversionConfig,
    progress: &Progress<'_>,
) -> Result<ConversionOutput, Code2PdfError> {
    warn!("Delivering error report: {}", diagnosis);
    let started = progress.start(Stage::Fallback);
    let artifact = render_fallback(sandbox, &diagnosis, buffer.text(), buffer.font_size())?;
    let bytes = sandbox.fs().read(&artifact)?;
    stats.fallback_ms = progress.complete(Stage::Fallback, started);
    stats.total_ms = elapsed_ms(total_start);
    progress.fallback(&diagnosis);

    let filename = config
        .output_name
        .as_deref()
        .map(download_name)
        .unwrap_or_else(|| artifact.clone());
    progress.complete_conversion(&Outcome::Fallback, &filename);

    Ok(ConversionOutput {
        filename,
        artifact,
        bytes,
        outcome: Outcome::Fallback,
        diagnosis: Some(diagnosis),
        proposed_fix,
        stdout,
        stats,
    })
}

/// Forwards events to the configured callback, if any.
struct Progress<'a> {
    callback: Option<&'a dyn ConversionProgressCallback>,
}

impl<'a> Progress<'a> {
    fn new(config: &'a ConversionConfig) -> Self {
        Self {
            callback: config.progress_callback.as_deref(),
        }
    }

    fn start(&self, stage: Stage) -> Instant {
        debug!("Stage {:?} started", stage);
        if let Some(cb) = self.callback {
            cb.on_stage_start(stage);
        }
        Instant::now()
    }

    fn complete(&self, stage: Stage, started: Instant) -> u64 {
        let ms = elapsed_ms(started);
        if let Some(cb) = self.callback {
            cb.on_stage_complete(stage, ms);
        }
        ms
    }

    fn fix_proposed(&self, diagnosis: &Diagnosis, fixed: &str) {
        if let Some(cb) = self.callback {
            cb.on_fix_proposed(diagnosis, fixed);
        }
    }

    fn fallback(&self, diagnosis: &Diagnosis) {
        if let Some(cb) = self.callback {
            cb.on_fallback(diagnosis);
        }
    }

    fn complete_conversion(&self, outcome: &Outcome, filename: &str) {
        if let Some(cb) = self.callback {
            cb.on_conversion_complete(outcome, filename);
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

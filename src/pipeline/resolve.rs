//! Output resolution: decide what to deliver after a clean run.
//!
//! ## Strategy Order
//!
//! 1. The run saved PDFs → deliver them.
//! 2. The run printed something → typeset the printed text as `output.pdf`.
//! 3. Auto-invoke is on and the code defined functions → call each one
//!    until a PDF appears. A function is called without arguments first and
//!    with `"output.pdf"` only if that call raised.
//! 4. Otherwise → a `NoOutput` diagnosis.
//!
//! Strategy 3 is experimental: calling arbitrary user functions can have
//! side effects the user never asked for, so it logs loudly and can be
//! switched off with `auto_invoke(false)`. A runtime may already have done
//! this during execution (see [`ExecutionContext::auto_invoked`]); its
//! result is then used as is and nothing is called again.

use super::diagnose::Diagnosis;
use crate::draw::{line_height, pdf::DEFAULT_FONT_SIZE, Cell, FontFamily};
use crate::output::Outcome;
use crate::sandbox::{AutoInvocation, ExecutionContext, Runtime};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the document synthesised from printed output, and the
/// argument offered to auto-invoked functions.
pub const STDOUT_PDF_NAME: &str = "output.pdf";

/// Knobs for [`resolve`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Font size for the stdout document; `None` → 12pt.
    pub font_size: Option<u32>,
    pub auto_invoke: bool,
    /// Budget for all auto-invoked calls together.
    pub timeout: Duration,
}

/// A deliverable: how it was obtained and the PDF names in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub outcome: Outcome,
    pub artifacts: Vec<String>,
}

/// Apply the resolution strategies to a successful run.
pub async fn resolve(
    runtime: &dyn Runtime,
    ctx: &mut ExecutionContext,
    pdfs: Vec<String>,
    stdout: &str,
    options: ResolveOptions,
) -> Result<Resolved, Diagnosis> {
    // ── 1. Saved PDFs ────────────────────────────────────────────────────
    if !pdfs.is_empty() {
        let outcome = match ctx.auto_invoked() {
            Some(AutoInvocation::Produced(function)) => Outcome::AutoInvoked {
                function: function.clone(),
            },
            _ => Outcome::Saved,
        };
        return Ok(Resolved {
            outcome,
            artifacts: pdfs,
        });
    }

    // ── 2. Printed output ────────────────────────────────────────────────
    if !stdout.trim().is_empty() {
        let name = typeset_stdout(ctx, stdout, options.font_size)?;
        info!("No PDF saved; typeset {} bytes of stdout as {}", stdout.len(), name);
        return Ok(Resolved {
            outcome: Outcome::FromStdout,
            artifacts: vec![name],
        });
    }

    // ── 3. Auto-invoke ───────────────────────────────────────────────────
    if options.auto_invoke && !ctx.namespace().is_empty() {
        if ctx.auto_invoked().is_some() {
            debug!("auto-invoke: already done by the {} runtime", runtime.name());
        } else if let Some(resolved) = auto_invoke(runtime, ctx, options.timeout).await {
            return Ok(resolved);
        }
    }

    // ── 4. Nothing to deliver ────────────────────────────────────────────
    Err(Diagnosis::no_output())
}

fn typeset_stdout(
    ctx: &ExecutionContext,
    stdout: &str,
    font_size: Option<u32>,
) -> Result<String, Diagnosis> {
    let size = font_size.map(|s| s as f32).unwrap_or(DEFAULT_FONT_SIZE);
    let mut doc = ctx.document();
    doc.add_page();
    doc.set_font(FontFamily::Courier, size);
    doc.multi_cell(Cell::auto(line_height(size), stdout))
        .and_then(|_| doc.output(STDOUT_PDF_NAME))
        .map_err(|e| Diagnosis::system(format!("could not typeset printed output: {e}")))
}

async fn auto_invoke(
    runtime: &dyn Runtime,
    ctx: &mut ExecutionContext,
    timeout: Duration,
) -> Option<Resolved> {
    let functions = ctx.namespace().functions().to_vec();
    warn!(
        "Experimental: no output produced, auto-invoking {} user function(s): {}",
        functions.len(),
        functions.join(", ")
    );

    let deadline = tokio::time::Instant::now() + timeout;
    for function in functions {
        for arg in [None, Some(STDOUT_PDF_NAME)] {
            let redirect = ctx.redirect_stdout();
            let call =
                tokio::time::timeout_at(deadline, runtime.invoke(&function, arg, ctx)).await;
            let printed = ctx.restore_stdout(redirect);
            if !printed.is_empty() {
                debug!(target: "code2pdf::stdout", "{}(): {}", function, printed.trim_end());
            }

            match call {
                Err(_) => {
                    warn!("auto-invoke: gave up in {}() after {:?}", function, timeout);
                    return None;
                }
                Ok(Err(exc)) => {
                    debug!("auto-invoke: {}({:?}) raised {}", function, arg, exc);
                    continue;
                }
                Ok(Ok(())) => {}
            }

            match ctx.fs().list_pdfs() {
                Ok(pdfs) if !pdfs.is_empty() => {
                    info!("auto-invoke: {}() produced {}", function, pdfs.join(", "));
                    return Some(Resolved {
                        outcome: Outcome::AutoInvoked { function },
                        artifacts: pdfs,
                    });
                }
                // Ran cleanly without a PDF: the argument form is not tried.
                Ok(_) => break,
                Err(e) => {
                    warn!("auto-invoke: cannot list sandbox: {}", e);
                    return None;
                }
            }
        }
    }
    None
}

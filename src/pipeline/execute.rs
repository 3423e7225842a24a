//! Execution: run the buffer once, under a wall-clock limit.
//!
//! Printed output is captured for the duration of the run and handed back
//! whatever the outcome, so a later stage can turn it into a document. The
//! previous stdout sink is restored on every path, including timeouts.

use super::diagnose::{diagnose_exception, Diagnosis};
use crate::sandbox::{ExecutionContext, Runtime};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// PDF file names found in the sandbox after the run (possibly none).
    Success(Vec<String>),
    Failure(Diagnosis),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }
}

/// Run `code` in `ctx`.
///
/// Returns the outcome and everything the code printed.
pub async fn execute(
    runtime: &dyn Runtime,
    code: &str,
    ctx: &mut ExecutionContext,
    timeout: Duration,
) -> (ExecutionResult, String) {
    let redirect = ctx.redirect_stdout();
    let outcome = tokio::time::timeout(timeout, runtime.execute(code, ctx)).await;
    let stdout = ctx.restore_stdout(redirect);

    let result = match outcome {
        Err(_) => {
            warn!("Execution timed out after {:?}", timeout);
            ExecutionResult::Failure(Diagnosis::timeout(timeout.as_secs().max(1)))
        }
        Ok(Err(exc)) => {
            debug!("Execution raised {}", exc);
            ExecutionResult::Failure(diagnose_exception(code, &exc))
        }
        Ok(Ok(())) => match ctx.fs().list_pdfs() {
            Ok(pdfs) => {
                debug!("Execution finished, {} PDF(s) in sandbox", pdfs.len());
                ExecutionResult::Success(pdfs)
            }
            Err(e) => ExecutionResult::Failure(Diagnosis::system(e.to_string())),
        },
    };
    (result, stdout)
}

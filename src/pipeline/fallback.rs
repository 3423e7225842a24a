//! Fallback: when nothing else can be delivered, deliver the failure.
//!
//! The report is one document: the error line in red, a gap, then the
//! original (un-normalised) source in black, Courier throughout. Individual
//! text blocks that cannot be drawn are skipped with a warning. Only a
//! failure to store the report itself is an error.

use super::diagnose::Diagnosis;
use crate::draw::{latin1_lossy, line_height, pdf::DEFAULT_FONT_SIZE, Cell, Color, FontFamily};
use crate::error::Code2PdfError;
use crate::sandbox::Sandbox;
use tracing::{info, warn};

/// File name of the error report.
pub const FALLBACK_PDF_NAME: &str = "error_report.pdf";

/// Vertical gap (mm) between the error line and the source listing.
const SECTION_GAP: f32 = 10.0;

/// Render `diagnosis` and `original_code` to [`FALLBACK_PDF_NAME`].
pub fn render_fallback(
    sandbox: &Sandbox,
    diagnosis: &Diagnosis,
    original_code: &str,
    font_size: Option<u32>,
) -> Result<String, Code2PdfError> {
    let size = font_size.map(|s| s as f32).unwrap_or(DEFAULT_FONT_SIZE);
    let height = line_height(size);
    let mut doc = sandbox.document();
    doc.add_page();
    doc.set_font(FontFamily::Courier, size);

    doc.set_text_color(Color::RED);
    let headline = latin1_lossy(&format!("ERROR: {}", diagnosis.message));
    if let Err(e) = doc.multi_cell(Cell::auto(height, headline)) {
        warn!("Fallback report: error line skipped ({})", e);
    }
    doc.ln(Some(SECTION_GAP));

    doc.set_text_color(Color::BLACK);
    if !original_code.is_empty() {
        if let Err(e) = doc.multi_cell(Cell::auto(height, latin1_lossy(original_code))) {
            warn!("Fallback report: source listing skipped ({})", e);
        }
    }

    let name = doc
        .output(FALLBACK_PDF_NAME)
        .map_err(|e| Code2PdfError::OutputWriteFailed {
            path: FALLBACK_PDF_NAME.into(),
            source: std::io::Error::other(e.to_string()),
        })?;
    info!("Rendered fallback report for {}", diagnosis.type_name);
    Ok(name)
}

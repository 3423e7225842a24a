//! Behaviour patches for the drawing capability, as decorators.
//!
//! Pasted code routinely does two things the drawing primitives reject:
//!
//! 1. Calls `multi_cell(0, …)` twice in a row. The first cell leaves the
//!    cursor at the right margin, so the second "rest of the line" cell has
//!    zero room. [`ZeroWidthCell`] computes the remaining width itself and
//!    breaks the line first when almost nothing is left.
//! 2. Draws text with emoji or typographic quotes in a core font.
//!    [`EncodingFallback`] retries once with the text squashed to Latin-1.
//!
//! The decorators compose around any [`DrawingBackend`] and are applied once
//! when the sandbox is built (see [`crate::sandbox::Sandbox`]); no shared
//! state is mutated.

use super::{latin1_lossy, Cell, Color, DrawError, DrawingBackend, FontFamily};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Below this remaining width (mm) a zero-width cell starts on a new line.
pub const MIN_CELL_WIDTH: f32 = 5.0;

/// Which patches the sandbox installs on every document it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub zero_width_cell: bool,
    pub encoding_fallback: bool,
}

impl Default for PatchSet {
    fn default() -> Self {
        Self {
            zero_width_cell: true,
            encoding_fallback: true,
        }
    }
}

impl PatchSet {
    /// No patches: user code sees the raw backend.
    pub fn none() -> Self {
        Self {
            zero_width_cell: false,
            encoding_fallback: false,
        }
    }

    /// Wrap `backend` with the enabled patches.
    ///
    /// The zero-width patch sits outside so the encoding retry reuses the
    /// width it computed.
    pub fn apply(self, backend: Box<dyn DrawingBackend>) -> Box<dyn DrawingBackend> {
        let mut backend = backend;
        if self.encoding_fallback {
            backend = Box::new(EncodingFallback::new(backend));
        }
        if self.zero_width_cell {
            backend = Box::new(ZeroWidthCell::new(backend));
        }
        backend
    }
}

macro_rules! delegate_drawing {
    () => {
        fn add_page(&mut self) {
            self.inner.add_page()
        }
        fn set_font(&mut self, family: FontFamily, size: f32) {
            self.inner.set_font(family, size)
        }
        fn set_font_size(&mut self, size: f32) {
            self.inner.set_font_size(size)
        }
        fn set_text_color(&mut self, color: Color) {
            self.inner.set_text_color(color)
        }
        fn page_width(&self) -> f32 {
            self.inner.page_width()
        }
        fn right_margin(&self) -> f32 {
            self.inner.right_margin()
        }
        fn x(&self) -> f32 {
            self.inner.x()
        }
        fn ln(&mut self, height: Option<f32>) {
            self.inner.ln(height)
        }
        fn output(&mut self, name: &str) -> Result<String, DrawError> {
            self.inner.output(name)
        }
    };
}

// ── Zero-width cell ──────────────────────────────────────────────────────────

/// Resolves `width == 0` cells against the live cursor.
#[derive(Debug)]
pub struct ZeroWidthCell<B> {
    inner: B,
}

impl<B: DrawingBackend> ZeroWidthCell<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    fn remaining_width(&self) -> f32 {
        self.inner.page_width() - self.inner.right_margin() - self.inner.x()
    }
}

impl<B: DrawingBackend> DrawingBackend for ZeroWidthCell<B> {
    delegate_drawing!();

    fn multi_cell(&mut self, mut cell: Cell) -> Result<(), DrawError> {
        if cell.width == 0.0 {
            let mut available = self.remaining_width();
            if available < MIN_CELL_WIDTH {
                debug!("zero-width cell: {:.1}mm left, breaking line", available);
                self.inner.ln(None);
                available = self.remaining_width();
            }
            cell.width = available;
        }
        self.inner.multi_cell(cell)
    }
}

// ── Encoding fallback ────────────────────────────────────────────────────────

/// Retries a cell once with Latin-1-safe text after an encoding failure.
#[derive(Debug)]
pub struct EncodingFallback<B> {
    inner: B,
}

impl<B: DrawingBackend> EncodingFallback<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: DrawingBackend> DrawingBackend for EncodingFallback<B> {
    delegate_drawing!();

    fn multi_cell(&mut self, cell: Cell) -> Result<(), DrawError> {
        match self.inner.multi_cell(cell.clone()) {
            Err(original) if original.is_encoding_error() && !cell.text.is_empty() => {
                debug!("encoding fallback: retrying cell as Latin-1 ({original})");
                let retry = Cell {
                    text: latin1_lossy(&cell.text),
                    ..cell
                };
                self.inner.multi_cell(retry).map_err(|_| original)
            }
            other => other,
        }
    }
}

//! The PDF-drawing capability handed to user code.
//!
//! [`DrawingBackend`] is the narrow page/font/colour/cell/save surface that a
//! runtime binds user drawing calls to. [`pdf::PdfDocument`] is the native
//! implementation; [`patches`] holds the decorators that smooth over the two
//! failure modes pasted code hits most (zero-width cells after a previous
//! cell, and characters the core fonts cannot encode).
//!
//! Units are millimetres throughout, font sizes are points.

pub mod patches;
pub mod pdf;

use thiserror::Error;

pub use patches::{EncodingFallback, PatchSet, ZeroWidthCell};
pub use pdf::PdfDocument;

/// The three standard Type1 families every PDF viewer ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontFamily {
    /// Monospaced. Used for every text block the pipeline draws itself.
    #[default]
    Courier,
    Helvetica,
    Times,
}

impl FontFamily {
    /// PostScript name used in the font dictionary.
    pub fn base_font(self) -> &'static str {
        match self {
            FontFamily::Courier => "Courier",
            FontFamily::Helvetica => "Helvetica",
            FontFamily::Times => "Times-Roman",
        }
    }

    /// Resource name the page content streams refer to.
    pub(crate) fn resource_name(self) -> &'static str {
        match self {
            FontFamily::Courier => "F1",
            FontFamily::Helvetica => "F2",
            FontFamily::Times => "F3",
        }
    }

    /// Average glyph advance in thousandths of an em.
    ///
    /// Exact for Courier; an average for the proportional faces, which is
    /// enough for line wrapping.
    pub(crate) fn advance(self) -> f32 {
        match self {
            FontFamily::Courier => 600.0,
            FontFamily::Helvetica => 556.0,
            FontFamily::Times => 500.0,
        }
    }

    /// Case-insensitive lookup by the names drawing libraries accept.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "courier" | "mono" | "monospace" => Some(FontFamily::Courier),
            "helvetica" | "arial" | "sans" => Some(FontFamily::Helvetica),
            "times" | "times-roman" | "serif" => Some(FontFamily::Times),
            _ => None,
        }
    }
}

/// RGB text colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

/// Arguments of one wrapped-text cell.
///
/// A `width` of `0.0` requests "the rest of the line", as drawing libraries
/// conventionally spell it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub width: f32,
    pub height: f32,
    pub text: String,
}

impl Cell {
    pub fn new(width: f32, height: f32, text: impl Into<String>) -> Self {
        Self {
            width,
            height,
            text: text.into(),
        }
    }

    /// A cell spanning the remaining line width.
    pub fn auto(height: f32, text: impl Into<String>) -> Self {
        Self::new(0.0, height, text)
    }
}

/// Failures of the drawing capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DrawError {
    #[error("No page open, you need to call add_page() first")]
    NoPageOpen,

    #[error("Not enough horizontal space to render a single character (width {width:.2}mm)")]
    NotEnoughSpace { width: f32 },

    #[error(
        "Character \"{ch}\" at index {index} in text is outside the range of characters \
supported by the font used: \"{font}\""
    )]
    Encoding { ch: char, index: usize, font: String },

    #[error("PDF serialisation failed: {0}")]
    Pdf(String),

    #[error("Could not store '{name}': {detail}")]
    Storage { name: String, detail: String },
}

impl DrawError {
    /// Whether the failure is an encoding-range problem a lossy re-encode can fix.
    ///
    /// Matched on the message text, so errors raised by foreign drawing
    /// libraries (which only reach us as strings) qualify too.
    pub fn is_encoding_error(&self) -> bool {
        is_encoding_message(&self.to_string())
    }
}

const ENCODING_MARKERS: [&str; 3] = ["outside the range", "codec can't encode", "character map"];

/// True when an error text reports a character the font cannot encode.
pub fn is_encoding_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ENCODING_MARKERS.iter().any(|m| lower.contains(m))
}

/// Page/font/colour/cell/save primitives a runtime exposes to user code.
pub trait DrawingBackend: Send {
    fn add_page(&mut self);
    fn set_font(&mut self, family: FontFamily, size: f32);
    fn set_font_size(&mut self, size: f32);
    fn set_text_color(&mut self, color: Color);

    /// Full page width in millimetres.
    fn page_width(&self) -> f32;
    fn right_margin(&self) -> f32;
    /// Current horizontal cursor.
    fn x(&self) -> f32;

    /// Line break: cursor back to the left margin and down by `height`
    /// (the last cell height when `None`).
    fn ln(&mut self, height: Option<f32>);

    /// Draw `cell.text` wrapped inside a box of `cell.width`.
    fn multi_cell(&mut self, cell: Cell) -> Result<(), DrawError>;

    /// Serialise the document and store it under `name` in the sandbox.
    /// Returns the stored name.
    fn output(&mut self, name: &str) -> Result<String, DrawError>;
}

impl<B: DrawingBackend + ?Sized> DrawingBackend for Box<B> {
    fn add_page(&mut self) {
        (**self).add_page()
    }
    fn set_font(&mut self, family: FontFamily, size: f32) {
        (**self).set_font(family, size)
    }
    fn set_font_size(&mut self, size: f32) {
        (**self).set_font_size(size)
    }
    fn set_text_color(&mut self, color: Color) {
        (**self).set_text_color(color)
    }
    fn page_width(&self) -> f32 {
        (**self).page_width()
    }
    fn right_margin(&self) -> f32 {
        (**self).right_margin()
    }
    fn x(&self) -> f32 {
        (**self).x()
    }
    fn ln(&mut self, height: Option<f32>) {
        (**self).ln(height)
    }
    fn multi_cell(&mut self, cell: Cell) -> Result<(), DrawError> {
        (**self).multi_cell(cell)
    }
    fn output(&mut self, name: &str) -> Result<String, DrawError> {
        (**self).output(name)
    }
}

/// Line height (mm) for text set at `font_size` points.
pub fn line_height(font_size: f32) -> f32 {
    font_size * 0.5
}

/// Re-encode `text` to Latin-1, replacing anything outside it with `?`.
pub fn latin1_lossy(text: &str) -> String {
    text.chars()
        .map(|c| if (c as u32) <= 0xFF { c } else { '?' })
        .collect()
}

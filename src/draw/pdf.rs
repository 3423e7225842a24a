//! Native PDF writer backing [`DrawingBackend`].
//!
//! Lays out wrapped text on A4 pages with the standard Type1 fonts and
//! serialises through `lopdf`. Cursor semantics follow the common Python
//! drawing libraries: after a `multi_cell` the cursor stays at the cell's
//! right edge on the next line, so a second zero-width cell finds no room
//! unless something breaks the line first (see [`super::ZeroWidthCell`]).

use super::{Cell, Color, DrawError, DrawingBackend, FontFamily};
use crate::sandbox::SandboxFs;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A4 width in millimetres.
pub const PAGE_WIDTH: f32 = 210.0;
/// A4 height in millimetres.
pub const PAGE_HEIGHT: f32 = 297.0;
/// Left, top and right margin.
pub const MARGIN: f32 = 10.0;
/// Distance from the bottom edge that triggers an automatic page break.
pub const BREAK_MARGIN: f32 = 20.0;
/// Inner horizontal padding of a cell.
pub const CELL_PADDING: f32 = 1.0;
/// Default font size in points.
pub const DEFAULT_FONT_SIZE: f32 = 12.0;

const PT_PER_MM: f32 = 72.0 / 25.4;
const TAB_WIDTH: usize = 4;

/// A document under construction.
pub struct PdfDocument {
    fs: Arc<dyn SandboxFs>,
    pages: Vec<Vec<Operation>>,
    family: FontFamily,
    font_size: f32,
    color: Color,
    x: f32,
    y: f32,
    last_height: f32,
}

impl fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfDocument")
            .field("pages", &self.pages.len())
            .field("family", &self.family)
            .field("font_size", &self.font_size)
            .field("x", &self.x)
            .field("y", &self.y)
            .finish()
    }
}

impl PdfDocument {
    /// An empty document whose `output` stores into `fs`.
    pub fn new(fs: Arc<dyn SandboxFs>) -> Self {
        Self {
            fs,
            pages: Vec::new(),
            family: FontFamily::default(),
            font_size: DEFAULT_FONT_SIZE,
            color: Color::BLACK,
            x: MARGIN,
            y: MARGIN,
            last_height: 0.0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Current vertical cursor.
    pub fn y(&self) -> f32 {
        self.y
    }

    fn char_width(&self) -> f32 {
        self.family.advance() / 1000.0 * self.font_size / PT_PER_MM
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.x = MARGIN;
        self.y = MARGIN;
    }

    fn draw_line(&mut self, x: f32, top: f32, height: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        let size_mm = self.font_size / PT_PER_MM;
        let baseline = top + height / 2.0 + size_mm * 0.3;
        let ops = [
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(self.family.resource_name().as_bytes().to_vec()),
                    real(self.font_size),
                ],
            ),
            Operation::new(
                "rg",
                vec![
                    real(self.color.r as f32 / 255.0),
                    real(self.color.g as f32 / 255.0),
                    real(self.color.b as f32 / 255.0),
                ],
            ),
            Operation::new(
                "Td",
                vec![real(x * PT_PER_MM), real((PAGE_HEIGHT - baseline) * PT_PER_MM)],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(
                    text.chars().map(|c| c as u8).collect(),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ];
        if let Some(page) = self.pages.last_mut() {
            page.extend(ops);
        }
    }

    /// Serialise to PDF bytes. A document without pages gets one blank page.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DrawError> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();

        let mut fonts = lopdf::Dictionary::new();
        for family in [FontFamily::Courier, FontFamily::Helvetica, FontFamily::Times] {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => family.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(family.resource_name(), Object::Reference(font_id));
        }
        let resources_id = doc.add_object(dictionary! { "Font" => fonts });

        let blank: Vec<Vec<Operation>> = vec![Vec::new()];
        let pages = if self.pages.is_empty() {
            &blank
        } else {
            &self.pages
        };

        let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
        for operations in pages {
            let page_id = add_page_object(&mut doc, pages_id, resources_id, operations)?;
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| DrawError::Pdf(e.to_string()))?;
        Ok(buffer)
    }
}

fn add_page_object(
    doc: &mut Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    operations: &[Operation],
) -> Result<ObjectId, DrawError> {
    let content = Content {
        operations: operations.to_vec(),
    };
    let bytes = content
        .encode()
        .map_err(|e| DrawError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "Resources" => Object::Reference(resources_id),
        "Contents" => Object::Reference(content_id),
        "MediaBox" => vec![
            real(0.0),
            real(0.0),
            real(PAGE_WIDTH * PT_PER_MM),
            real(PAGE_HEIGHT * PT_PER_MM),
        ],
    }))
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

/// Expand tabs and drop carriage returns; layout works on plain lines.
fn prepare_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', &" ".repeat(TAB_WIDTH))
}

/// First character the WinAnsi core fonts cannot show.
fn first_unencodable(text: &str) -> Option<(usize, char)> {
    text.chars()
        .enumerate()
        .find(|(_, c)| (*c as u32) > 0xFF)
}

/// Greedy word wrap to at most `max_chars` characters per line.
///
/// Leading indentation is kept, runs of spaces inside a line are kept, and
/// words longer than a line are split hard.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let chars: Vec<char> = paragraph.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut start = 0;
        while start < chars.len() {
            if chars.len() - start <= max_chars {
                lines.push(chars[start..].iter().collect());
                break;
            }
            let window_end = start + max_chars;
            // Break after the last space inside the window, if any.
            let split = chars[start..=window_end.min(chars.len() - 1)]
                .iter()
                .rposition(|c| *c == ' ')
                .map(|p| start + p)
                .filter(|&p| p > start);
            match split {
                Some(p) => {
                    lines.push(chars[start..p].iter().collect());
                    start = p + 1;
                }
                None => {
                    lines.push(chars[start..window_end].iter().collect());
                    start = window_end;
                }
            }
        }
    }
    lines
}

impl DrawingBackend for PdfDocument {
    fn add_page(&mut self) {
        self.new_page();
    }

    fn set_font(&mut self, family: FontFamily, size: f32) {
        self.family = family;
        self.set_font_size(size);
    }

    fn set_font_size(&mut self, size: f32) {
        if size > 0.0 {
            self.font_size = size;
        }
    }

    fn set_text_color(&mut self, color: Color) {
        self.color = color;
    }

    fn page_width(&self) -> f32 {
        PAGE_WIDTH
    }

    fn right_margin(&self) -> f32 {
        MARGIN
    }

    fn x(&self) -> f32 {
        self.x
    }

    fn ln(&mut self, height: Option<f32>) {
        self.x = MARGIN;
        self.y += height.unwrap_or(self.last_height);
    }

    fn multi_cell(&mut self, cell: Cell) -> Result<(), DrawError> {
        if self.pages.is_empty() {
            return Err(DrawError::NoPageOpen);
        }
        let text = prepare_text(&cell.text);
        if let Some((index, ch)) = first_unencodable(&text) {
            return Err(DrawError::Encoding {
                ch,
                index,
                font: self.family.base_font().to_string(),
            });
        }

        let width = if cell.width <= 0.0 {
            self.page_width() - self.right_margin() - self.x
        } else {
            cell.width
        };
        let char_width = self.char_width();
        let usable = width - 2.0 * CELL_PADDING;
        if usable < char_width {
            return Err(DrawError::NotEnoughSpace { width });
        }
        let height = if cell.height > 0.0 {
            cell.height
        } else {
            self.font_size / PT_PER_MM * 1.25
        };

        let max_chars = (usable / char_width).floor() as usize;
        let x_start = self.x;
        for line in wrap(&text, max_chars) {
            if self.y + height > PAGE_HEIGHT - BREAK_MARGIN {
                self.new_page();
            }
            let top = self.y;
            self.draw_line(x_start + CELL_PADDING, top, height, &line);
            self.y += height;
        }
        self.x = x_start + width;
        self.last_height = height;
        Ok(())
    }

    fn output(&mut self, name: &str) -> Result<String, DrawError> {
        let bytes = self.to_bytes()?;
        self.fs
            .write(name, &bytes)
            .map_err(|e| DrawError::Storage {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        debug!("Saved {} ({} pages, {} bytes)", name, self.pages.len().max(1), bytes.len());
        Ok(name.to_string())
    }
}

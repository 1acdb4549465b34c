//! Rebuild the visual lines of a PDF page from text positioning operators.
//!
//! lopdf's plain text extraction follows content-stream order and drops
//! positioning, so cells drawn in separate text blocks or placed with `Td`
//! moves never end up side by side. Here every shown string is placed at its
//! text-space origin, strings are grouped into rows by baseline and ordered
//! by x, and horizontal gaps wider than an em become a two-space cell break.

use anyhow::{Context, Result};
use lopdf::content::Content;
use lopdf::{Object, ObjectId};

/// Baselines closer than this (in text-space units) share a row
const ROW_TOLERANCE: f32 = 2.0;

/// Rough glyph advance as a fraction of the font size, used without metrics
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

/// Horizontal gap, in ems, that separates two cells
const CELL_GAP_EMS: f32 = 1.0;

const DEFAULT_FONT_SIZE: f32 = 12.0;

/// A string drawn at a position on the page
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl TextRun {
    fn estimated_end(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * AVERAGE_GLYPH_WIDTH
    }
}

/// Text state carried between operators
struct TextCursor {
    line_x: f32,
    line_y: f32,
    x: f32,
    y: f32,
    font_size: f32,
    leading: f32,
}

impl TextCursor {
    fn new() -> Self {
        TextCursor {
            line_x: 0.0,
            line_y: 0.0,
            x: 0.0,
            y: 0.0,
            font_size: DEFAULT_FONT_SIZE,
            leading: 0.0,
        }
    }

    fn begin_text(&mut self) {
        self.move_to(0.0, 0.0);
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.line_x = x;
        self.line_y = y;
        self.x = x;
        self.y = y;
    }

    fn next_line(&mut self) {
        self.move_to(self.line_x, self.line_y - self.leading);
    }

    fn show(&mut self, text: String, runs: &mut Vec<TextRun>) {
        if text.trim().is_empty() {
            return;
        }
        let run = TextRun {
            x: self.x,
            y: self.y,
            font_size: self.font_size,
            text,
        };
        self.x = run.estimated_end();
        runs.push(run);
    }

    /// `TJ`: strings with kerning adjustments in thousandths of an em
    fn show_array(&mut self, items: &[Object], runs: &mut Vec<TextRun>) {
        let mut pending = String::new();
        for item in items {
            match item {
                Object::String(bytes, _) => pending.push_str(&decode_pdf_string(bytes)),
                other => {
                    let Some(adjustment) = number(other) else {
                        continue;
                    };
                    let shift = -adjustment / 1000.0;
                    if shift >= CELL_GAP_EMS {
                        self.show(std::mem::take(&mut pending), runs);
                        self.x += shift * self.font_size;
                    } else if shift >= 0.2 && !pending.ends_with(' ') {
                        pending.push(' ');
                    }
                }
            }
        }
        self.show(pending, runs);
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Latin-1 for simple fonts, UTF-16 when the string carries a byte order mark
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Positioned strings of a page, in content-stream order
pub fn page_runs(pdf: &lopdf::Document, page_id: ObjectId) -> Result<Vec<TextRun>> {
    let raw = pdf
        .get_page_content(page_id)
        .context("Failed to read page content stream")?;
    let content = Content::decode(&raw).context("Failed to decode page content stream")?;

    let mut cursor = TextCursor::new();
    let mut runs = Vec::new();

    for operation in &content.operations {
        let operands = &operation.operands;
        let arg = |i: usize| operands.get(i).and_then(number);

        match operation.operator.as_str() {
            "BT" => cursor.begin_text(),
            "Tf" => {
                if let Some(size) = arg(1) {
                    cursor.font_size = size.abs().max(1.0);
                }
            }
            "TL" => cursor.leading = arg(0).unwrap_or(0.0),
            "Td" | "TD" => {
                let (tx, ty) = (arg(0).unwrap_or(0.0), arg(1).unwrap_or(0.0));
                if operation.operator == "TD" {
                    cursor.leading = -ty;
                }
                cursor.move_to(cursor.line_x + tx, cursor.line_y + ty);
            }
            "Tm" => cursor.move_to(arg(4).unwrap_or(0.0), arg(5).unwrap_or(0.0)),
            "T*" => cursor.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    cursor.show(decode_pdf_string(bytes), &mut runs);
                }
            }
            "'" | "\"" => {
                cursor.next_line();
                if let Some(Object::String(bytes, _)) = operands.last() {
                    cursor.show(decode_pdf_string(bytes), &mut runs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    cursor.show_array(items, &mut runs);
                }
            }
            _ => {}
        }
    }

    Ok(runs)
}

/// Lay runs out top to bottom, left to right; wide gaps become two spaces
pub fn layout_lines(runs: &[TextRun]) -> String {
    let mut sorted: Vec<&TextRun> = runs.iter().collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<Vec<&TextRun>> = Vec::new();
    for run in sorted {
        match rows.last_mut() {
            Some(row) if (row[0].y - run.y).abs() <= ROW_TOLERANCE => row.push(run),
            _ => rows.push(vec![run]),
        }
    }

    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
            let mut line = String::new();
            let mut previous: Option<&TextRun> = None;
            for run in row {
                if let Some(prev) = previous {
                    let gap = run.x - prev.estimated_end();
                    if gap >= CELL_GAP_EMS * prev.font_size {
                        line.push_str("  ");
                    } else if !line.ends_with(' ') && !run.text.starts_with(' ') {
                        line.push(' ');
                    }
                }
                line.push_str(run.text.trim_matches(|c| c == '\n' || c == '\r'));
                previous = Some(run);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

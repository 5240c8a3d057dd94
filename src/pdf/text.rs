//! Text flattening
//!
//! Produces the document's text as ordered lines, in content stream order.
//! A new line starts whenever a string is shown on a different baseline
//! than the previous one, and at every page boundary. Strings shown on the
//! same baseline are joined, with a space where the text position was
//! moved explicitly between them.

use lopdf::{Dictionary, Document, Encoding, Object};
use tracing::{debug, trace};

use super::resources::{page_resources, resolve_font, resolve_xobject, XObject};
use super::{decode_operations, PdfDocument};
use crate::error::{Error, Result};

/// Forms nested deeper than this are treated as a malformed document
const MAX_FORM_DEPTH: usize = 32;

/// TJ adjustments below this (thousandths of text space) read as a word gap
const WORD_GAP_ADJUSTMENT: f32 = -200.0;

/// Represents a PDF transformation matrix [a b c d e f]
/// where: x' = a*x + c*y + e, y' = b*x + d*y + f
#[derive(Debug, Clone, Copy, PartialEq)]
struct TransformMatrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl TransformMatrix {
    /// Identity matrix (no transformation)
    fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 }
    }

    fn translation(tx: f32, ty: f32) -> Self {
        Self { e: tx, f: ty, ..Self::identity() }
    }

    /// Build from six numeric operands (`cm`, `Tm`, form `/Matrix`)
    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f32> = operands.iter().filter_map(|o| o.as_float().ok()).collect();
        match values.as_slice() {
            [a, b, c, d, e, f] => Some(Self { a: *a, b: *b, c: *c, d: *d, e: *e, f: *f }),
            _ => None,
        }
    }

    /// `self` applied first, then `other`
    fn then(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }
}

/// Extract all text as one string, lines separated by `\n`
pub fn extract_text(document: &PdfDocument) -> Result<String> {
    let doc = document.inner();
    let mut collector = LineCollector::default();

    for page_id in document.pages() {
        let resources = page_resources(doc, page_id)?;
        let content = doc.get_page_content(page_id)?;
        let mut interpreter = TextInterpreter::new(doc, TransformMatrix::identity());
        interpreter.run(&content, resources, &mut collector, 0)?;
        collector.break_line();
    }

    debug!(lines = collector.lines.len(), "flattened document text");
    Ok(collector.lines.join("\n"))
}

/// Document text as lines, with `\r\n` and lone `\r` treated as `\n`
pub fn text_lines(document: &PdfDocument) -> Result<Vec<String>> {
    let text = extract_text(document)?;
    Ok(split_lines(&text))
}

/// Normalize line terminators and split
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct LineCollector {
    lines: Vec<String>,
    /// Baseline of the last line, `None` when the next show starts a new line
    baseline: Option<f32>,
}

impl LineCollector {
    fn break_line(&mut self) {
        self.baseline = None;
    }

    fn show(&mut self, text: &str, baseline: f32, tolerance: f32, word_gap: bool) {
        let same_line = matches!(self.baseline, Some(y) if (y - baseline).abs() <= tolerance);
        if !same_line {
            self.lines.push(String::new());
            self.baseline = Some(baseline);
        }
        if let Some(line) = self.lines.last_mut() {
            let needs_space = word_gap
                && !line.is_empty()
                && !line.ends_with(char::is_whitespace)
                && !text.starts_with(char::is_whitespace);
            if needs_space {
                line.push(' ');
            }
            line.push_str(text);
        }
    }
}

struct TextInterpreter<'a> {
    doc: &'a Document,
    ctm: TransformMatrix,
    saved: Vec<TransformMatrix>,
    text_matrix: TransformMatrix,
    line_matrix: TransformMatrix,
    leading: f32,
    font: Option<Encoding<'a>>,
    font_size: f32,
    /// Set by positioning operators, cleared by the next show
    moved: bool,
}

impl<'a> TextInterpreter<'a> {
    fn new(doc: &'a Document, ctm: TransformMatrix) -> Self {
        Self {
            doc,
            ctm,
            saved: Vec::new(),
            text_matrix: TransformMatrix::identity(),
            line_matrix: TransformMatrix::identity(),
            leading: 0.0,
            font: None,
            font_size: 0.0,
            moved: false,
        }
    }

    fn run(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        out: &mut LineCollector,
        depth: usize,
    ) -> Result<()> {
        for operation in decode_operations(content)? {
            let operands = operation.operands.as_slice();
            match operation.operator.as_str() {
                "q" => self.saved.push(self.ctm),
                "Q" => {
                    if let Some(ctm) = self.saved.pop() {
                        self.ctm = ctm;
                    }
                }
                "cm" => {
                    if let Some(m) = TransformMatrix::from_operands(operands) {
                        self.ctm = m.then(&self.ctm);
                    }
                }
                "BT" => {
                    self.text_matrix = TransformMatrix::identity();
                    self.line_matrix = TransformMatrix::identity();
                }
                "Tf" => self.set_font(resources, operands),
                "TL" => {
                    if let Some(leading) = number(operands, 0) {
                        self.leading = leading;
                    }
                }
                "Td" => self.move_line(number(operands, 0), number(operands, 1)),
                "TD" => {
                    if let Some(ty) = number(operands, 1) {
                        self.leading = -ty;
                    }
                    self.move_line(number(operands, 0), number(operands, 1));
                }
                "Tm" => {
                    if let Some(m) = TransformMatrix::from_operands(operands) {
                        self.text_matrix = m;
                        self.line_matrix = m;
                        self.moved = true;
                    }
                }
                "T*" => self.next_line(),
                "Tj" => {
                    if let Some(bytes) = operands.first().and_then(|o| o.as_str().ok()) {
                        self.show(bytes, out);
                    }
                }
                "'" => {
                    self.next_line();
                    if let Some(bytes) = operands.first().and_then(|o| o.as_str().ok()) {
                        self.show(bytes, out);
                    }
                }
                "\"" => {
                    self.next_line();
                    if let Some(bytes) = operands.get(2).and_then(|o| o.as_str().ok()) {
                        self.show(bytes, out);
                    }
                }
                "TJ" => {
                    if let Some(items) = operands.first().and_then(|o| o.as_array().ok()) {
                        self.show_array(items, out);
                    }
                }
                "Do" => self.draw_form(resources, operands, out, depth)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn set_font(&mut self, resources: Option<&'a Dictionary>, operands: &[Object]) {
        self.font_size = number(operands, 1).unwrap_or(self.font_size);
        let name = match operands.first().and_then(|o| o.as_name().ok()) {
            Some(name) => name,
            None => return,
        };
        self.font = resolve_font(self.doc, resources, name).and_then(|font| {
            font.get_font_encoding(self.doc)
                .map_err(|e| trace!(error = %e, "font encoding unavailable"))
                .ok()
        });
    }

    fn move_line(&mut self, tx: Option<f32>, ty: Option<f32>) {
        let translation = TransformMatrix::translation(tx.unwrap_or(0.0), ty.unwrap_or(0.0));
        self.line_matrix = translation.then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
        self.moved = true;
    }

    fn next_line(&mut self) {
        self.move_line(Some(0.0), Some(-self.leading));
    }

    fn baseline(&self) -> f32 {
        self.text_matrix.then(&self.ctm).f
    }

    fn tolerance(&self) -> f32 {
        let scale = self.text_matrix.then(&self.ctm).d.abs();
        (self.font_size.abs() * scale * 0.3).max(1.0)
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if let Some(encoding) = &self.font {
            if let Ok(text) = Document::decode_text(encoding, bytes) {
                return text;
            }
        }
        fallback_decode(bytes)
    }

    fn show(&mut self, bytes: &[u8], out: &mut LineCollector) {
        let text = self.decode(bytes);
        out.show(&text, self.baseline(), self.tolerance(), self.moved);
        self.moved = false;
    }

    fn show_array(&mut self, items: &[Object], out: &mut LineCollector) {
        let mut text = String::new();
        for item in items {
            match item {
                Object::String(bytes, _) => text.push_str(&self.decode(bytes)),
                other => {
                    let gap = other.as_float().map(|n| n < WORD_GAP_ADJUSTMENT).unwrap_or(false);
                    if gap && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }
        out.show(&text, self.baseline(), self.tolerance(), self.moved);
        self.moved = false;
    }

    fn draw_form(
        &mut self,
        resources: Option<&'a Dictionary>,
        operands: &[Object],
        out: &mut LineCollector,
        depth: usize,
    ) -> Result<()> {
        let name = operands
            .first()
            .ok_or_else(|| Error::MalformedDocument(lopdf::Error::InvalidStream("Do without operand".to_string())))?
            .as_name()?;

        if let Some(XObject::Form { stream, resources: form_resources, .. }) =
            resolve_xobject(self.doc, resources, name)
        {
            if depth >= MAX_FORM_DEPTH {
                return Err(lopdf::Error::ReferenceLimit.into());
            }
            let matrix = stream
                .dict
                .get(b"Matrix")
                .ok()
                .and_then(|m| m.as_array().ok())
                .and_then(|m| TransformMatrix::from_operands(m))
                .unwrap_or_else(TransformMatrix::identity);

            let content = stream.get_plain_content()?;
            let mut nested = TextInterpreter::new(self.doc, matrix.then(&self.ctm));
            nested.run(&content, form_resources, out, depth + 1)?;
        }
        Ok(())
    }
}

fn number(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index).and_then(|o| o.as_float().ok())
}

/// Decode a string without font information
///
/// UTF-16BE when it carries a byte order mark, otherwise one byte per
/// character.
fn fallback_decode(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

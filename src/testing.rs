//! Synthetic document builders shared by unit tests

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use qrcode::{Color, QrCode};

/// Minimal single-font PDF builder
pub(crate) struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfBuilder {
    pub(crate) fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        Self { doc, pages_id, font_id, kids: Vec::new() }
    }

    /// Add an arbitrary object
    pub(crate) fn add<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.doc.add_object(object)
    }

    /// Overwrite an object, for documents with reference cycles
    pub(crate) fn replace<T: Into<Object>>(&mut self, id: ObjectId, object: T) {
        self.doc.objects.insert(id, object.into());
    }

    /// Add a page with the given content and named XObjects
    pub(crate) fn page(&mut self, content: &[u8], xobjects: &[(&str, ObjectId)]) -> &mut Self {
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let resources = self.resources(xobjects);
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        self.kids.push(page_id.into());
        self
    }

    /// Resource dictionary with the shared font and the given XObjects
    pub(crate) fn resources(&self, xobjects: &[(&str, ObjectId)]) -> Dictionary {
        let mut xobject_dict = Dictionary::new();
        for (name, id) in xobjects {
            xobject_dict.set(*name, *id);
        }
        dictionary! {
            "Font" => dictionary! { "F1" => self.font_id },
            "XObject" => xobject_dict,
        }
    }

    pub(crate) fn build(&mut self) -> Vec<u8> {
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids.clone(),
            "Count" => self.kids.len() as i64,
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).unwrap();
        bytes
    }
}

/// Uncompressed 8-bit DeviceGray image XObject
pub(crate) fn gray_image(width: usize, height: usize, pixels: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        pixels,
    )
}

/// Form XObject with its own resources
pub(crate) fn form(content: &[u8], resources: Dictionary) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Resources" => resources,
        },
        content.to_vec(),
    )
}

/// Render a QR symbol as 8-bit gray pixels, `scale` pixels per module
pub(crate) fn qr_pixels(payload: &str, scale: usize, quiet: usize) -> (usize, Vec<u8>) {
    let code = QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width();
    let colors = code.to_colors();
    let side = (modules + 2 * quiet) * scale;
    let mut pixels = vec![255u8; side * side];
    for y in 0..modules {
        for x in 0..modules {
            if colors[y * modules + x] == Color::Dark {
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = (x + quiet) * scale + dx;
                        let py = (y + quiet) * scale + dy;
                        pixels[py * side + px] = 0;
                    }
                }
            }
        }
    }
    (side, pixels)
}

/// A version 1 symbol with its data region wiped past error correction
pub(crate) fn damaged_qr_pixels() -> (usize, Vec<u8>) {
    let (side, mut pixels) = qr_pixels("ABC123", 4, 4);
    // Wipe a band through the middle of the data area
    let band = side / 2 - 6..side / 2 + 6;
    for y in band {
        for x in 16 + 7 * 4..side - 16 - 7 * 4 {
            pixels[y * side + x] = 255;
        }
    }
    // Also drop the right half of the data region
    for y in 16 + 9 * 4..side - 16 {
        for x in 16 + 9 * 4..side - 16 {
            pixels[y * side + x] = 0;
        }
    }
    (side, pixels)
}

/// Content stream drawing each line on its own baseline
pub(crate) fn text_content(lines: &[&str]) -> Vec<u8> {
    let mut content = String::new();
    for (i, line) in lines.iter().enumerate() {
        let y = 800 - 20 * i;
        let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        content.push_str(&format!("BT /F1 12 Tf 72 {} Td ({}) Tj ET\n", y, escaped));
    }
    content.into_bytes()
}

//! Content stream walker
//!
//! Finds the first raster image a document draws without rendering it. Only
//! the `Do` operator is interpreted: images end the walk, forms are walked
//! recursively in place, everything else is skipped.

use lopdf::{Dictionary, Document, ObjectId, Stream};
use tracing::{debug, warn};

use super::raster::RasterImage;
use super::resources::{page_resources, resolve_xobject, XObject};
use super::{decode_operations, PdfDocument};
use crate::error::{Error, Result};

/// Forms nested deeper than this are treated as a malformed document
const MAX_FORM_DEPTH: usize = 32;

/// Find and decode the first image drawn by the document
///
/// Pages are visited in document order. The walk stops at the first image
/// reached, so at most one image is ever decoded. `Ok(None)` means no image
/// was drawn, or the first one cannot be decoded to a pixel grid.
///
/// # Example
///
/// ```no_run
/// use gpasas::pdf::{find_first_image, PdfDocument};
///
/// let bytes = std::fs::read("certificate.pdf").expect("read");
/// let document = PdfDocument::open(&bytes).expect("parse");
/// if let Some(image) = find_first_image(&document).expect("walk") {
///     println!("{}x{}", image.width, image.height);
/// }
/// ```
pub fn find_first_image(document: &PdfDocument) -> Result<Option<RasterImage>> {
    let doc = document.inner();
    let stream = match locate_first_image(document)? {
        Some(stream) => stream,
        None => return Ok(None),
    };

    match RasterImage::from_stream(doc, stream) {
        Ok(image) => {
            debug!(width = image.width, height = image.height, "decoded first image");
            Ok(Some(image))
        }
        Err(e) => {
            warn!(error = %e, "first image could not be decoded");
            Ok(None)
        }
    }
}

/// Find the stream of the first image drawn by the document
pub fn locate_first_image(document: &PdfDocument) -> Result<Option<&Stream>> {
    let doc = document.inner();
    let mut walker = Walker {
        doc,
        active_forms: Vec::new(),
    };

    for page_id in document.pages() {
        let resources = page_resources(doc, page_id)?;
        let content = doc.get_page_content(page_id)?;
        if let Some(stream) = walker.walk(&content, resources, 0)? {
            return Ok(Some(stream));
        }
    }

    Ok(None)
}

struct Walker<'a> {
    doc: &'a Document,
    /// Forms currently being walked, to skip self-referencing forms
    active_forms: Vec<ObjectId>,
}

impl<'a> Walker<'a> {
    fn walk(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<Option<&'a Stream>> {
        for operation in decode_operations(content)? {
            if operation.operator != "Do" {
                continue;
            }

            let name = operation
                .operands
                .first()
                .ok_or_else(|| Error::MalformedDocument(lopdf::Error::InvalidStream("Do without operand".to_string())))?
                .as_name()?;

            match resolve_xobject(self.doc, resources, name) {
                Some(XObject::Image { stream, id }) => {
                    debug!(name = %String::from_utf8_lossy(name), ?id, "found image");
                    return Ok(Some(stream));
                }
                Some(XObject::Form { id, stream, resources: form_resources }) => {
                    if depth >= MAX_FORM_DEPTH {
                        return Err(lopdf::Error::ReferenceLimit.into());
                    }
                    if let Some(found) = self.walk_form(id, stream, form_resources, depth)? {
                        return Ok(Some(found));
                    }
                }
                None => {
                    debug!(name = %String::from_utf8_lossy(name), "skipping unresolved XObject");
                }
            }
        }

        Ok(None)
    }

    fn walk_form(
        &mut self,
        id: Option<ObjectId>,
        stream: &'a Stream,
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<Option<&'a Stream>> {
        if let Some(id) = id {
            if self.active_forms.contains(&id) {
                warn!(?id, "form draws itself, skipping");
                return Ok(None);
            }
            self.active_forms.push(id);
        }

        let content = stream.get_plain_content()?;
        let found = self.walk(&content, resources, depth + 1);

        if id.is_some() {
            self.active_forms.pop();
        }
        found
    }
}

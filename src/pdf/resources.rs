//! Resource table resolution
//!
//! Pages and forms name the objects they draw through a resource dictionary.
//! Entries may be direct or indirect at every level and pages may inherit
//! their resources from an ancestor in the page tree.

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::Result;

/// A graphical object resolved from a resource table
#[derive(Debug, Clone, Copy)]
pub enum XObject<'a> {
    /// Raster image
    Image {
        id: Option<ObjectId>,
        stream: &'a Stream,
    },
    /// Nested content group with its own instructions
    ///
    /// `resources` is the form's own resource table, or the table of the
    /// drawing context when the form does not carry one.
    Form {
        id: Option<ObjectId>,
        stream: &'a Stream,
        resources: Option<&'a Dictionary>,
    },
}

/// Dereference an object that should be a dictionary
pub fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    doc.dereference(object)
        .ok()
        .and_then(|(_, object)| object.as_dict().ok())
}

/// Resources of a page, inherited through the `/Parent` chain
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Result<Option<&Dictionary>> {
    let mut node = doc.get_dictionary(page_id)?;
    let mut seen = HashSet::from([page_id]);

    loop {
        if let Ok(resources) = node.get(b"Resources") {
            return Ok(resolve_dict(doc, resources));
        }

        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent_id) => {
                if !seen.insert(parent_id) {
                    return Err(lopdf::Error::ReferenceCycle(parent_id).into());
                }
                node = doc.get_dictionary(parent_id)?;
            }
            Err(_) => return Ok(None),
        }
    }
}

/// Look up a named entry of one resource category (`XObject`, `Font`, ...)
fn named_entry<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    category: &[u8],
    name: &[u8],
) -> Option<(Option<ObjectId>, &'a Object)> {
    let table = resolve_dict(doc, resources?.get(category).ok()?)?;
    doc.dereference(table.get(name).ok()?).ok()
}

/// Resolve a name used by the `Do` operator
///
/// Returns `None` for names that are missing or that point at something
/// other than an image or a form.
pub fn resolve_xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> Option<XObject<'a>> {
    let (id, object) = named_entry(doc, resources, b"XObject", name)?;
    let stream = object.as_stream().ok()?;

    match stream.dict.get(b"Subtype").and_then(Object::as_name) {
        Ok(b"Image") => Some(XObject::Image { id, stream }),
        Ok(b"Form") => {
            let own = stream
                .dict
                .get(b"Resources")
                .ok()
                .and_then(|r| resolve_dict(doc, r));
            Some(XObject::Form {
                id,
                stream,
                resources: own.or(resources),
            })
        }
        _ => None,
    }
}

/// Resolve a font name used by the `Tf` operator
pub fn resolve_font<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> Option<&'a Dictionary> {
    let (_, object) = named_entry(doc, resources, b"Font", name)?;
    object.as_dict().ok()
}

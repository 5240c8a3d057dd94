//! PDF document handling
//!
//! Everything that needs to look inside the uploaded certificate lives here:
//! the document handle, resource resolution, the content stream walker that
//! finds the embedded QR image, and the text flattener used for field
//! extraction.

pub mod raster;
pub mod resources;
pub mod text;
pub mod walker;

use lopdf::content::{Content, Operation};
use lopdf::{Document, ObjectId};
use tracing::debug;

use crate::error::Result;

// Re-export commonly used items
pub use raster::RasterImage;
pub use resources::XObject;
pub use text::text_lines;
pub use walker::find_first_image;

/// A parsed PDF, opened from raw upload bytes
///
/// The handle owns the parsed object graph. It is released exactly once,
/// when the value goes out of scope, whichever way extraction ends.
pub struct PdfDocument {
    doc: Document,
}

impl PdfDocument {
    /// Parse a document from memory
    ///
    /// Bytes that cannot be parsed as a PDF produce
    /// [`Error::MalformedDocument`](crate::Error::MalformedDocument).
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)?;
        debug!(pages = doc.get_pages().len(), "opened document");
        Ok(Self { doc })
    }

    /// Page object ids in document order
    pub fn pages(&self) -> Vec<ObjectId> {
        self.doc.get_pages().into_values().collect()
    }

    /// The underlying lopdf document
    pub fn inner(&self) -> &Document {
        &self.doc
    }
}

/// Operator appended to every content stream before decoding
const END_MARKER: &str = "gpasasEndOfContent";

/// Decode a content stream into its operations
///
/// The lopdf parser stops quietly at the first token it cannot read. A
/// marker operator is appended so a stream that ends early, or that leaves
/// operands dangling, is reported as malformed instead of truncated.
pub(crate) fn decode_operations(data: &[u8]) -> Result<Vec<Operation>> {
    let mut marked = Vec::with_capacity(data.len() + END_MARKER.len() + 2);
    marked.extend_from_slice(data);
    marked.push(b'\n');
    marked.extend_from_slice(END_MARKER.as_bytes());
    marked.push(b'\n');

    let mut operations = Content::decode(&marked)?.operations;
    match operations.pop() {
        Some(last) if last.operator == END_MARKER && last.operands.is_empty() => Ok(operations),
        _ => Err(lopdf::Error::InvalidStream("content stream is not well formed".to_string()).into()),
    }
}

impl Drop for PdfDocument {
    fn drop(&mut self) {
        debug!("released document");
        #[cfg(test)]
        tests::RELEASES.with(|count| count.set(count.get() + 1));
    }
}

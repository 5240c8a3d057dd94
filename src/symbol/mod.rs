//! QR symbol decoding
//!
//! The raster is binarized, the module grid of a pure (unrotated, cropped)
//! symbol is sampled out of it, and the grid is redrawn cleanly with a quiet
//! zone before being handed to the QR decoder. Redrawing lets the decoder
//! cope with symbols cropped to their finder patterns, which it cannot
//! locate otherwise.

pub mod binarizer;
pub mod pure;

use tracing::debug;

use crate::error::{Error, Result};
use crate::pdf::RasterImage;
use binarizer::{binarize, BitMatrix};
use pure::extract_pure_bits;

/// Pixels per module when redrawing the grid
const RENDER_SCALE: usize = 6;
/// Quiet zone width in modules
const QUIET_ZONE: usize = 4;

/// Decode the QR symbol in an image and return its text payload
///
/// Fails with [`Error::SymbolNotFound`] when no symbol can be located and
/// [`Error::SymbolUnreadable`] when one is located but its data cannot be
/// decoded or is empty.
pub fn decode_symbol(image: &RasterImage) -> Result<String> {
    let bits = binarize(image).ok_or_else(|| {
        debug!(width = image.width, height = image.height, "image has no usable contrast");
        Error::SymbolNotFound
    })?;

    let modules = extract_pure_bits(&bits).ok_or_else(|| {
        debug!("no square module grid in image");
        Error::SymbolNotFound
    })?;
    debug!(dimension = modules.width(), "sampled module grid");

    decode_modules(&modules)
}

fn decode_modules(modules: &BitMatrix) -> Result<String> {
    let side = (modules.width() + 2 * QUIET_ZONE) * RENDER_SCALE;
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(side, side, |x, y| {
        let mx = (x / RENDER_SCALE).wrapping_sub(QUIET_ZONE);
        let my = (y / RENDER_SCALE).wrapping_sub(QUIET_ZONE);
        if modules.get(mx, my) {
            0
        } else {
            255
        }
    });

    let grids = prepared.detect_grids();
    let grid = grids.first().ok_or_else(|| {
        debug!("decoder found no finder patterns");
        Error::SymbolNotFound
    })?;

    let (_, content) = grid
        .decode()
        .map_err(|e| Error::SymbolUnreadable(format!("{:?}", e)))?;
    if content.is_empty() {
        return Err(Error::SymbolUnreadable("symbol carries no data".to_string()));
    }

    debug!(length = content.len(), "decoded symbol");
    Ok(content)
}

//! Certificate to pass pipeline
//!
//! Runs the stages in order and stops at the first failure:
//! document → first image → QR payload → text fields → record → archive.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fields::extract_fields;
use crate::package::{package_pass, SignedArchive, SigningMaterials};
use crate::pass::{PassIdentity, PassRecord};
use crate::pdf::{find_first_image, PdfDocument};
use crate::symbol::decode_symbol;

/// Read the pass record out of certificate PDF bytes
///
/// The parsed document is released before this returns, on success and on
/// every failure.
pub fn extract_pass_record(bytes: &[u8]) -> Result<PassRecord> {
    let document = PdfDocument::open(bytes)?;

    let image = find_first_image(&document)?.ok_or(Error::NoImageFound)?;
    let qr_text = decode_symbol(&image)?;
    let fields = extract_fields(&document)?;
    debug!("extracted certificate fields");

    PassRecord::new(qr_text, fields)
}

/// Converts certificates into signed passes with fixed signing materials
///
/// Holds no mutable state, so one instance can serve concurrent callers.
#[derive(Debug)]
pub struct PassMaker {
    materials: SigningMaterials,
    identity: PassIdentity,
}

impl PassMaker {
    pub fn new(materials: SigningMaterials, identity: PassIdentity) -> Self {
        Self {
            materials,
            identity,
        }
    }

    /// Convert certificate PDF bytes into a signed pass archive
    pub fn make_pass(&self, bytes: &[u8]) -> Result<SignedArchive> {
        let record = extract_pass_record(bytes)?;
        let archive = package_pass(&record, &self.materials, &self.identity)?;
        info!(serial = archive.serial_number(), "converted certificate");
        Ok(archive)
    }
}

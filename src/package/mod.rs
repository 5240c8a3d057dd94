//! Pass archive packaging
//!
//! A pass archive is a zip holding `pass.json`, the template assets, a
//! `manifest.json` with the SHA-1 of each of those files, and a detached
//! `signature` over the manifest.

pub mod assets;
pub mod manifest;
pub mod signing;
pub mod verify;

use std::io::{Cursor, Write};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::Result;
use crate::pass::{PassDescription, PassIdentity, PassRecord};

// Re-export commonly used items
pub use assets::{TemplateAssets, ASSET_NAMES};
pub use manifest::Manifest;
pub use signing::{parse_certificate, SigningMaterials};
pub use verify::verify_archive;

pub const PASS_FILE: &str = "pass.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "signature";

/// A finished, signed pass archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArchive {
    serial_number: String,
    bytes: Vec<u8>,
}

impl SignedArchive {
    /// Serial number of the pass inside
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Build, sign and package a pass for a record
pub fn package_pass(
    record: &PassRecord,
    materials: &SigningMaterials,
    identity: &PassIdentity,
) -> Result<SignedArchive> {
    let description = PassDescription::new(record, identity);
    package_description(&description, materials)
}

/// Sign and package an already built pass description
pub fn package_description(
    description: &PassDescription,
    materials: &SigningMaterials,
) -> Result<SignedArchive> {
    let pass_json = description.to_json()?;

    let mut files: Vec<(&str, &[u8])> = vec![(PASS_FILE, &pass_json)];
    files.extend(materials.assets().iter());

    let manifest = Manifest::from_files(files.iter().copied());
    let manifest_json = manifest.to_json()?;
    let signature = materials.sign(&manifest_json)?;
    debug!(files = manifest.len(), "built manifest");

    files.push((MANIFEST_FILE, &manifest_json));
    files.push((SIGNATURE_FILE, &signature));
    let bytes = write_archive(&files)?;

    info!(
        serial = %description.serial_number,
        bytes = bytes.len(),
        "packaged pass"
    );
    Ok(SignedArchive {
        serial_number: description.serial_number.clone(),
        bytes,
    })
}

/// Zip entries in order, deflated, with a fixed timestamp
fn write_archive(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(data)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pass::tests::sample_fields;
    use signing::tests::{fixture, test_materials};
    use std::io::Read;
    use zip::ZipArchive;

    fn sample_record() -> PassRecord {
        PassRecord::new("ABC123", sample_fields()).unwrap()
    }

    fn entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    /// Rebuild an archive with the same entries, letting `edit` change them
    fn rewrite(bytes: &[u8], edit: impl Fn(&mut Vec<(String, Vec<u8>)>)) -> Vec<u8> {
        let mut files = entries(bytes);
        edit(&mut files);
        let borrowed: Vec<(&str, &[u8])> =
            files.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        write_archive(&borrowed).unwrap()
    }

    fn intermediate() -> x509_cert::Certificate {
        parse_certificate(&fixture("intermediate.cer")).unwrap()
    }

    #[test]
    fn test_archive_layout() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let names: Vec<_> = entries(archive.as_bytes()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "pass.json",
                "icon.png",
                "icon@2x.png",
                "icon@3x.png",
                "logo.png",
                "logo@2x.png",
                "logo@3x.png",
                "manifest.json",
                "signature",
            ]
        );
    }

    #[test]
    fn test_manifest_matches_files() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let files = entries(archive.as_bytes());
        let manifest_bytes = &files.iter().find(|(n, _)| n == MANIFEST_FILE).unwrap().1;
        let manifest = Manifest::from_json(manifest_bytes).unwrap();

        assert_eq!(manifest.len(), 7);
        for (name, data) in &files {
            if name != MANIFEST_FILE && name != SIGNATURE_FILE {
                assert!(manifest.matches(name, data), "{}", name);
            }
        }
        // Assets are bundled verbatim
        let icon = &files.iter().find(|(n, _)| n == "icon@2x.png").unwrap().1;
        assert_eq!(icon.as_slice(), b"icon@2x.png");
    }

    #[test]
    fn test_verify_roundtrip() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let description = verify_archive(archive.as_bytes(), &intermediate()).unwrap();
        assert_eq!(description.serial_number, archive.serial_number());
        assert_eq!(description.barcode.message, "ABC123");
        assert_eq!(description.expiration_date, "2022-12-31T22:00:00Z");
    }

    #[test]
    fn test_verify_detects_altered_file() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let tampered = rewrite(archive.as_bytes(), |files| {
            let logo = files.iter_mut().find(|(n, _)| n == "logo.png").unwrap();
            logo.1[0] ^= 0x01;
        });
        assert!(matches!(
            verify_archive(&tampered, &intermediate()),
            Err(Error::SigningFailure(msg)) if msg.contains("logo.png")
        ));
    }

    #[test]
    fn test_verify_detects_rewritten_manifest() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        // Alter pass.json and recompute the manifest to match it
        let tampered = rewrite(archive.as_bytes(), |files| {
            let pass = files.iter_mut().find(|(n, _)| n == PASS_FILE).unwrap();
            let text = String::from_utf8(pass.1.clone()).unwrap();
            pass.1 = text.replacen("ABC123", "XYZ789", 1).into_bytes();
            let manifest = Manifest::from_files(
                files
                    .iter()
                    .filter(|(n, _)| n != MANIFEST_FILE && n != SIGNATURE_FILE)
                    .map(|(n, d)| (n.as_str(), d.as_slice())),
            );
            let json = manifest.to_json().unwrap();
            files.iter_mut().find(|(n, _)| n == MANIFEST_FILE).unwrap().1 = json;
        });
        assert!(matches!(
            verify_archive(&tampered, &intermediate()),
            Err(Error::SigningFailure(msg)) if msg.contains("digest")
        ));
    }

    #[test]
    fn test_verify_rejects_missing_and_extra_files() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();

        let missing = rewrite(archive.as_bytes(), |files| files.retain(|(n, _)| n != "icon.png"));
        assert!(matches!(
            verify_archive(&missing, &intermediate()),
            Err(Error::SigningFailure(_))
        ));

        let extra = rewrite(archive.as_bytes(), |files| {
            files.insert(1, ("strip.png".to_string(), vec![0u8; 4]))
        });
        assert!(matches!(
            verify_archive(&extra, &intermediate()),
            Err(Error::SigningFailure(msg)) if msg.contains("strip.png")
        ));
    }

    #[test]
    fn test_verify_refuses_oversized_entry() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let inflated = rewrite(archive.as_bytes(), |files| {
            let logo = files.iter_mut().find(|(n, _)| n == "logo.png").unwrap();
            logo.1 = vec![0u8; verify::MAX_ENTRY_SIZE as usize + 1];
        });
        // Deflate keeps the archive itself small
        assert!(inflated.len() < 64 * 1024);
        assert!(matches!(
            verify_archive(&inflated, &intermediate()),
            Err(Error::SigningFailure(msg)) if msg.contains("logo.png") && msg.contains("too large")
        ));
    }

    #[test]
    fn test_verify_rejects_other_intermediate() {
        let archive = package_pass(&sample_record(), &test_materials(), &PassIdentity::default())
            .unwrap();
        let unrelated = parse_certificate(&fixture("unrelated.pem")).unwrap();
        assert!(matches!(
            verify_archive(archive.as_bytes(), &unrelated),
            Err(Error::SigningFailure(_))
        ));
    }
}

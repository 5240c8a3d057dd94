//! Pass archive verification
//!
//! Reopens a finished archive and checks it the way a wallet would: every
//! bundled file against the manifest, the manifest against the detached
//! signature, and the signing certificate against the expected
//! intermediate.

use std::io::{Cursor, Read};

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier};
use const_oid::db::rfc5911::{ID_MESSAGE_DIGEST, ID_SIGNED_DATA};
use const_oid::db::rfc5912::{ID_SHA_256, SHA_256_WITH_RSA_ENCRYPTION};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_cert::der::asn1::OctetString;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use zip::ZipArchive;

use super::manifest::Manifest;
use super::signing::{check_issuer, public_key, signing_error};
use super::{MANIFEST_FILE, PASS_FILE, SIGNATURE_FILE};
use crate::error::{Error, Result};
use crate::pass::PassDescription;

/// Entries that inflate past this many bytes are refused
pub const MAX_ENTRY_SIZE: u64 = 8 * 1024 * 1024;

/// Verify a pass archive and return its pass description
///
/// Any integrity or signature problem is [`Error::SigningFailure`].
pub fn verify_archive(bytes: &[u8], intermediate: &Certificate) -> Result<PassDescription> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let mut data = Vec::new();
        (&mut entry).take(MAX_ENTRY_SIZE + 1).read_to_end(&mut data)?;
        if data.len() as u64 > MAX_ENTRY_SIZE {
            return Err(Error::SigningFailure(format!("{} is too large", name)));
        }
        files.push((name, data));
    }

    let find = |name: &str| {
        files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
            .ok_or_else(|| Error::SigningFailure(format!("archive has no {}", name)))
    };
    let manifest_bytes = find(MANIFEST_FILE)?;
    let signature = find(SIGNATURE_FILE)?;
    let pass_json = find(PASS_FILE)?;

    let manifest = Manifest::from_json(manifest_bytes)
        .map_err(|e| Error::SigningFailure(format!("unreadable manifest: {}", e)))?;
    let mut covered = 0;
    for (name, data) in &files {
        if name == MANIFEST_FILE || name == SIGNATURE_FILE {
            continue;
        }
        if manifest.get(name).is_none() {
            return Err(Error::SigningFailure(format!("{} is not in the manifest", name)));
        }
        if !manifest.matches(name, data) {
            return Err(Error::SigningFailure(format!("{} does not match its digest", name)));
        }
        covered += 1;
    }
    if covered != manifest.len() {
        return Err(Error::SigningFailure(
            "manifest lists files missing from the archive".to_string(),
        ));
    }

    verify_signature(signature, manifest_bytes, intermediate)?;

    let description: PassDescription = serde_json::from_slice(pass_json)?;
    debug!(serial = %description.serial_number, files = covered, "verified archive");
    Ok(description)
}

/// Check a detached CMS signature over `content`
pub fn verify_signature(signature: &[u8], content: &[u8], intermediate: &Certificate) -> Result<()> {
    let content_info = ContentInfo::from_der(signature).map_err(signing_error("signature"))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(Error::SigningFailure("signature is not signed data".to_string()));
    }
    let signed: SignedData = content_info
        .content
        .decode_as()
        .map_err(signing_error("signed data"))?;
    if signed.encap_content_info.econtent.is_some() {
        return Err(Error::SigningFailure("signature is not detached".to_string()));
    }

    let signer = signed
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::SigningFailure("signature has no signer".to_string()))?;
    if signer.digest_alg.oid != ID_SHA_256 {
        return Err(Error::SigningFailure(format!(
            "unsupported digest algorithm {}",
            signer.digest_alg.oid
        )));
    }
    let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer.sid else {
        return Err(Error::SigningFailure("signer is not identified by issuer".to_string()));
    };

    let leaf = signed
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .find_map(|choice| match choice {
            CertificateChoices::Certificate(cert)
                if cert.tbs_certificate.issuer == sid.issuer
                    && cert.tbs_certificate.serial_number == sid.serial_number =>
            {
                Some(cert)
            }
            _ => None,
        })
        .ok_or_else(|| Error::SigningFailure("signer certificate is not embedded".to_string()))?;

    let signed_attrs = signer
        .signed_attrs
        .as_ref()
        .ok_or_else(|| Error::SigningFailure("signature has no signed attributes".to_string()))?;
    let digest = signed_attrs
        .iter()
        .find(|attr| attr.oid == ID_MESSAGE_DIGEST)
        .and_then(|attr| attr.values.iter().next())
        .ok_or_else(|| Error::SigningFailure("signature has no message digest".to_string()))?
        .decode_as::<OctetString>()
        .map_err(signing_error("message digest"))?;
    if digest.as_bytes() != Sha256::digest(content).as_slice() {
        return Err(Error::SigningFailure("manifest digest does not match".to_string()));
    }

    let attrs_der = signed_attrs.to_der().map_err(signing_error("signed attributes"))?;
    let value =
        Signature::try_from(signer.signature.as_bytes()).map_err(signing_error("signature value"))?;
    VerifyingKey::<Sha256>::new(public_key(leaf)?)
        .verify(&attrs_der, &value)
        .map_err(signing_error("signature check"))?;

    check_issuer(leaf, intermediate)?;
    verify_issued_by(leaf, intermediate)
}

/// Check the leaf's own signature with the intermediate's key
fn verify_issued_by(leaf: &Certificate, intermediate: &Certificate) -> Result<()> {
    if leaf.signature_algorithm.oid != SHA_256_WITH_RSA_ENCRYPTION {
        return Err(Error::SigningFailure(format!(
            "unsupported certificate signature {}",
            leaf.signature_algorithm.oid
        )));
    }
    let tbs = leaf
        .tbs_certificate
        .to_der()
        .map_err(signing_error("certificate body"))?;
    let value = Signature::try_from(leaf.signature.raw_bytes())
        .map_err(signing_error("certificate signature"))?;
    VerifyingKey::<Sha256>::new(public_key(intermediate)?)
        .verify(&tbs, &value)
        .map_err(signing_error("certificate chain"))
}

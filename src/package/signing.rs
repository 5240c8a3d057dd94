//! Signing materials and the detached manifest signature
//!
//! The signature is a DER-encoded CMS `SignedData` without encapsulated
//! content: SHA-256 digest, RSA PKCS#1 v1.5, signed attributes carrying the
//! content type, message digest and signing time, and both the leaf and the
//! intermediate certificate.

use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cms::builder::{create_signing_time_attribute, SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use const_oid::db::{rfc5911::ID_DATA, rfc5912::ID_SHA_256};
use p12_keystore::KeyStore;
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use super::assets::TemplateAssets;
use crate::error::{Error, Result};

/// Wrap a lower-level error as a signing failure with context
pub(crate) fn signing_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::SigningFailure(format!("{}: {}", context, e))
}

/// Key, certificate chain and template assets used for every pass
///
/// Loaded once at startup and only read afterwards.
pub struct SigningMaterials {
    private_key: RsaPrivateKey,
    leaf: Certificate,
    intermediate: Certificate,
    assets: TemplateAssets,
}

impl std::fmt::Debug for SigningMaterials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterials")
            .field("leaf", &self.leaf.tbs_certificate.subject.to_string())
            .field("intermediate", &self.intermediate.tbs_certificate.subject.to_string())
            .finish_non_exhaustive()
    }
}

impl SigningMaterials {
    /// Assemble and validate signing materials
    ///
    /// The leaf must be within its validity period, issued by the
    /// intermediate, and match the private key.
    pub fn new(
        private_key: RsaPrivateKey,
        leaf: Certificate,
        intermediate: Certificate,
        assets: TemplateAssets,
    ) -> Result<Self> {
        let leaf_key = public_key(&leaf)?;
        if RsaPublicKey::from(&private_key) != leaf_key {
            return Err(Error::SigningFailure(
                "private key does not match the certificate".to_string(),
            ));
        }
        check_issuer(&leaf, &intermediate)?;

        let materials = Self {
            private_key,
            leaf,
            intermediate,
            assets,
        };
        materials.validate_at(unix_now()?)?;
        debug!(subject = %materials.leaf.tbs_certificate.subject, "signing materials ready");
        Ok(materials)
    }

    /// Load the key and leaf from a PKCS#12 bundle and the intermediate
    /// from DER or PEM bytes
    pub fn from_pkcs12(
        pkcs12: &[u8],
        password: &str,
        intermediate: &[u8],
        assets: TemplateAssets,
    ) -> Result<Self> {
        let (private_key, leaf) = read_pkcs12(pkcs12, password)?;
        let intermediate = parse_certificate(intermediate)?;
        Self::new(private_key, leaf, intermediate, assets)
    }

    pub fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    pub fn intermediate(&self) -> &Certificate {
        &self.intermediate
    }

    pub fn assets(&self) -> &TemplateAssets {
        &self.assets
    }

    /// Fail if the leaf is not valid at `now` (time since the Unix epoch)
    pub fn validate_at(&self, now: Duration) -> Result<()> {
        let validity = &self.leaf.tbs_certificate.validity;
        let not_before = validity.not_before.to_unix_duration();
        let not_after = validity.not_after.to_unix_duration();
        if now < not_before {
            return Err(Error::SigningFailure(format!(
                "certificate is not valid before {:?}",
                validity.not_before
            )));
        }
        if now > not_after {
            return Err(Error::SigningFailure(format!(
                "certificate expired at {:?}",
                validity.not_after
            )));
        }
        Ok(())
    }

    /// Produce a detached signature over `content`
    pub fn sign(&self, content: &[u8]) -> Result<Vec<u8>> {
        self.validate_at(unix_now()?)?;

        let content_info = EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        };
        let digest_algorithm = AlgorithmIdentifierOwned {
            oid: ID_SHA_256,
            parameters: None,
        };
        let digest = Sha256::digest(content);
        let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: self.leaf.tbs_certificate.issuer.clone(),
            serial_number: self.leaf.tbs_certificate.serial_number.clone(),
        });

        let signer = SigningKey::<Sha256>::new(self.private_key.clone());
        let mut signer_info = SignerInfoBuilder::new(
            &signer,
            sid,
            digest_algorithm.clone(),
            &content_info,
            Some(digest.as_slice()),
        )
        .map_err(signing_error("signer info"))?;
        signer_info
            .add_signed_attribute(
                create_signing_time_attribute().map_err(signing_error("signing time"))?,
            )
            .map_err(signing_error("signing time"))?;

        let signed = SignedDataBuilder::new(&content_info)
            .add_digest_algorithm(digest_algorithm)
            .map_err(signing_error("digest algorithm"))?
            .add_certificate(CertificateChoices::Certificate(self.leaf.clone()))
            .map_err(signing_error("leaf certificate"))?
            .add_certificate(CertificateChoices::Certificate(self.intermediate.clone()))
            .map_err(signing_error("intermediate certificate"))?
            .add_signer_info::<SigningKey<Sha256>, Signature>(signer_info)
            .map_err(signing_error("signer"))?
            .build()
            .map_err(signing_error("signed data"))?;

        let der = signed.to_der().map_err(signing_error("signature encoding"))?;
        debug!(bytes = der.len(), "signed manifest");
        Ok(der)
    }
}

/// Private key and leaf certificate from a PKCS#12 bundle
pub(crate) fn read_pkcs12(pkcs12: &[u8], password: &str) -> Result<(RsaPrivateKey, Certificate)> {
    let keystore = KeyStore::from_pkcs12(pkcs12, password).map_err(signing_error("PKCS#12"))?;
    let (alias, chain) = keystore
        .private_key_chain()
        .ok_or_else(|| Error::SigningFailure("PKCS#12 bundle holds no private key".to_string()))?;

    let private_key =
        RsaPrivateKey::from_pkcs8_der(chain.key()).map_err(signing_error("private key"))?;
    let leaf_der = chain
        .chain()
        .first()
        .ok_or_else(|| Error::SigningFailure(format!("key {} has no certificate", alias)))?;
    let leaf = Certificate::from_der(leaf_der.as_der()).map_err(signing_error("certificate"))?;
    debug!(alias, "read PKCS#12 bundle");
    Ok((private_key, leaf))
}

/// Parse a certificate given as DER or PEM
pub fn parse_certificate(bytes: &[u8]) -> Result<Certificate> {
    if bytes.starts_with(b"-----BEGIN") {
        Certificate::from_pem(bytes).map_err(signing_error("PEM certificate"))
    } else {
        Certificate::from_der(bytes).map_err(signing_error("DER certificate"))
    }
}

/// RSA public key of a certificate
pub(crate) fn public_key(certificate: &Certificate) -> Result<RsaPublicKey> {
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(signing_error("public key"))?;
    RsaPublicKey::from_public_key_der(&spki).map_err(signing_error("public key"))
}

pub(crate) fn check_issuer(leaf: &Certificate, intermediate: &Certificate) -> Result<()> {
    if leaf.tbs_certificate.issuer != intermediate.tbs_certificate.subject {
        return Err(Error::SigningFailure(format!(
            "certificate issued by {}, not {}",
            leaf.tbs_certificate.issuer, intermediate.tbs_certificate.subject
        )));
    }
    Ok(())
}

fn unix_now() -> Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(signing_error("system clock"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::assets::tests::sample_assets;
    use std::fs;
    use std::path::PathBuf;

    pub(crate) const PASSWORD: &str = "test-pass";

    pub(crate) fn fixture(name: &str) -> Vec<u8> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/signing")
            .join(name);
        fs::read(path).unwrap()
    }

    pub(crate) fn test_materials() -> SigningMaterials {
        SigningMaterials::from_pkcs12(
            &fixture("pass.p12"),
            PASSWORD,
            &fixture("intermediate.cer"),
            sample_assets(),
        )
        .unwrap()
    }

    #[test]
    fn test_load_materials() {
        let materials = test_materials();
        assert_eq!(
            materials.leaf().tbs_certificate.serial_number.as_bytes(),
            &[0x10, 0x01]
        );
        assert!(materials
            .intermediate()
            .tbs_certificate
            .subject
            .to_string()
            .contains("Test WWDR Intermediate"));
    }

    #[test]
    fn test_intermediate_pem_or_der() {
        let der = parse_certificate(&fixture("intermediate.cer")).unwrap();
        let pem = parse_certificate(&fixture("intermediate.pem")).unwrap();
        assert_eq!(der, pem);
        assert!(matches!(
            parse_certificate(b"not a certificate"),
            Err(Error::SigningFailure(_))
        ));
    }

    #[test]
    fn test_wrong_password() {
        let result = SigningMaterials::from_pkcs12(
            &fixture("pass.p12"),
            "wrong",
            &fixture("intermediate.cer"),
            sample_assets(),
        );
        assert!(matches!(result, Err(Error::SigningFailure(_))));
    }

    #[test]
    fn test_unrelated_intermediate() {
        let result = SigningMaterials::from_pkcs12(
            &fixture("pass.p12"),
            PASSWORD,
            &fixture("unrelated.pem"),
            sample_assets(),
        );
        assert!(matches!(result, Err(Error::SigningFailure(msg)) if msg.contains("issued by")));
    }

    #[test]
    fn test_expired_certificate() {
        let result = SigningMaterials::from_pkcs12(
            &fixture("expired.p12"),
            PASSWORD,
            &fixture("intermediate.cer"),
            sample_assets(),
        );
        assert!(matches!(result, Err(Error::SigningFailure(msg)) if msg.contains("expired")));
    }

    #[test]
    fn test_key_must_match_leaf() {
        let (_, leaf) = read_pkcs12(&fixture("pass.p12"), PASSWORD).unwrap();
        let (other_key, _) = read_pkcs12(&fixture("expired.p12"), PASSWORD).unwrap();
        let intermediate = parse_certificate(&fixture("intermediate.cer")).unwrap();
        let result = SigningMaterials::new(other_key, leaf, intermediate, sample_assets());
        assert!(matches!(result, Err(Error::SigningFailure(msg)) if msg.contains("does not match")));
    }

    #[test]
    fn test_validity_window() {
        let materials = test_materials();
        let validity = &materials.leaf().tbs_certificate.validity;
        let start = validity.not_before.to_unix_duration();
        let end = validity.not_after.to_unix_duration();

        assert!(materials.validate_at(start).is_ok());
        assert!(materials.validate_at(start - Duration::from_secs(1)).is_err());
        assert!(materials.validate_at(end + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_sign_produces_detached_signed_data() {
        use cms::content_info::ContentInfo;
        use cms::signed_data::SignedData;

        let materials = test_materials();
        let der = materials.sign(b"{}").unwrap();
        let content_info = ContentInfo::from_der(&der).unwrap();
        let signed: SignedData = content_info.content.decode_as().unwrap();

        assert!(signed.encap_content_info.econtent.is_none());
        assert_eq!(signed.certificates.unwrap().0.len(), 2);
        assert_eq!(signed.signer_infos.0.len(), 1);
    }
}

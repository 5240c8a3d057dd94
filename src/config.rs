//! Startup configuration
//!
//! Signing materials are loaded once, before any certificate is processed.
//! A failure here is fatal to the process.

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::package::{SigningMaterials, TemplateAssets};

pub const DEFAULT_P12_PATH: &str = "/cert/my.p12";
pub const DEFAULT_INTERMEDIATE_PATH: &str = "/cert/AppleWWDRCA.cer";
pub const DEFAULT_TEMPLATE_DIR: &str = "template";

/// Uploads of this many bytes or more are refused
pub const MAX_UPLOAD_SIZE: usize = 128 * 1024;

/// Where the signing materials live
#[derive(Clone)]
pub struct SigningConfig {
    pub pkcs12: PathBuf,
    pub password: String,
    pub intermediate: PathBuf,
    pub template_dir: PathBuf,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("pkcs12", &self.pkcs12)
            .field("password", &"<redacted>")
            .field("intermediate", &self.intermediate)
            .field("template_dir", &self.template_dir)
            .finish()
    }
}

impl SigningConfig {
    /// Read the configuration from `GPASAS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(SigningConfig {
            pkcs12: env::var("GPASAS_P12")
                .unwrap_or_else(|_| DEFAULT_P12_PATH.to_string())
                .into(),

            password: env::var("GPASAS_P12_PASSWORD")
                .context("GPASAS_P12_PASSWORD must be set")?,

            intermediate: env::var("GPASAS_INTERMEDIATE")
                .unwrap_or_else(|_| DEFAULT_INTERMEDIATE_PATH.to_string())
                .into(),

            template_dir: env::var("GPASAS_TEMPLATE_DIR")
                .unwrap_or_else(|_| DEFAULT_TEMPLATE_DIR.to_string())
                .into(),
        })
    }
}

/// Load and validate the signing materials named by `config`
pub fn load_signing_materials(config: &SigningConfig) -> Result<SigningMaterials> {
    let pkcs12 = std::fs::read(&config.pkcs12)
        .with_context(|| format!("Failed to read PKCS#12 bundle {}", config.pkcs12.display()))?;
    let intermediate = std::fs::read(&config.intermediate).with_context(|| {
        format!(
            "Failed to read intermediate certificate {}",
            config.intermediate.display()
        )
    })?;
    let assets = TemplateAssets::from_dir(&config.template_dir).with_context(|| {
        format!(
            "Failed to load template assets from {}",
            config.template_dir.display()
        )
    })?;

    let materials = SigningMaterials::from_pkcs12(&pkcs12, &config.password, &intermediate, assets)
        .context("Signing materials are unusable")?;
    info!(
        certificate = %materials.leaf().tbs_certificate.subject,
        "loaded signing materials"
    );
    Ok(materials)
}

/// Read an uploaded document, refusing anything of [`MAX_UPLOAD_SIZE`] bytes
/// or more
pub fn read_upload(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut bytes = Vec::new();
    file.take(MAX_UPLOAD_SIZE as u64)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.len() >= MAX_UPLOAD_SIZE {
        bail!("{} is too big (limit {} bytes)", path.display(), MAX_UPLOAD_SIZE);
    }
    Ok(bytes)
}

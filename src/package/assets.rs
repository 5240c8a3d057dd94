//! Template image assets bundled into every pass

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Files every pass carries, in archive order
pub const ASSET_NAMES: [&str; 6] = [
    "icon.png",
    "icon@2x.png",
    "icon@3x.png",
    "logo.png",
    "logo@2x.png",
    "logo@3x.png",
];

/// The complete set of template images, held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAssets {
    files: Vec<(&'static str, Vec<u8>)>,
}

impl TemplateAssets {
    /// Build from named blobs; every name in [`ASSET_NAMES`] is required and
    /// no other name is accepted
    pub fn new<N: AsRef<str>>(files: impl IntoIterator<Item = (N, Vec<u8>)>) -> Result<Self> {
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; ASSET_NAMES.len()];
        for (name, data) in files {
            let name = name.as_ref();
            let index = ASSET_NAMES
                .iter()
                .position(|known| *known == name)
                .ok_or_else(|| Error::SigningFailure(format!("unknown template asset {}", name)))?;
            slots[index] = Some(data);
        }

        let files = ASSET_NAMES
            .iter()
            .zip(slots)
            .map(|(name, data)| {
                data.map(|d| (*name, d))
                    .ok_or_else(|| Error::SigningFailure(format!("template asset {} is missing", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }

    /// Read the assets from a template directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut files = Vec::with_capacity(ASSET_NAMES.len());
        for name in ASSET_NAMES {
            let path = dir.join(name);
            if !path.exists() {
                return Err(Error::FileNotFound(path));
            }
            files.push((name, fs::read(&path)?));
        }
        debug!(dir = %dir.display(), "loaded template assets");
        Self::new(files)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| d.as_slice())
    }

    /// Assets in archive order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(n, d)| (*n, d.as_slice()))
    }
}

//! Archive manifest: bundled file name to SHA-1 digest

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::Result;

/// Hex-encoded SHA-1 digests keyed by file name, serialized with sorted keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Hash every file into a new manifest
    pub fn from_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let entries = files
            .into_iter()
            .map(|(name, data)| (name.to_string(), file_digest(data)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `data` still hashes to the digest recorded for `name`
    pub fn matches(&self, name: &str, data: &[u8]) -> bool {
        self.get(name).is_some_and(|digest| digest == file_digest(data))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Lowercase hex SHA-1 of a file's bytes
pub fn file_digest(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_digest() {
        assert_eq!(file_digest(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(file_digest(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_manifest_sorted_json() {
        let manifest = Manifest::from_files([
            ("pass.json", b"{}".as_slice()),
            ("icon.png", b"abc".as_slice()),
        ]);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.names().collect::<Vec<_>>(), ["icon.png", "pass.json"]);

        let json = String::from_utf8(manifest.to_json().unwrap()).unwrap();
        let icon = json.find("icon.png").unwrap();
        let pass = json.find("pass.json").unwrap();
        assert!(icon < pass);
        assert!(json.contains("a9993e364706816aba3e25717850c26c9cd0d89d"));

        assert_eq!(Manifest::from_json(json.as_bytes()).unwrap(), manifest);
    }

    #[test]
    fn test_matches() {
        let manifest = Manifest::from_files([("logo.png", b"logo".as_slice())]);
        assert!(manifest.matches("logo.png", b"logo"));
        assert!(!manifest.matches("logo.png", b"logo!"));
        assert!(!manifest.matches("icon.png", b"logo"));
    }
}

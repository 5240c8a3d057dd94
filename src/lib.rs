//! Galimybių pasas wallet pass library
//!
//! Turns a certificate PDF into a signed wallet pass archive (`.pkpass`).
//! This library provides functionality to:
//! - Find the QR image embedded in the certificate and decode it
//! - Read the holder's name and validity dates from the certificate text
//! - Build the pass description and bundle it with the template images
//! - Sign the archive manifest and verify finished archives
//!
//! # Example
//!
//! ```no_run
//! use gpasas::config::{load_signing_materials, SigningConfig};
//! use gpasas::pass::PassIdentity;
//! use gpasas::pipeline::PassMaker;
//!
//! let config = SigningConfig::from_env().expect("configuration");
//! let materials = load_signing_materials(&config).expect("signing materials");
//! let maker = PassMaker::new(materials, PassIdentity::default());
//!
//! let pdf = std::fs::read("certificate.pdf").expect("read");
//! let archive = maker.make_pass(&pdf).expect("convert");
//! std::fs::write("gpasas.pkpass", archive.as_bytes()).expect("write");
//! ```

pub mod config;
pub mod date;
pub mod error;
pub mod fields;
pub mod package;
pub mod pass;
pub mod pdf;
pub mod pipeline;
pub mod symbol;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use error::{Error, FailureKind, Result};

//! Text field extraction
//!
//! The certificate template prints its values on fixed lines, each preceded
//! by a label line. Fields are taken by position only; labels are never
//! matched, so a change in the template layout yields wrong values rather
//! than an error unless a date stops parsing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::date::parse_certificate_instant;
use crate::error::{Error, Result};
use crate::pdf::{text::split_lines, text_lines, PdfDocument};

/// Zero-based line holding the holder's full name
pub const FULL_NAME_LINE: usize = 2;
/// Zero-based line holding the date (year) of birth
pub const DATE_OF_BIRTH_LINE: usize = 4;
/// Zero-based line holding the start of validity
pub const VALID_FROM_LINE: usize = 6;
/// Zero-based line holding the end of validity
pub const VALID_TILL_LINE: usize = 8;

/// Values read from the certificate text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub full_name: String,
    pub date_of_birth: String,
    pub valid_from: String,
    pub valid_till: String,
    /// `valid_till` read at UTC+2
    pub valid_till_instant: DateTime<Utc>,
}

impl ExtractedFields {
    /// Map fixed line positions to fields
    ///
    /// Every failure (too few lines, a blank field, an unparseable expiry
    /// date) is reported as [`Error::TextLayoutUnexpected`].
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self> {
        let line = |index: usize| -> Result<String> {
            let value = lines
                .get(index)
                .map(|l| l.as_ref())
                .ok_or_else(|| {
                    debug!(index, available = lines.len(), "text has too few lines");
                    Error::TextLayoutUnexpected
                })?;
            if value.trim().is_empty() {
                debug!(index, "field line is blank");
                return Err(Error::TextLayoutUnexpected);
            }
            Ok(value.to_string())
        };

        let full_name = line(FULL_NAME_LINE)?;
        let date_of_birth = line(DATE_OF_BIRTH_LINE)?;
        let valid_from = line(VALID_FROM_LINE)?;
        let valid_till = line(VALID_TILL_LINE)?;

        let valid_till_instant = parse_certificate_instant(&valid_till).map_err(|e| {
            debug!(error = %e, "expiry date does not parse");
            Error::TextLayoutUnexpected
        })?;

        Ok(Self {
            full_name,
            date_of_birth,
            valid_from,
            valid_till,
            valid_till_instant,
        })
    }

    /// Split flattened text into lines, then map them
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_lines(&split_lines(text))
    }
}

/// Extract the certificate fields from a document
pub fn extract_fields(document: &PdfDocument) -> Result<ExtractedFields> {
    let lines = text_lines(document)?;
    ExtractedFields::from_lines(&lines)
}

//! Pass record and pass description
//!
//! A [`PassRecord`] pairs the decoded barcode payload with the certificate
//! fields. [`PassDescription`] is the `pass.json` document built from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::date::format_instant;
use crate::error::{Error, Result};
use crate::fields::ExtractedFields;

/// Pass description schema version
pub const FORMAT_VERSION: u32 = 1;
pub const BACKGROUND_COLOR: &str = "rgb(255,255,255)";
pub const FOREGROUND_COLOR: &str = "rgb(0,0,0)";
pub const BARCODE_FORMAT_QR: &str = "PKBarcodeFormatQR";
pub const BARCODE_ENCODING: &str = "UTF-8";

/// Everything needed to build one pass
///
/// Constructed only through [`PassRecord::new`], which refuses empty parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassRecord {
    qr_text: String,
    #[serde(flatten)]
    fields: ExtractedFields,
}

impl PassRecord {
    /// Combine a barcode payload with extracted fields
    ///
    /// An empty payload is [`Error::SymbolUnreadable`]; an empty field is
    /// [`Error::TextLayoutUnexpected`].
    pub fn new(qr_text: impl Into<String>, fields: ExtractedFields) -> Result<Self> {
        let qr_text = qr_text.into();
        if qr_text.is_empty() {
            return Err(Error::SymbolUnreadable("barcode payload is empty".to_string()));
        }
        let texts = [
            &fields.full_name,
            &fields.date_of_birth,
            &fields.valid_from,
            &fields.valid_till,
        ];
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::TextLayoutUnexpected);
        }
        Ok(Self { qr_text, fields })
    }

    pub fn qr_text(&self) -> &str {
        &self.qr_text
    }

    pub fn fields(&self) -> &ExtractedFields {
        &self.fields
    }
}

/// Issuer details printed on every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassIdentity {
    pub pass_type_identifier: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub logo_text: String,
    pub description: String,
}

impl Default for PassIdentity {
    fn default() -> Self {
        Self {
            pass_type_identifier: "pass.software.stork.gpass".to_string(),
            team_identifier: "355U245N96".to_string(),
            organization_name: "VĮ Registrų Centras".to_string(),
            logo_text: "Galimybių pasas".to_string(),
            description: "Galimybių pasas".to_string(),
        }
    }
}

/// One labelled value on the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassField {
    pub key: String,
    pub label: String,
    pub value: String,
}

impl PassField {
    fn new(key: &str, label: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

/// Field layout of a generic pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStructure {
    pub primary_fields: Vec<PassField>,
    pub secondary_fields: Vec<PassField>,
    pub back_fields: Vec<PassField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub format: String,
    pub message: String,
    pub message_encoding: String,
}

/// The `pass.json` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDescription {
    pub format_version: u32,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub logo_text: String,
    pub description: String,
    pub background_color: String,
    pub foreground_color: String,
    pub sharing_prohibited: bool,
    pub expiration_date: String,
    pub generic: PassStructure,
    /// Single barcode, read by wallets predating `barcodes`
    pub barcode: Barcode,
    pub barcodes: Vec<Barcode>,
}

impl PassDescription {
    /// Build the description with a fresh random serial number
    pub fn new(record: &PassRecord, identity: &PassIdentity) -> Self {
        Self::with_serial(record, identity, Uuid::new_v4().to_string())
    }

    pub fn with_serial(record: &PassRecord, identity: &PassIdentity, serial_number: String) -> Self {
        let fields = record.fields();
        let barcode = Barcode {
            format: BARCODE_FORMAT_QR.to_string(),
            message: record.qr_text().to_string(),
            message_encoding: BARCODE_ENCODING.to_string(),
        };

        Self {
            format_version: FORMAT_VERSION,
            pass_type_identifier: identity.pass_type_identifier.clone(),
            serial_number,
            team_identifier: identity.team_identifier.clone(),
            organization_name: identity.organization_name.clone(),
            logo_text: identity.logo_text.clone(),
            description: identity.description.clone(),
            background_color: BACKGROUND_COLOR.to_string(),
            foreground_color: FOREGROUND_COLOR.to_string(),
            sharing_prohibited: true,
            expiration_date: format_instant(&fields.valid_till_instant),
            generic: PassStructure {
                primary_fields: vec![PassField::new(
                    "fullName",
                    "Vardas ir pavardė",
                    &fields.full_name,
                )],
                secondary_fields: vec![
                    PassField::new("birthYear", "Gimimo metai", &fields.date_of_birth),
                    PassField::new("issueDate", "Išdavimo data", &fields.valid_from),
                    PassField::new("expirationDate", "Galioja iki", &fields.valid_till),
                ],
                back_fields: back_fields(),
            },
            barcode: barcode.clone(),
            barcodes: vec![barcode],
        }
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Contact and information fields shown on the back of every pass
fn back_fields() -> Vec<PassField> {
    vec![
        PassField::new("url", "Svetainė", "https://www.gpasas.lt"),
        PassField::new("general-info", "Informacija Lietuvos gyventojams", "+370 5 236 45 77"),
        PassField::new("work-time", "Darbo laikas", "I–IV 8:00–17:00\nV 8:00–16:00"),
        PassField::new("vaccination-url", "Registracija vakcinai", "https://koronastop.lt/"),
        PassField::new("mobi-url", "GP telefono piniginėje", "https://gpasas.mobi/"),
    ]
}

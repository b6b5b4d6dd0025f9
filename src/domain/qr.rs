//! QR payload parsing
//!
//! Salon QR codes come in three shapes, all of which reduce to a bare
//! business UUID:
//! - `f47ac10b-58cc-4372-a567-0e02b2c3d479`
//! - `SALONPRO-BUSINESS-f47ac10b-58cc-4372-a567-0e02b2c3d479`
//! - `https://host/pages/booking.html?business=f47ac10b-...`

use serde::Serialize;

use crate::domain::types::BusinessId;
use crate::error::{IdentifierSource, ValidationError};

pub const BUSINESS_PREFIX: &str = "SALONPRO-BUSINESS-";
const QUERY_KEY: &str = "business=";

/// Candidate business reference pulled out of a QR payload or typed by hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedIdentifier {
    candidate: String,
    source: IdentifierSource,
}

impl ScannedIdentifier {
    pub fn from_scan(payload: &str) -> Self {
        Self { candidate: extract_identifier(payload).to_string(), source: IdentifierSource::Scan }
    }

    /// Manual entry goes through the same extraction, so pasting a full
    /// booking link works too
    pub fn from_manual(input: &str) -> Self {
        Self {
            candidate: extract_identifier(input).to_string(),
            source: IdentifierSource::Manual,
        }
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn source(&self) -> IdentifierSource {
        self.source
    }

    /// Validate the UUID shape and normalize to lowercase
    pub fn into_business_id(self) -> Result<BusinessId, ValidationError> {
        if self.candidate.is_empty() && self.source == IdentifierSource::Manual {
            return Err(ValidationError::EmptyIdentifier);
        }
        if !is_uuid_shape(&self.candidate) {
            return Err(ValidationError::InvalidIdentifierFormat { origin: self.source });
        }
        Ok(BusinessId(self.candidate.to_ascii_lowercase()))
    }
}

/// Strip the known wrappers from a raw payload. A bare identifier is returned
/// unchanged.
pub fn extract_identifier(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some((_, rest)) = raw.split_once(BUSINESS_PREFIX) {
        return rest.trim();
    }
    if let Some((_, rest)) = raw.split_once(QUERY_KEY) {
        let end = rest.find(['&', '#']).unwrap_or(rest.len());
        return &rest[..end];
    }
    raw
}

/// 8-4-4-4-12 hexadecimal groups, either case
pub fn is_uuid_shape(candidate: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let mut parts = candidate.split('-');
    for len in GROUPS {
        match parts.next() {
            Some(part) if part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()) => {}
            _ => return false,
        }
    }
    parts.next().is_none()
}

/// Payloads a business prints on its QR code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QrPayloads {
    pub token: String,
    pub booking_url: String,
}

impl QrPayloads {
    pub fn for_business(business_id: &BusinessId, public_base_url: &str) -> Self {
        Self {
            token: format!("{BUSINESS_PREFIX}{business_id}"),
            booking_url: format!(
                "{}/pages/booking.html?{QUERY_KEY}{business_id}",
                public_base_url.trim_end_matches('/')
            ),
        }
    }
}

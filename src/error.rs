//! Error taxonomy shared by the booking flows
//!
//! Every variant carries enough context to produce a user-facing message;
//! nothing here is retried automatically.

use thiserror::Error;

use crate::domain::booking::WizardStep;
use crate::domain::types::{BusinessId, Collection, Role};
use crate::io::gateway::GatewayError;
use crate::io::identity::IdentityError;

/// Where a scanned identifier came from; only changes the wording of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierSource {
    Scan,
    Manual,
}

/// A single rejected form field
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// Missing or malformed input. Always blocks the attempted transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please complete all booking steps")]
    IncompleteDraft,

    #[error("identifier does not have UUID shape ({origin:?})")]
    InvalidIdentifierFormat { origin: IdentifierSource },

    #[error("Please enter a Business ID")]
    EmptyIdentifier,

    #[error("{action} is not available on step {step}")]
    WrongStep { step: WizardStep, action: &'static str },

    #[error("Please select a salon")]
    BusinessRequired,

    #[error("Please select a service")]
    ServiceRequired,

    #[error("Please select a stylist or choose no preference")]
    StylistRequired,

    #[error("Please select both date and time")]
    DateTimeRequired,

    #[error("Appointments cannot be booked in the past")]
    DateInPast,

    #[error("{0} is not an available time slot")]
    UnknownTimeSlot(String),

    #[error("This selection is not offered by the chosen salon")]
    NotOffered,

    #[error("Already at the first step")]
    AtFirstStep,

    #[error("{} field(s) are invalid", .0.len())]
    Form(Vec<FieldError>),

    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::InvalidIdentifierFormat { origin: IdentifierSource::Scan } => {
                "Invalid QR code. Please scan a valid SalonPro QR code.".to_string()
            }
            ValidationError::InvalidIdentifierFormat { origin: IdentifierSource::Manual } => {
                "Invalid Business ID format. Please enter a valid Business ID.".to_string()
            }
            ValidationError::Form(fields) => fields
                .iter()
                .map(|f| f.message)
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: String },

    #[error("business {0} is not accepting bookings")]
    BusinessInactive(BusinessId),

    #[error("not signed in")]
    Unauthorized,

    #[error("requires the {0} role")]
    Forbidden(Role),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl BookingError {
    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        BookingError::NotFound { collection, id: id.into() }
    }

    /// Stable machine-readable tag for API responses and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(ValidationError::InvalidIdentifierFormat { .. }) => {
                "invalid_identifier_format"
            }
            BookingError::Validation(_) => "validation_error",
            BookingError::NotFound { .. } => "not_found",
            BookingError::BusinessInactive(_) => "business_inactive",
            BookingError::Unauthorized => "unauthorized",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::Gateway(_) => "gateway_error",
            BookingError::Identity(IdentityError::InvalidCredentials) => "invalid_credentials",
            BookingError::Identity(IdentityError::AlreadyRegistered) => "already_registered",
            BookingError::Identity(_) => "identity_error",
        }
    }

    /// Message suitable for a toast; never leaks transport details
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Validation(v) => v.user_message(),
            BookingError::NotFound { collection: Collection::Businesses, .. } => {
                "Business not found. Please check the Business ID and try again.".to_string()
            }
            BookingError::NotFound { collection: Collection::Customers, .. } => {
                "No customer account found with these credentials".to_string()
            }
            BookingError::NotFound { collection, .. } => {
                format!("The requested {} record was not found", collection.as_str())
            }
            BookingError::BusinessInactive(_) => "This business is currently inactive".to_string(),
            BookingError::Unauthorized => "Please sign in to continue".to_string(),
            BookingError::Forbidden(role) => format!("This action requires a {role} account"),
            BookingError::Gateway(_) => {
                "Something went wrong talking to the server. Please try again.".to_string()
            }
            BookingError::Identity(IdentityError::InvalidCredentials) => {
                "Login failed. Please check your credentials.".to_string()
            }
            BookingError::Identity(IdentityError::AlreadyRegistered) => {
                "An account with this email already exists".to_string()
            }
            BookingError::Identity(_) => "Authentication service unavailable".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_messages_depend_on_source() {
        let scan = ValidationError::InvalidIdentifierFormat { origin: IdentifierSource::Scan };
        let manual = ValidationError::InvalidIdentifierFormat { origin: IdentifierSource::Manual };
        assert!(scan.user_message().contains("QR code"));
        assert!(manual.user_message().contains("Business ID format"));
    }

    #[test]
    fn test_not_found_and_inactive_have_distinct_messages() {
        let missing = BookingError::not_found(Collection::Businesses, "x");
        let inactive = BookingError::BusinessInactive(BusinessId::new("x"));
        assert_ne!(missing.user_message(), inactive.user_message());
        assert_eq!(missing.kind(), "not_found");
        assert_eq!(inactive.kind(), "business_inactive");
    }

    #[test]
    fn test_form_errors_join_messages() {
        let err = ValidationError::Form(vec![
            FieldError { field: "email", message: "Please enter a valid email address" },
            FieldError { field: "terms", message: "You must accept the terms and conditions" },
        ]);
        assert_eq!(
            err.user_message(),
            "Please enter a valid email address; You must accept the terms and conditions"
        );
    }
}

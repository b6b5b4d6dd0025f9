//! Domain models - booking records, wizard state machine, QR payloads
//!
//! This module contains the canonical data types used throughout the service:
//! - `types` - records mirrored from the remote collections (Business, Service, ...)
//! - `booking` - the booking wizard state machine and its draft
//! - `qr` - QR payload extraction and validation

pub mod booking;
pub mod qr;
pub mod types;

pub use booking::{BookingDraft, SlotSchedule, StylistChoice, TimeSlot, WizardState, WizardStep};
pub use qr::{QrPayloads, ScannedIdentifier};
pub use types::{
    Appointment, AppointmentId, AppointmentStatus, Business, BusinessId, Collection, Customer,
    CustomerId, NewAppointment, Role, Service, ServiceId, Stylist, StylistId,
};

//! Shared record types for the booking domain
//!
//! Field names match the remote collections column for column so records can be
//! decoded straight from gateway responses.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::TimeSlot;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(
    /// Primary key of a `businesses` row
    BusinessId
);
record_id!(
    /// Primary key of a `services` row
    ServiceId
);
record_id!(
    /// Primary key of a `stylists` row
    StylistId
);
record_id!(
    /// Primary key of a `customers` row
    CustomerId
);
record_id!(
    /// Primary key of an `appointments` row
    AppointmentId
);

/// Named record collections exposed by the remote data gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Businesses,
    Customers,
    Appointments,
    Services,
    Stylists,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Businesses => "businesses",
            Collection::Customers => "customers",
            Collection::Appointments => "appointments",
            Collection::Services => "services",
            Collection::Stylists => "stylists",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// A salon registered on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A bookable offering of a business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    #[serde(default)]
    pub business_id: Option<BusinessId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Duration in minutes
    #[serde(default)]
    pub duration: u32,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stylist {
    pub id: StylistId,
    #[serde(default)]
    pub business_id: Option<BusinessId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Appointment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Pending and confirmed appointments still occupy a slot
    pub fn is_open(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown appointment status '{s}'"))
    }
}

/// Persisted appointment as read back from the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub service_id: ServiceId,
    #[serde(default)]
    pub stylist_id: Option<StylistId>,
    pub appointment_date: NaiveDate,
    pub appointment_time: TimeSlot,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Creation payload for the `appointments` collection
///
/// `stylist_id` serializes as `null` for "no preference" and `total_amount`
/// is the service price at the moment of booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub service_id: ServiceId,
    pub stylist_id: Option<StylistId>,
    pub appointment_date: NaiveDate,
    pub appointment_time: TimeSlot,
    pub status: AppointmentStatus,
    pub notes: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

/// Dashboard role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Business,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Business => "business",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("no_show".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::NoShow);
        assert_eq!(AppointmentStatus::Cancelled.as_str(), "cancelled");
        assert!("archived".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_business_decodes_minimal_row() {
        let business: Business = serde_json::from_value(json!({
            "id": "f47ac10b-58cc-4372-a567-0e02b2c3d479",
            "is_active": false
        }))
        .unwrap();
        assert!(!business.is_active);
        assert_eq!(business.business_name, "");
    }

    #[test]
    fn test_service_price_decodes_from_number() {
        let service: Service = serde_json::from_value(json!({
            "id": "s1",
            "name": "Cut",
            "duration": 30,
            "price": 40.5
        }))
        .unwrap();
        assert_eq!(service.price, Decimal::new(405, 1));
        assert!(service.is_active);
    }

    #[test]
    fn test_appointment_decodes_postgres_time() {
        let appointment: Appointment = serde_json::from_value(json!({
            "id": "a1",
            "business_id": "b1",
            "customer_id": "c1",
            "service_id": "s1",
            "stylist_id": null,
            "appointment_date": "2025-06-01",
            "appointment_time": "10:00:00",
            "status": "confirmed",
            "total_amount": 40
        }))
        .unwrap();
        assert_eq!(appointment.appointment_time.to_string(), "10:00");
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(appointment.stylist_id, None);
    }
}

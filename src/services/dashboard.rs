//! Role dashboards: customer appointments, salon management, platform admin
//!
//! Every operation takes the caller's [`SessionContext`] and checks the role
//! before touching the backend. Records owned by another salon or customer
//! are reported as not found.

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::qr::QrPayloads;
use crate::domain::types::{
    Appointment, AppointmentId, AppointmentStatus, Business, BusinessId, Collection, Customer,
    CustomerId, Role, Service, ServiceId, Stylist, StylistId,
};
use crate::error::{BookingError, FieldError, ValidationError};
use crate::io::gateway::{decode, decode_all, Direction, Gateway, Query};
use crate::services::session::SessionContext;

/// Upcoming panel on the customer home page
const UPCOMING_PANEL_LIMIT: usize = 5;
const REVENUE_WINDOW_DAYS: u64 = 7;
const TOP_BUSINESSES_LIMIT: usize = 5;
const RECENT_ACTIVITY_LIMIT: usize = 10;

pub fn require_customer(ctx: &SessionContext) -> Result<CustomerId, BookingError> {
    let user = ctx.user.as_ref().ok_or(BookingError::Unauthorized)?;
    match (&user.role, &user.customer_id) {
        (Role::Customer, Some(id)) => Ok(id.clone()),
        _ => Err(BookingError::Forbidden(Role::Customer)),
    }
}

pub fn require_business(ctx: &SessionContext) -> Result<BusinessId, BookingError> {
    let user = ctx.user.as_ref().ok_or(BookingError::Unauthorized)?;
    match (&user.role, &user.business_id) {
        (Role::Business, Some(id)) => Ok(id.clone()),
        _ => Err(BookingError::Forbidden(Role::Business)),
    }
}

pub fn require_admin(ctx: &SessionContext) -> Result<(), BookingError> {
    let user = ctx.user.as_ref().ok_or(BookingError::Unauthorized)?;
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(BookingError::Forbidden(Role::Admin))
    }
}

/// Customer appointment list filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentFilter {
    /// Pending or confirmed, today or later
    Upcoming,
    /// Completed, cancelled or no-show, before today
    Past,
    Cancelled,
    #[default]
    All,
}

impl std::str::FromStr for AppointmentFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(AppointmentFilter::Upcoming),
            "past" => Ok(AppointmentFilter::Past),
            "cancelled" => Ok(AppointmentFilter::Cancelled),
            "all" | "" => Ok(AppointmentFilter::All),
            other => Err(ValidationError::Invalid(format!("unknown appointment filter '{other}'"))),
        }
    }
}

/// Salon-side appointment list filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AppointmentQuery {
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceInput {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub duration: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ServiceInput {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError { field: "name", message: "Service name is required" });
        }
        if self.duration == 0 {
            errors.push(FieldError { field: "duration", message: "Duration must be at least 1 minute" });
        }
        if self.price.is_sign_negative() {
            errors.push(FieldError { field: "price", message: "Price cannot be negative" });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Form(errors))
        }
    }
}

/// Partial service update; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StylistInput {
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusinessStats {
    pub today_appointments: usize,
    pub pending_today: usize,
    pub completed_today: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub week_revenue: Decimal,
    pub total_customers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdminStats {
    pub total_businesses: usize,
    pub active_businesses: usize,
    pub total_appointments: usize,
    pub today_appointments: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub week_revenue: Decimal,
    pub total_customers: usize,
}

/// Appointment with the salon, customer and service names the admin tables show
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentListing {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub business_name: Option<String>,
    pub customer_name: Option<String>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusinessActivity {
    #[serde(flatten)]
    pub business: Business,
    pub appointment_count: usize,
}

fn completed_revenue<'a>(appointments: impl Iterator<Item = &'a Appointment>) -> Decimal {
    appointments
        .filter(|a| a.status == AppointmentStatus::Completed)
        .map(|a| a.total_amount)
        .sum()
}

fn open_statuses() -> [&'static str; 2] {
    [AppointmentStatus::Pending.as_str(), AppointmentStatus::Confirmed.as_str()]
}

pub struct DashboardService {
    gateway: Arc<dyn Gateway>,
    public_base_url: String,
    today: Option<NaiveDate>,
}

impl DashboardService {
    pub fn new(gateway: Arc<dyn Gateway>, public_base_url: impl Into<String>) -> Self {
        Self { gateway, public_base_url: public_base_url.into(), today: None }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn week_ago(&self) -> NaiveDate {
        let today = self.today();
        today.checked_sub_days(Days::new(REVENUE_WINDOW_DAYS)).unwrap_or(today)
    }

    async fn appointments(&self, query: &Query) -> Result<Vec<Appointment>, BookingError> {
        let rows = self.gateway.list(Collection::Appointments, query).await?;
        Ok(decode_all(Collection::Appointments, rows)?)
    }

    async fn appointment(&self, id: &AppointmentId) -> Result<Appointment, BookingError> {
        let row = self
            .gateway
            .get_by_id(Collection::Appointments, id.as_str())
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Appointments, id.as_str()))?;
        Ok(decode(Collection::Appointments, row)?)
    }

    async fn set_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let row = self
            .gateway
            .update(Collection::Appointments, id.as_str(), json!({ "status": status }))
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Appointments, id.as_str()))?;
        Ok(decode(Collection::Appointments, row)?)
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        collection: Collection,
        ids: &FxHashSet<&str>,
    ) -> Result<Vec<T>, BookingError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new().is_in("id", ids.iter().copied());
        Ok(decode_all(collection, self.gateway.list(collection, &query).await?)?)
    }

    /// Attach display names, one lookup per referenced collection
    async fn listings(&self, appointments: Vec<Appointment>) -> Result<Vec<AppointmentListing>, BookingError> {
        let (businesses, customers, services) = {
            let business_ids: FxHashSet<&str> = appointments.iter().map(|a| a.business_id.as_str()).collect();
            let customer_ids: FxHashSet<&str> = appointments.iter().map(|a| a.customer_id.as_str()).collect();
            let service_ids: FxHashSet<&str> = appointments.iter().map(|a| a.service_id.as_str()).collect();

            let businesses: FxHashMap<BusinessId, String> = self
                .lookup::<Business>(Collection::Businesses, &business_ids)
                .await?
                .into_iter()
                .map(|b| (b.id, b.business_name))
                .collect();
            let customers: FxHashMap<CustomerId, String> = self
                .lookup::<Customer>(Collection::Customers, &customer_ids)
                .await?
                .into_iter()
                .map(|c| (c.id, format!("{} {}", c.first_name, c.last_name).trim().to_string()))
                .collect();
            let services: FxHashMap<ServiceId, String> = self
                .lookup::<Service>(Collection::Services, &service_ids)
                .await?
                .into_iter()
                .map(|s| (s.id, s.name))
                .collect();
            (businesses, customers, services)
        };

        Ok(appointments
            .into_iter()
            .map(|appointment| AppointmentListing {
                business_name: businesses.get(&appointment.business_id).cloned(),
                customer_name: customers.get(&appointment.customer_id).cloned(),
                service_name: services.get(&appointment.service_id).cloned(),
                appointment,
            })
            .collect())
    }

    // --- customer ---

    pub async fn customer_appointments(
        &self,
        ctx: &SessionContext,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, BookingError> {
        let customer_id = require_customer(ctx)?;
        let today = self.today().to_string();
        let mut query = Query::new().eq("customer_id", customer_id.as_str());
        query = match filter {
            AppointmentFilter::Upcoming => {
                query.is_in("status", open_statuses()).gte("appointment_date", today)
            }
            AppointmentFilter::Past => query
                .is_in("status", ["completed", "cancelled", "no_show"])
                .lt("appointment_date", today),
            AppointmentFilter::Cancelled => query.eq("status", AppointmentStatus::Cancelled.as_str()),
            AppointmentFilter::All => query,
        };
        let query = query
            .order_by("appointment_date", Direction::Desc)
            .order_by("appointment_time", Direction::Desc);
        self.appointments(&query).await
    }

    /// Soonest open appointments, earliest first
    pub async fn upcoming_panel(&self, ctx: &SessionContext) -> Result<Vec<Appointment>, BookingError> {
        let customer_id = require_customer(ctx)?;
        let query = Query::new()
            .eq("customer_id", customer_id.as_str())
            .is_in("status", open_statuses())
            .gte("appointment_date", self.today().to_string())
            .order_by("appointment_date", Direction::Asc)
            .order_by("appointment_time", Direction::Asc)
            .limit(UPCOMING_PANEL_LIMIT);
        self.appointments(&query).await
    }

    pub async fn cancel_appointment(
        &self,
        ctx: &SessionContext,
        appointment_id: &AppointmentId,
    ) -> Result<Appointment, BookingError> {
        let customer_id = require_customer(ctx)?;
        let appointment = self.appointment(appointment_id).await?;
        if appointment.customer_id != customer_id {
            return Err(BookingError::not_found(Collection::Appointments, appointment_id.as_str()));
        }
        if !appointment.status.is_open() {
            return Err(ValidationError::Invalid(format!(
                "A {} appointment cannot be cancelled",
                appointment.status
            ))
            .into());
        }
        let cancelled = self.set_status(appointment_id, AppointmentStatus::Cancelled).await?;
        info!(appointment_id = %appointment_id, customer_id = %customer_id, "appointment_cancelled");
        Ok(cancelled)
    }

    pub async fn update_profile(
        &self,
        ctx: &SessionContext,
        update: ProfileUpdate,
    ) -> Result<Customer, BookingError> {
        let customer_id = require_customer(ctx)?;
        let mut patch = Map::new();
        for (key, value) in [
            ("first_name", update.first_name),
            ("last_name", update.last_name),
            ("phone_number", update.phone_number),
            ("country", update.country),
        ] {
            if let Some(value) = value {
                patch.insert(key.to_string(), Value::String(value));
            }
        }
        if patch.is_empty() {
            return Err(ValidationError::Invalid("Nothing to update".to_string()).into());
        }
        let row = self
            .gateway
            .update(Collection::Customers, customer_id.as_str(), Value::Object(patch))
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Customers, customer_id.as_str()))?;
        Ok(decode(Collection::Customers, row)?)
    }

    // --- business ---

    pub async fn business_appointments(
        &self,
        ctx: &SessionContext,
        filter: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, BookingError> {
        let business_id = require_business(ctx)?;
        let mut query = Query::new().eq("business_id", business_id.as_str());
        if let Some(status) = filter.status {
            query = query.eq("status", status.as_str());
        }
        if let Some(from) = filter.date_from {
            query = query.gte("appointment_date", from.to_string());
        }
        if let Some(to) = filter.date_to {
            query = query.lte("appointment_date", to.to_string());
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        self.appointments(&query.order_by("appointment_date", Direction::Desc)).await
    }

    pub async fn update_appointment_status(
        &self,
        ctx: &SessionContext,
        appointment_id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let business_id = require_business(ctx)?;
        let appointment = self.appointment(appointment_id).await?;
        if appointment.business_id != business_id {
            return Err(BookingError::not_found(Collection::Appointments, appointment_id.as_str()));
        }
        let updated = self.set_status(appointment_id, status).await?;
        info!(appointment_id = %appointment_id, status = %status, "appointment_status_updated");
        Ok(updated)
    }

    pub async fn business_stats(&self, ctx: &SessionContext) -> Result<BusinessStats, BookingError> {
        let business_id = require_business(ctx)?;
        let today = self.today();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);

        let todays = self
            .appointments(
                &Query::new()
                    .eq("business_id", business_id.as_str())
                    .gte("appointment_date", today.to_string())
                    .lt("appointment_date", tomorrow.to_string()),
            )
            .await?;
        let week = self
            .appointments(
                &Query::new()
                    .eq("business_id", business_id.as_str())
                    .eq("status", AppointmentStatus::Completed.as_str())
                    .gte("appointment_date", self.week_ago().to_string()),
            )
            .await?;
        let all = self
            .appointments(&Query::new().eq("business_id", business_id.as_str()))
            .await?;

        let count = |status: AppointmentStatus| todays.iter().filter(|a| a.status == status).count();
        let customers: FxHashSet<&CustomerId> = all.iter().map(|a| &a.customer_id).collect();

        Ok(BusinessStats {
            today_appointments: todays.len(),
            pending_today: count(AppointmentStatus::Pending),
            completed_today: count(AppointmentStatus::Completed),
            week_revenue: completed_revenue(week.iter()),
            total_customers: customers.len(),
        })
    }

    /// All of the salon's services, inactive ones included
    pub async fn list_services(&self, ctx: &SessionContext) -> Result<Vec<Service>, BookingError> {
        let business_id = require_business(ctx)?;
        let query = Query::new()
            .eq("business_id", business_id.as_str())
            .order_by("name", Direction::Asc);
        let rows = self.gateway.list(Collection::Services, &query).await?;
        Ok(decode_all(Collection::Services, rows)?)
    }

    pub async fn create_service(
        &self,
        ctx: &SessionContext,
        input: ServiceInput,
    ) -> Result<Service, BookingError> {
        let business_id = require_business(ctx)?;
        input.validate()?;
        let record = json!({
            "business_id": business_id,
            "name": input.name.trim(),
            "category": input.category,
            "description": input.description,
            "duration": input.duration,
            "price": input.price.to_f64(),
            "is_active": input.is_active,
        });
        let row = self.gateway.create(Collection::Services, record).await?;
        let service: Service = decode(Collection::Services, row)?;
        info!(business_id = %business_id, service_id = %service.id, "service_created");
        Ok(service)
    }

    async fn owned_service(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
    ) -> Result<Service, BookingError> {
        let row = self
            .gateway
            .get_by_id(Collection::Services, service_id.as_str())
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Services, service_id.as_str()))?;
        let service: Service = decode(Collection::Services, row)?;
        if service.business_id.as_ref() != Some(business_id) {
            return Err(BookingError::not_found(Collection::Services, service_id.as_str()));
        }
        Ok(service)
    }

    pub async fn update_service(
        &self,
        ctx: &SessionContext,
        service_id: &ServiceId,
        patch: ServicePatch,
    ) -> Result<Service, BookingError> {
        let business_id = require_business(ctx)?;
        self.owned_service(&business_id, service_id).await?;
        if patch == ServicePatch::default() {
            return Err(ValidationError::Invalid("Nothing to update".to_string()).into());
        }
        if patch.duration == Some(0) || patch.price.is_some_and(|p| p.is_sign_negative()) {
            return Err(ValidationError::Invalid("Invalid duration or price".to_string()).into());
        }
        let body = serde_json::to_value(&patch)
            .map_err(|e| ValidationError::Invalid(format!("unserializable patch: {e}")))?;
        let row = self
            .gateway
            .update(Collection::Services, service_id.as_str(), body)
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Services, service_id.as_str()))?;
        Ok(decode(Collection::Services, row)?)
    }

    pub async fn delete_service(
        &self,
        ctx: &SessionContext,
        service_id: &ServiceId,
    ) -> Result<(), BookingError> {
        let business_id = require_business(ctx)?;
        self.owned_service(&business_id, service_id).await?;
        self.gateway.delete(Collection::Services, service_id.as_str()).await?;
        info!(business_id = %business_id, service_id = %service_id, "service_deleted");
        Ok(())
    }

    pub async fn list_stylists(&self, ctx: &SessionContext) -> Result<Vec<Stylist>, BookingError> {
        let business_id = require_business(ctx)?;
        let query = Query::new()
            .eq("business_id", business_id.as_str())
            .order_by("name", Direction::Asc);
        let rows = self.gateway.list(Collection::Stylists, &query).await?;
        Ok(decode_all(Collection::Stylists, rows)?)
    }

    pub async fn create_stylist(
        &self,
        ctx: &SessionContext,
        input: StylistInput,
    ) -> Result<Stylist, BookingError> {
        let business_id = require_business(ctx)?;
        if input.name.trim().is_empty() {
            return Err(ValidationError::Form(vec![FieldError {
                field: "name",
                message: "Stylist name is required",
            }])
            .into());
        }
        let record = json!({
            "business_id": business_id,
            "name": input.name.trim(),
            "specialization": input.specialization,
            "profile_picture_url": input.profile_picture_url,
            "is_available": input.is_available,
        });
        let row = self.gateway.create(Collection::Stylists, record).await?;
        Ok(decode(Collection::Stylists, row)?)
    }

    pub async fn delete_stylist(
        &self,
        ctx: &SessionContext,
        stylist_id: &StylistId,
    ) -> Result<(), BookingError> {
        let business_id = require_business(ctx)?;
        let row = self
            .gateway
            .get_by_id(Collection::Stylists, stylist_id.as_str())
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Stylists, stylist_id.as_str()))?;
        let stylist: Stylist = decode(Collection::Stylists, row)?;
        if stylist.business_id.as_ref() != Some(&business_id) {
            return Err(BookingError::not_found(Collection::Stylists, stylist_id.as_str()));
        }
        self.gateway.delete(Collection::Stylists, stylist_id.as_str()).await?;
        Ok(())
    }

    pub fn qr_payloads(&self, ctx: &SessionContext) -> Result<QrPayloads, BookingError> {
        let business_id = require_business(ctx)?;
        Ok(QrPayloads::for_business(&business_id, &self.public_base_url))
    }

    // --- admin ---

    pub async fn admin_stats(&self, ctx: &SessionContext) -> Result<AdminStats, BookingError> {
        require_admin(ctx)?;
        let businesses: Vec<Business> = decode_all(
            Collection::Businesses,
            self.gateway.list(Collection::Businesses, &Query::new()).await?,
        )?;
        let appointments = self.appointments(&Query::new()).await?;
        let customers = self.gateway.list(Collection::Customers, &Query::new()).await?;

        let today = self.today();
        let week_ago = self.week_ago();

        Ok(AdminStats {
            total_businesses: businesses.len(),
            active_businesses: businesses.iter().filter(|b| b.is_active).count(),
            total_appointments: appointments.len(),
            today_appointments: appointments.iter().filter(|a| a.appointment_date == today).count(),
            week_revenue: completed_revenue(
                appointments.iter().filter(|a| a.appointment_date >= week_ago),
            ),
            total_customers: customers.len(),
        })
    }

    /// Every appointment on the platform, latest date and time first
    pub async fn all_appointments(
        &self,
        ctx: &SessionContext,
    ) -> Result<Vec<AppointmentListing>, BookingError> {
        require_admin(ctx)?;
        let query = Query::new()
            .order_by("appointment_date", Direction::Desc)
            .order_by("appointment_time", Direction::Desc);
        let appointments = self.appointments(&query).await?;
        self.listings(appointments).await
    }

    /// Most recently booked appointments
    pub async fn recent_activity(
        &self,
        ctx: &SessionContext,
    ) -> Result<Vec<AppointmentListing>, BookingError> {
        require_admin(ctx)?;
        let query = Query::new()
            .order_by("created_at", Direction::Desc)
            .limit(RECENT_ACTIVITY_LIMIT);
        let appointments = self.appointments(&query).await?;
        self.listings(appointments).await
    }

    /// Newest active salons with their appointment counts
    pub async fn top_businesses(&self, ctx: &SessionContext) -> Result<Vec<BusinessActivity>, BookingError> {
        require_admin(ctx)?;
        let query = Query::new()
            .eq("is_active", true)
            .order_by("created_at", Direction::Desc)
            .limit(TOP_BUSINESSES_LIMIT);
        let businesses: Vec<Business> =
            decode_all(Collection::Businesses, self.gateway.list(Collection::Businesses, &query).await?)?;
        if businesses.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = businesses.iter().map(|b| b.id.as_str().to_string()).collect();
        let appointments = self.appointments(&Query::new().is_in("business_id", ids)).await?;
        let mut counts: FxHashMap<&BusinessId, usize> = FxHashMap::default();
        for appointment in &appointments {
            *counts.entry(&appointment.business_id).or_default() += 1;
        }

        Ok(businesses
            .into_iter()
            .map(|business| BusinessActivity {
                appointment_count: counts.get(&business.id).copied().unwrap_or(0),
                business,
            })
            .collect())
    }

    /// Newest first
    pub async fn list_businesses(&self, ctx: &SessionContext) -> Result<Vec<Business>, BookingError> {
        require_admin(ctx)?;
        let query = Query::new().order_by("created_at", Direction::Desc);
        let rows = self.gateway.list(Collection::Businesses, &query).await?;
        Ok(decode_all(Collection::Businesses, rows)?)
    }

    pub async fn set_business_active(
        &self,
        ctx: &SessionContext,
        business_id: &BusinessId,
        active: bool,
    ) -> Result<Business, BookingError> {
        require_admin(ctx)?;
        let row = self
            .gateway
            .update(Collection::Businesses, business_id.as_str(), json!({ "is_active": active }))
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Businesses, business_id.as_str()))?;
        info!(business_id = %business_id, active, "business_active_changed");
        Ok(decode(Collection::Businesses, row)?)
    }

    pub async fn delete_business(
        &self,
        ctx: &SessionContext,
        business_id: &BusinessId,
    ) -> Result<(), BookingError> {
        require_admin(ctx)?;
        if self.gateway.get_by_id(Collection::Businesses, business_id.as_str()).await?.is_none() {
            return Err(BookingError::not_found(Collection::Businesses, business_id.as_str()));
        }
        self.gateway.delete(Collection::Businesses, business_id.as_str()).await?;
        info!(business_id = %business_id, "business_deleted");
        Ok(())
    }
}

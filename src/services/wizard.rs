//! Gateway-driven booking wizard
//!
//! Wraps the pure [`WizardState`] machine with the backend lookups each step
//! needs: option lists for the current step, verification of picked records,
//! and the final appointment insert.
//!
//! Every step change bumps the wizard's generation. Option lists are stamped
//! with the generation they were fetched under, so a list that arrives after
//! the user has already moved on is dropped instead of shown.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::booking::{
    BookingSummary, SlotSchedule, StylistChoice, TimeSlot, WizardState, WizardStep, NO_PREFERENCE,
};
use crate::domain::types::{
    Appointment, Business, BusinessId, Collection, CustomerId, Service, ServiceId, Stylist,
    StylistId,
};
use crate::error::{BookingError, ValidationError};
use crate::infra::metrics::Metrics;
use crate::io::gateway::{decode, decode_all, Direction, Gateway, Query};

/// Wizard state owned by one session
#[derive(Debug, Clone, PartialEq)]
pub struct BookingWizard {
    state: WizardState,
    generation: u64,
}

impl BookingWizard {
    pub fn new(state: WizardState) -> Self {
        Self { state, generation: 0 }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn step(&self) -> WizardStep {
        self.state.step()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn advance(&mut self, next: WizardState) {
        if next.step() != self.state.step() {
            self.generation += 1;
        }
        self.state = next;
    }

    /// Keep `options` only if they were fetched for the current step
    pub fn accept(&self, options: WizardOptions) -> Option<WizardOptions> {
        (options.generation == self.generation).then_some(options)
    }

    pub fn view(&self, options: Option<StepOptions>) -> WizardView {
        let draft = self.state.draft();
        WizardView {
            step: self.state.step(),
            generation: self.generation,
            business_id: draft.business_id.clone(),
            service: draft.service.as_ref().map(|s| SelectedService {
                id: s.id.clone(),
                name: s.name.clone(),
                duration: s.duration,
                price: s.price,
            }),
            stylist: match &draft.stylist {
                StylistChoice::Unset => StylistView::Unset,
                StylistChoice::NoPreference => StylistView::NoPreference,
                StylistChoice::Specific(s) => {
                    StylistView::Specific { id: s.id.clone(), name: s.name.clone() }
                }
            },
            date: draft.date,
            time: draft.time,
            notes: draft.notes.clone(),
            summary: draft.summary(),
            options,
        }
    }
}

/// Choices offered on the current step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOptions {
    Businesses { businesses: Vec<Business> },
    Services { services: Vec<Service> },
    /// The no-preference choice is offered even when `stylists` is empty
    Stylists { stylists: Vec<Stylist>, no_preference: &'static str },
    Slots { min_date: NaiveDate, slots: Vec<TimeSlot> },
    Summary { summary: Option<BookingSummary> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WizardOptions {
    pub generation: u64,
    pub step: WizardStep,
    pub options: StepOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedService {
    pub id: ServiceId,
    pub name: String,
    pub duration: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StylistView {
    Unset,
    NoPreference,
    Specific { id: StylistId, name: String },
}

/// Serializable snapshot for the HTTP surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardView {
    pub step: WizardStep,
    pub generation: u64,
    pub business_id: Option<BusinessId>,
    pub service: Option<SelectedService>,
    pub stylist: StylistView,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub notes: String,
    pub summary: Option<BookingSummary>,
    pub options: Option<StepOptions>,
}

pub struct WizardService {
    gateway: Arc<dyn Gateway>,
    metrics: Arc<Metrics>,
    schedule: SlotSchedule,
    today: Option<NaiveDate>,
}

impl WizardService {
    pub fn new(gateway: Arc<dyn Gateway>, metrics: Arc<Metrics>, schedule: SlotSchedule) -> Self {
        Self { gateway, metrics, schedule, today: None }
    }

    /// Pin the calendar date used for past-date checks
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Current date in UTC unless pinned
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn schedule(&self) -> &SlotSchedule {
        &self.schedule
    }

    /// Begin a wizard. A preselected salon skips the business step.
    pub fn start(&self, selected: Option<BusinessId>) -> BookingWizard {
        let state = match selected {
            Some(business_id) => WizardState::with_business(business_id),
            None => WizardState::new(),
        };
        info!(step = %state.step(), "booking_wizard_started");
        BookingWizard::new(state)
    }

    /// Fetch the choices for the wizard's current step
    pub async fn load_options(&self, wizard: &BookingWizard) -> Result<WizardOptions, BookingError> {
        let draft = wizard.state().draft();
        let step = wizard.step();
        let options = match step {
            WizardStep::SelectBusiness => StepOptions::Businesses {
                businesses: self.active_businesses().await?,
            },
            WizardStep::SelectService => {
                let business_id = draft.business_id.as_ref().ok_or(ValidationError::BusinessRequired)?;
                StepOptions::Services { services: self.active_services(business_id).await? }
            }
            WizardStep::SelectStylist => {
                let business_id = draft.business_id.as_ref().ok_or(ValidationError::BusinessRequired)?;
                StepOptions::Stylists {
                    stylists: self.available_stylists(business_id).await?,
                    no_preference: NO_PREFERENCE,
                }
            }
            WizardStep::SelectDateTime => {
                StepOptions::Slots { min_date: self.today(), slots: self.schedule.slots() }
            }
            WizardStep::Confirm => StepOptions::Summary { summary: draft.summary() },
        };
        Ok(WizardOptions { generation: wizard.generation(), step, options })
    }

    async fn active_businesses(&self) -> Result<Vec<Business>, BookingError> {
        let query = Query::new().eq("is_active", true).order_by("business_name", Direction::Asc);
        let rows = self.gateway.list(Collection::Businesses, &query).await?;
        Ok(decode_all(Collection::Businesses, rows)?)
    }

    async fn active_services(&self, business_id: &BusinessId) -> Result<Vec<Service>, BookingError> {
        let query = Query::new()
            .eq("business_id", business_id.as_str())
            .eq("is_active", true)
            .order_by("name", Direction::Asc);
        let rows = self.gateway.list(Collection::Services, &query).await?;
        Ok(decode_all(Collection::Services, rows)?)
    }

    async fn available_stylists(&self, business_id: &BusinessId) -> Result<Vec<Stylist>, BookingError> {
        let query = Query::new()
            .eq("business_id", business_id.as_str())
            .eq("is_available", true)
            .order_by("name", Direction::Asc);
        let rows = self.gateway.list(Collection::Stylists, &query).await?;
        Ok(decode_all(Collection::Stylists, rows)?)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<T, BookingError> {
        let row = self
            .gateway
            .get_by_id(collection, id)
            .await?
            .ok_or_else(|| BookingError::not_found(collection, id))?;
        Ok(decode(collection, row)?)
    }

    pub async fn select_business(
        &self,
        wizard: &mut BookingWizard,
        business_id: &BusinessId,
    ) -> Result<(), BookingError> {
        // Step check first so a wrong-step call costs no round trip
        if wizard.step() != WizardStep::SelectBusiness {
            return Err(ValidationError::WrongStep { step: wizard.step(), action: "select_business" }.into());
        }
        let business: Business = self.fetch(Collection::Businesses, business_id.as_str()).await?;
        if !business.is_active {
            return Err(BookingError::BusinessInactive(business.id));
        }
        let next = wizard.state().select_business(business.id)?;
        wizard.advance(next);
        Ok(())
    }

    pub async fn select_service(
        &self,
        wizard: &mut BookingWizard,
        service_id: &ServiceId,
    ) -> Result<(), BookingError> {
        if wizard.step() != WizardStep::SelectService {
            return Err(ValidationError::WrongStep { step: wizard.step(), action: "select_service" }.into());
        }
        let service: Service = self.fetch(Collection::Services, service_id.as_str()).await?;
        if !service.is_active {
            return Err(ValidationError::NotOffered.into());
        }
        let next = wizard.state().select_service(service)?;
        wizard.advance(next);
        Ok(())
    }

    /// `None` records "no preference"
    pub async fn select_stylist(
        &self,
        wizard: &mut BookingWizard,
        stylist_id: Option<&StylistId>,
    ) -> Result<(), BookingError> {
        if wizard.step() != WizardStep::SelectStylist {
            return Err(ValidationError::WrongStep { step: wizard.step(), action: "select_stylist" }.into());
        }
        let stylist = match stylist_id {
            Some(id) => {
                let stylist: Stylist = self.fetch(Collection::Stylists, id.as_str()).await?;
                if !stylist.is_available {
                    return Err(ValidationError::NotOffered.into());
                }
                Some(stylist)
            }
            None => None,
        };
        let next = wizard.state().select_stylist(stylist)?;
        wizard.advance(next);
        Ok(())
    }

    pub fn set_date_time(
        &self,
        wizard: &mut BookingWizard,
        date: Option<NaiveDate>,
        time: Option<TimeSlot>,
    ) -> Result<(), BookingError> {
        let next = wizard.state().set_date_time(date, time, self.today(), &self.schedule)?;
        wizard.advance(next);
        Ok(())
    }

    pub fn next(&self, wizard: &mut BookingWizard) -> Result<(), BookingError> {
        let next = wizard.state().next()?;
        wizard.advance(next);
        Ok(())
    }

    pub fn back(&self, wizard: &mut BookingWizard) -> Result<(), BookingError> {
        let previous = wizard.state().back()?;
        wizard.advance(previous);
        Ok(())
    }

    /// Submit the draft. On success the wizard restarts on the same salon;
    /// on failure it stays on the confirm step with the draft intact.
    pub async fn confirm(
        &self,
        wizard: &mut BookingWizard,
        customer_id: &CustomerId,
        notes: Option<String>,
    ) -> Result<Appointment, BookingError> {
        let staged = match notes {
            Some(notes) if wizard.step() == WizardStep::Confirm => wizard.state().set_notes(notes)?,
            _ => wizard.state().clone(),
        };
        let payload = staged.confirm(customer_id)?;
        wizard.advance(staged);

        let record = serde_json::to_value(&payload)
            .map_err(|e| ValidationError::Invalid(format!("unserializable appointment: {e}")))?;

        let created = match self.gateway.create(Collection::Appointments, record).await {
            Ok(row) => row,
            Err(e) => {
                self.metrics.record_booking_failed();
                warn!(business_id = %payload.business_id, error = %e, "booking_submit_failed");
                return Err(e.into());
            }
        };
        let appointment: Appointment = decode(Collection::Appointments, created)?;

        self.metrics.record_booking_created();
        info!(
            appointment_id = %appointment.id,
            business_id = %appointment.business_id,
            date = %appointment.appointment_date,
            time = %appointment.appointment_time,
            "booking_created"
        );

        let restarted = wizard.state().after_submit();
        wizard.advance(restarted);
        Ok(appointment)
    }
}

//! Booking wizard state machine
//!
//! The wizard walks a fixed sequence of steps, each gated on the data collected
//! by the previous one:
//!
//! ```text
//! SelectBusiness -> SelectService -> SelectStylist -> SelectDateTime -> Confirm
//! ```
//!
//! Transitions are pure: every operation takes `&self` and returns the next
//! [`WizardState`], so a rejected transition leaves the current state untouched.
//! Going back never clears fields; re-entering a later step shows the earlier
//! selections again.

use chrono::{NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::types::{
    AppointmentStatus, BusinessId, CustomerId, NewAppointment, Service, Stylist, StylistId,
};
use crate::error::ValidationError;

/// Label shown when the customer lets the salon pick a stylist
pub const NO_PREFERENCE: &str = "No Preference";

/// A bookable start time, serialized as `HH:MM` (24h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeSlot(NaiveTime);

impl TimeSlot {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeSlot)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl std::str::FromStr for TimeSlot {
    type Err = ValidationError;

    /// Accepts `HH:MM` and the `HH:MM:SS` form Postgres returns for time columns
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map(|t| TimeSlot(t.with_second(0).unwrap_or(t)))
            .map_err(|_| ValidationError::UnknownTimeSlot(s.to_string()))
    }
}

impl Serialize for TimeSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Fixed enumeration of bookable start times for a day
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSchedule {
    first: TimeSlot,
    last: TimeSlot,
    interval_minutes: u32,
}

impl Default for SlotSchedule {
    /// 09:00 through 17:00 every 30 minutes
    fn default() -> Self {
        Self {
            first: TimeSlot(NaiveTime::MIN + chrono::Duration::hours(9)),
            last: TimeSlot(NaiveTime::MIN + chrono::Duration::hours(17)),
            interval_minutes: 30,
        }
    }
}

impl SlotSchedule {
    pub fn new(first: TimeSlot, last: TimeSlot, interval_minutes: u32) -> Result<Self, ValidationError> {
        if interval_minutes == 0 || last < first {
            return Err(ValidationError::Invalid(format!(
                "invalid slot schedule {first}..{last} every {interval_minutes}m"
            )));
        }
        Ok(Self { first, last, interval_minutes })
    }

    pub fn slots(&self) -> Vec<TimeSlot> {
        let step = chrono::Duration::minutes(i64::from(self.interval_minutes));
        let mut slots = Vec::new();
        let mut current = self.first.0;
        while current <= self.last.0 {
            slots.push(TimeSlot(current));
            let (next, wrapped) = current.overflowing_add_signed(step);
            if wrapped != 0 {
                break;
            }
            current = next;
        }
        slots
    }

    pub fn contains(&self, slot: TimeSlot) -> bool {
        if slot < self.first || slot > self.last {
            return false;
        }
        let offset = (slot.0 - self.first.0).num_minutes();
        offset % i64::from(self.interval_minutes) == 0
    }
}

/// Stylist selection. `NoPreference` is an explicit choice and unblocks the
/// step exactly like picking a named stylist; `Unset` does not.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StylistChoice {
    #[default]
    Unset,
    NoPreference,
    Specific(Stylist),
}

impl StylistChoice {
    pub fn is_set(&self) -> bool {
        !matches!(self, StylistChoice::Unset)
    }

    pub fn stylist_id(&self) -> Option<&StylistId> {
        match self {
            StylistChoice::Specific(stylist) => Some(&stylist.id),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            StylistChoice::Unset => None,
            StylistChoice::NoPreference => Some(NO_PREFERENCE),
            StylistChoice::Specific(stylist) => Some(&stylist.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    SelectBusiness,
    SelectService,
    SelectStylist,
    SelectDateTime,
    Confirm,
}

impl WizardStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStep::SelectBusiness => "select_business",
            WizardStep::SelectService => "select_service",
            WizardStep::SelectStylist => "select_stylist",
            WizardStep::SelectDateTime => "select_date_time",
            WizardStep::Confirm => "confirm",
        }
    }

    pub fn previous(&self) -> Option<WizardStep> {
        match self {
            WizardStep::SelectBusiness => None,
            WizardStep::SelectService => Some(WizardStep::SelectBusiness),
            WizardStep::SelectStylist => Some(WizardStep::SelectService),
            WizardStep::SelectDateTime => Some(WizardStep::SelectStylist),
            WizardStep::Confirm => Some(WizardStep::SelectDateTime),
        }
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-progress selections of one wizard session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingDraft {
    pub business_id: Option<BusinessId>,
    pub service: Option<Service>,
    pub stylist: StylistChoice,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub notes: String,
}

impl BookingDraft {
    /// Build the appointment creation payload
    ///
    /// Fails with [`ValidationError::IncompleteDraft`] unless business,
    /// service, date and time are all present.
    pub fn finalize(&self, customer_id: &CustomerId) -> Result<NewAppointment, ValidationError> {
        let (Some(business_id), Some(service), Some(date), Some(time)) =
            (&self.business_id, &self.service, self.date, self.time)
        else {
            return Err(ValidationError::IncompleteDraft);
        };

        Ok(NewAppointment {
            business_id: business_id.clone(),
            customer_id: customer_id.clone(),
            service_id: service.id.clone(),
            stylist_id: self.stylist.stylist_id().cloned(),
            appointment_date: date,
            appointment_time: time,
            status: AppointmentStatus::Pending,
            notes: self.notes.clone(),
            total_amount: service.price,
        })
    }

    pub fn summary(&self) -> Option<BookingSummary> {
        let service = self.service.as_ref()?;
        let date = self.date?;
        let time = self.time?;
        Some(BookingSummary {
            service_name: service.name.clone(),
            stylist_name: self.stylist.display_name().unwrap_or(NO_PREFERENCE).to_string(),
            date: date.format("%a, %b %-d, %Y").to_string(),
            time: time.to_string(),
            duration_minutes: service.duration,
            price: service.price,
        })
    }
}

/// Review data shown on the confirm step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingSummary {
    pub service_name: String,
    pub stylist_name: String,
    pub date: String,
    pub time: String,
    pub duration_minutes: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Current step plus collected draft
#[derive(Debug, Clone, PartialEq)]
pub struct WizardState {
    step: WizardStep,
    draft: BookingDraft,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new()
    }
}

impl WizardState {
    pub fn new() -> Self {
        Self { step: WizardStep::SelectBusiness, draft: BookingDraft::default() }
    }

    /// Start with a salon already chosen; the business step is skipped
    pub fn with_business(business_id: BusinessId) -> Self {
        Self {
            step: WizardStep::SelectService,
            draft: BookingDraft { business_id: Some(business_id), ..Default::default() },
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    fn expect_step(&self, step: WizardStep, action: &'static str) -> Result<(), ValidationError> {
        if self.step == step {
            Ok(())
        } else {
            Err(ValidationError::WrongStep { step: self.step, action })
        }
    }

    fn at(&self, step: WizardStep, draft: BookingDraft) -> Self {
        Self { step, draft }
    }

    /// Pick a salon and move on to services. Choosing a different salon drops
    /// selections that belonged to the previous one.
    pub fn select_business(&self, business_id: BusinessId) -> Result<Self, ValidationError> {
        self.expect_step(WizardStep::SelectBusiness, "select_business")?;
        let draft = if self.draft.business_id.as_ref() == Some(&business_id) {
            self.draft.clone()
        } else {
            BookingDraft { business_id: Some(business_id), ..Default::default() }
        };
        Ok(self.at(WizardStep::SelectService, draft))
    }

    /// Re-entrant: updates the selection and stays on the service step
    pub fn select_service(&self, service: Service) -> Result<Self, ValidationError> {
        self.expect_step(WizardStep::SelectService, "select_service")?;
        if let (Some(owner), Some(current)) = (&service.business_id, &self.draft.business_id) {
            if owner != current {
                return Err(ValidationError::NotOffered);
            }
        }
        let mut draft = self.draft.clone();
        draft.service = Some(service);
        Ok(self.at(WizardStep::SelectService, draft))
    }

    /// `None` selects "no preference"
    pub fn select_stylist(&self, stylist: Option<Stylist>) -> Result<Self, ValidationError> {
        self.expect_step(WizardStep::SelectStylist, "select_stylist")?;
        if let Some(Stylist { business_id: Some(owner), .. }) = &stylist {
            if Some(owner) != self.draft.business_id.as_ref() {
                return Err(ValidationError::NotOffered);
            }
        }
        let mut draft = self.draft.clone();
        draft.stylist = match stylist {
            Some(stylist) => StylistChoice::Specific(stylist),
            None => StylistChoice::NoPreference,
        };
        Ok(self.at(WizardStep::SelectStylist, draft))
    }

    /// Record date and time and advance to confirmation
    pub fn set_date_time(
        &self,
        date: Option<NaiveDate>,
        time: Option<TimeSlot>,
        today: NaiveDate,
        schedule: &SlotSchedule,
    ) -> Result<Self, ValidationError> {
        self.expect_step(WizardStep::SelectDateTime, "set_date_time")?;
        let (Some(date), Some(time)) = (date, time) else {
            return Err(ValidationError::DateTimeRequired);
        };
        if date < today {
            return Err(ValidationError::DateInPast);
        }
        if !schedule.contains(time) {
            return Err(ValidationError::UnknownTimeSlot(time.to_string()));
        }
        let mut draft = self.draft.clone();
        draft.date = Some(date);
        draft.time = Some(time);
        Ok(self.at(WizardStep::Confirm, draft))
    }

    pub fn set_notes(&self, notes: impl Into<String>) -> Result<Self, ValidationError> {
        self.expect_step(WizardStep::Confirm, "set_notes")?;
        let mut draft = self.draft.clone();
        draft.notes = notes.into();
        Ok(self.at(WizardStep::Confirm, draft))
    }

    /// Advance using what has already been collected for the current step
    pub fn next(&self) -> Result<Self, ValidationError> {
        let next = match self.step {
            WizardStep::SelectBusiness if self.draft.business_id.is_none() => {
                return Err(ValidationError::BusinessRequired)
            }
            WizardStep::SelectBusiness => WizardStep::SelectService,
            WizardStep::SelectService if self.draft.service.is_none() => {
                return Err(ValidationError::ServiceRequired)
            }
            WizardStep::SelectService => WizardStep::SelectStylist,
            WizardStep::SelectStylist if !self.draft.stylist.is_set() => {
                return Err(ValidationError::StylistRequired)
            }
            WizardStep::SelectStylist => WizardStep::SelectDateTime,
            WizardStep::SelectDateTime
                if self.draft.date.is_none() || self.draft.time.is_none() =>
            {
                return Err(ValidationError::DateTimeRequired)
            }
            WizardStep::SelectDateTime => WizardStep::Confirm,
            WizardStep::Confirm => {
                return Err(ValidationError::WrongStep { step: self.step, action: "next" })
            }
        };
        Ok(self.at(next, self.draft.clone()))
    }

    /// Return to the preceding step, keeping every collected field
    pub fn back(&self) -> Result<Self, ValidationError> {
        let previous = self.step.previous().ok_or(ValidationError::AtFirstStep)?;
        Ok(self.at(previous, self.draft.clone()))
    }

    /// Produce the appointment payload from the confirm step
    pub fn confirm(&self, customer_id: &CustomerId) -> Result<NewAppointment, ValidationError> {
        let payload = self.draft.finalize(customer_id)?;
        self.expect_step(WizardStep::Confirm, "confirm")?;
        Ok(payload)
    }

    /// State after a successful submit: fresh draft, same salon
    pub fn after_submit(&self) -> Self {
        match &self.draft.business_id {
            Some(business_id) => Self::with_business(business_id.clone()),
            None => Self::new(),
        }
    }
}

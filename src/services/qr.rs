//! QR and manual business-id resolution
//!
//! extract -> validate shape -> fetch -> check active -> remember -> branch
//!
//! A malformed identifier is rejected before any backend call. The session's
//! booking target is only written once the salon is known to be bookable.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::booking::WizardStep;
use crate::domain::qr::ScannedIdentifier;
use crate::domain::types::{Business, BusinessId, Collection};
use crate::error::{BookingError, ValidationError};
use crate::infra::metrics::{Metrics, QrResult};
use crate::io::gateway::{decode, Gateway};
use crate::services::session::SessionEntry;
use crate::services::wizard::WizardService;

/// Where the browser goes after a successful resolution
pub fn register_redirect(business_id: &BusinessId) -> String {
    format!("customer-register.html?business={business_id}")
}

pub const BOOKING_REDIRECT: &str = "customer-dashboard.html?page=book-appointment";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QrOutcome {
    /// Signed-in user: the wizard is open on the service step
    Booking { business: Business, step: WizardStep, redirect: String },
    /// Anonymous user: sign up or log in first; the salon is remembered
    SignInRequired { business: Business, redirect: String },
}

impl QrOutcome {
    pub fn business(&self) -> &Business {
        match self {
            QrOutcome::Booking { business, .. } | QrOutcome::SignInRequired { business, .. } => business,
        }
    }
}

pub struct QrResolver {
    gateway: Arc<dyn Gateway>,
    metrics: Arc<Metrics>,
    wizards: Arc<WizardService>,
}

impl QrResolver {
    pub fn new(gateway: Arc<dyn Gateway>, metrics: Arc<Metrics>, wizards: Arc<WizardService>) -> Self {
        Self { gateway, metrics, wizards }
    }

    pub async fn resolve_scan(
        &self,
        payload: &str,
        session: &mut SessionEntry,
    ) -> Result<QrOutcome, BookingError> {
        self.resolve(ScannedIdentifier::from_scan(payload), session).await
    }

    pub async fn resolve_manual(
        &self,
        input: &str,
        session: &mut SessionEntry,
    ) -> Result<QrOutcome, BookingError> {
        self.resolve(ScannedIdentifier::from_manual(input), session).await
    }

    pub async fn resolve(
        &self,
        identifier: ScannedIdentifier,
        session: &mut SessionEntry,
    ) -> Result<QrOutcome, BookingError> {
        let source = identifier.source();
        let result = self.lookup(identifier).await;
        let business = match result {
            Ok(business) => business,
            Err(e) => {
                self.metrics.record_qr(classify(&e));
                warn!(source = ?source, error = %e, "qr_resolution_rejected");
                return Err(e);
            }
        };

        self.metrics.record_qr(QrResult::Resolved);
        session.context.selected_business_id = Some(business.id.clone());
        info!(
            business_id = %business.id,
            source = ?source,
            authenticated = session.context.is_authenticated(),
            "qr_resolved"
        );

        if session.context.is_authenticated() {
            let wizard = self.wizards.start(Some(business.id.clone()));
            let step = wizard.step();
            session.wizard = Some(wizard);
            Ok(QrOutcome::Booking { business, step, redirect: BOOKING_REDIRECT.to_string() })
        } else {
            let redirect = register_redirect(&business.id);
            Ok(QrOutcome::SignInRequired { business, redirect })
        }
    }

    async fn lookup(&self, identifier: ScannedIdentifier) -> Result<Business, BookingError> {
        let business_id = identifier.into_business_id()?;
        let row = self
            .gateway
            .get_by_id(Collection::Businesses, business_id.as_str())
            .await?
            .ok_or_else(|| BookingError::not_found(Collection::Businesses, business_id.as_str()))?;
        let business: Business = decode(Collection::Businesses, row)?;
        if !business.is_active {
            return Err(BookingError::BusinessInactive(business.id));
        }
        Ok(business)
    }
}

fn classify(e: &BookingError) -> QrResult {
    match e {
        BookingError::Validation(
            ValidationError::InvalidIdentifierFormat { .. } | ValidationError::EmptyIdentifier,
        ) => QrResult::InvalidFormat,
        BookingError::NotFound { .. } => QrResult::NotFound,
        BookingError::BusinessInactive(_) => QrResult::Inactive,
        _ => QrResult::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::SlotSchedule;
    use crate::domain::types::Role;
    use crate::error::IdentifierSource;
    use crate::io::memory::MemoryGateway;
    use crate::services::session::SessionUser;
    use serde_json::json;

    const ACTIVE: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
    const INACTIVE: &str = "0b7d1c2e-1111-4222-8333-944455556666";

    fn resolver() -> (QrResolver, Arc<MemoryGateway>, Arc<Metrics>) {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed(Collection::Businesses, json!({"id": ACTIVE, "business_name": "Shear Bliss", "is_active": true}));
        gateway.seed(Collection::Businesses, json!({"id": INACTIVE, "business_name": "Gone", "is_active": false}));
        let metrics = Arc::new(Metrics::new());
        let wizards = Arc::new(WizardService::new(gateway.clone(), metrics.clone(), SlotSchedule::default()));
        (QrResolver::new(gateway.clone(), metrics.clone(), wizards), gateway, metrics)
    }

    fn signed_in() -> SessionEntry {
        let mut entry = SessionEntry::default();
        entry.context.user = Some(SessionUser {
            user_id: "u1".to_string(),
            email: None,
            role: Role::Customer,
            customer_id: None,
            business_id: None,
            access_token: None,
        });
        entry
    }

    #[tokio::test]
    async fn test_malformed_payload_makes_no_gateway_call() {
        let (resolver, gateway, metrics) = resolver();
        let mut session = SessionEntry::default();
        let err = resolver.resolve_scan("not-a-uuid", &mut session).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation(ValidationError::InvalidIdentifierFormat {
                origin: IdentifierSource::Scan
            })
        ));
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(metrics.qr_count(QrResult::InvalidFormat), 1);
        assert!(session.context.selected_business_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_manual_entry() {
        let (resolver, gateway, _) = resolver();
        let mut session = SessionEntry::default();
        let err = resolver.resolve_manual("   ", &mut session).await.unwrap_err();
        assert_eq!(err.user_message(), "Please enter a Business ID");
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_business_is_not_remembered() {
        let (resolver, _, metrics) = resolver();
        let mut session = signed_in();
        let payload = format!("SALONPRO-BUSINESS-{INACTIVE}");
        let err = resolver.resolve_scan(&payload, &mut session).await.unwrap_err();
        assert!(matches!(err, BookingError::BusinessInactive(_)));
        assert!(session.context.selected_business_id.is_none());
        assert!(session.wizard.is_none());
        assert_eq!(metrics.qr_count(QrResult::Inactive), 1);
    }

    #[tokio::test]
    async fn test_unknown_business_is_not_found() {
        let (resolver, gateway, _) = resolver();
        let mut session = SessionEntry::default();
        let err = resolver
            .resolve_manual("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee", &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { collection: Collection::Businesses, .. }));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_authenticated_scan_opens_wizard_on_services() {
        let (resolver, _, _) = resolver();
        let mut session = signed_in();
        let payload = format!("https://salon.example/pages/booking.html?business={ACTIVE}&utm=qr");
        let outcome = resolver.resolve_scan(&payload, &mut session).await.unwrap();

        assert!(matches!(outcome, QrOutcome::Booking { step: WizardStep::SelectService, .. }));
        assert_eq!(session.context.selected_business_id, Some(BusinessId::new(ACTIVE)));
        let wizard = session.wizard.as_ref().unwrap();
        assert_eq!(wizard.step(), WizardStep::SelectService);
        assert_eq!(wizard.state().draft().business_id, Some(BusinessId::new(ACTIVE)));
    }

    #[tokio::test]
    async fn test_anonymous_scan_routes_to_registration() {
        let (resolver, _, _) = resolver();
        let mut session = SessionEntry::default();
        let outcome = resolver.resolve_scan(&ACTIVE.to_uppercase(), &mut session).await.unwrap();

        match outcome {
            QrOutcome::SignInRequired { redirect, .. } => {
                assert_eq!(redirect, format!("customer-register.html?business={ACTIVE}"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(session.context.selected_business_id, Some(BusinessId::new(ACTIVE)));
        assert!(session.wizard.is_none());
    }
}

//! Registration, login and logout
//!
//! Sign-up creates the identity first, then the matching profile record
//! (`customers` or `businesses`). Login works out the dashboard role from
//! which profile the identity owns. A salon remembered from an earlier QR scan
//! survives the sign-in and reopens the booking wizard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::types::{Business, BusinessId, Collection, Customer, CustomerId, Role};
use crate::error::{BookingError, FieldError, ValidationError};
use crate::infra::metrics::Metrics;
use crate::io::gateway::{decode, decode_all, Gateway, Query};
use crate::io::identity::{AuthUser, Identity, IdentityError};
use crate::services::qr::BOOKING_REDIRECT;
use crate::services::session::{SessionEntry, SessionUser, TokenLease};
use crate::services::wizard::WizardService;

const PASSWORD_SPECIALS: &str = "@$!%*?&";

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let clean = |s: &str| !s.is_empty() && !s.contains('@') && !s.chars().any(char::is_whitespace);
    if !clean(local) || !clean(domain) {
        return false;
    }
    // a dot with at least one character on each side
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

fn is_valid_phone(phone: &str) -> bool {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    body.chars().count() >= 10
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '-' | '(' | ')'))
}

fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c))
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}

const PASSWORD_RULE: &str =
    "Password must be at least 8 characters with 1 uppercase, 1 number, and 1 special character";
const EMAIL_RULE: &str = "Please enter a valid email address";
const TERMS_RULE: &str = "You must accept the terms and conditions";

fn check(errors: &mut Vec<FieldError>, ok: bool, field: &'static str, message: &'static str) {
    if !ok {
        errors.push(FieldError { field, message });
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), ValidationError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Form(errors))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerRegistration {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub terms_accepted: bool,
}

impl CustomerRegistration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        check(&mut errors, self.first_name.chars().count() >= 2, "first_name", "First name must be at least 2 characters");
        check(&mut errors, self.last_name.chars().count() >= 2, "last_name", "Last name must be at least 2 characters");
        check(&mut errors, is_valid_email(&self.email), "email", EMAIL_RULE);
        check(&mut errors, !self.country.is_empty(), "country", "Please select your country");
        check(&mut errors, is_valid_phone(&self.phone_number), "phone_number", "Please enter a valid phone number");
        check(&mut errors, is_valid_password(&self.password), "password", PASSWORD_RULE);
        check(&mut errors, self.terms_accepted, "terms", TERMS_RULE);
        finish(errors)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessRegistration {
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub terms_accepted: bool,
}

impl BusinessRegistration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        check(&mut errors, self.owner_name.chars().count() >= 3, "owner_name", "Owner name must be at least 3 characters");
        check(&mut errors, self.business_name.chars().count() >= 3, "business_name", "Business name must be at least 3 characters");
        check(&mut errors, is_valid_email(&self.email), "email", EMAIL_RULE);
        check(
            &mut errors,
            is_valid_phone(&self.phone_number),
            "phone_number",
            "Please enter a valid phone number with country code",
        );
        check(&mut errors, is_valid_password(&self.password), "password", PASSWORD_RULE);
        check(&mut errors, self.terms_accepted, "terms", TERMS_RULE);
        finish(errors)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Result of registration or login
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthOutcome {
    pub role: Role,
    pub user_id: String,
    pub customer_id: Option<CustomerId>,
    pub business_id: Option<BusinessId>,
    /// False while the identity provider waits for e-mail confirmation
    pub confirmed: bool,
    pub redirect: String,
}

pub struct AuthService {
    gateway: Arc<dyn Gateway>,
    identity: Arc<dyn Identity>,
    metrics: Arc<Metrics>,
    wizards: Arc<WizardService>,
    recheck_interval: Duration,
}

/// How long a confirmed token is trusted before asking the provider again
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(300);

impl AuthService {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        identity: Arc<dyn Identity>,
        metrics: Arc<Metrics>,
        wizards: Arc<WizardService>,
    ) -> Self {
        Self { gateway, identity, metrics, wizards, recheck_interval: DEFAULT_RECHECK_INTERVAL }
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    pub async fn register_customer(
        &self,
        form: CustomerRegistration,
        session: &mut SessionEntry,
    ) -> Result<AuthOutcome, BookingError> {
        form.validate()?;
        let metadata = json!({
            "user_type": "customer",
            "first_name": form.first_name,
            "last_name": form.last_name,
        });
        let signed_up = self.identity.sign_up(&form.email, &form.password, metadata).await?;

        let record = json!({
            "first_name": form.first_name,
            "last_name": form.last_name,
            "email": form.email,
            "country": form.country,
            "phone_number": form.phone_number,
            "user_id": signed_up.user.id,
        });
        let customer: Customer =
            decode(Collection::Customers, self.gateway.create(Collection::Customers, record).await?)?;

        self.metrics.record_registration();
        info!(user_id = %signed_up.user.id, customer_id = %customer.id, "customer_registered");

        let user = SessionUser {
            user_id: signed_up.user.id.clone(),
            email: signed_up.user.email.clone(),
            role: Role::Customer,
            customer_id: Some(customer.id),
            business_id: None,
            access_token: signed_up.session.as_ref().map(|s| s.access_token.clone()),
        };
        let lease = signed_up.session.as_ref().map(|s| TokenLease::new(s.expires_in));
        Ok(self.establish(session, user, lease))
    }

    pub async fn register_business(
        &self,
        form: BusinessRegistration,
        session: &mut SessionEntry,
    ) -> Result<AuthOutcome, BookingError> {
        form.validate()?;
        let metadata = json!({ "user_type": "business", "owner_name": form.owner_name });
        let signed_up = self.identity.sign_up(&form.email, &form.password, metadata).await?;

        let record = json!({
            "owner_name": form.owner_name,
            "business_name": form.business_name,
            "email": form.email,
            "phone_number": form.phone_number,
            "user_id": signed_up.user.id,
            "is_active": true,
        });
        let business: Business =
            decode(Collection::Businesses, self.gateway.create(Collection::Businesses, record).await?)?;

        self.metrics.record_registration();
        info!(user_id = %signed_up.user.id, business_id = %business.id, "business_registered");

        let user = SessionUser {
            user_id: signed_up.user.id.clone(),
            email: signed_up.user.email.clone(),
            role: Role::Business,
            customer_id: None,
            business_id: Some(business.id),
            access_token: signed_up.session.as_ref().map(|s| s.access_token.clone()),
        };
        let lease = signed_up.session.as_ref().map(|s| TokenLease::new(s.expires_in));
        Ok(self.establish(session, user, lease))
    }

    pub async fn login(
        &self,
        credentials: Credentials,
        session: &mut SessionEntry,
    ) -> Result<AuthOutcome, BookingError> {
        let auth = match self.identity.sign_in(&credentials.email, &credentials.password).await {
            Ok(auth) => auth,
            Err(e) => {
                self.metrics.record_sign_in(false);
                return Err(e.into());
            }
        };

        let user = match self.profile_for(&auth.user).await {
            Ok(user) => user,
            Err(e) => {
                self.metrics.record_sign_in(false);
                if let Err(sign_out) = self.identity.sign_out(&auth.access_token).await {
                    warn!(error = %sign_out, "identity_sign_out_failed");
                }
                return Err(e);
            }
        };
        let lease = TokenLease::new(auth.expires_in);
        let user = SessionUser { access_token: Some(auth.access_token), ..user };

        self.metrics.record_sign_in(true);
        info!(user_id = %user.user_id, role = %user.role, "user_signed_in");
        Ok(self.establish(session, user, Some(lease)))
    }

    /// Role detection: owning a business wins, then the admin flag, then a
    /// customer profile. An identity with none of these cannot sign in.
    async fn profile_for(&self, auth_user: &AuthUser) -> Result<SessionUser, BookingError> {
        let by_user = Query::new().eq("user_id", auth_user.id.as_str()).limit(1);
        let base = SessionUser {
            user_id: auth_user.id.clone(),
            email: auth_user.email.clone(),
            role: Role::Customer,
            customer_id: None,
            business_id: None,
            access_token: None,
        };

        let businesses: Vec<Business> =
            decode_all(Collection::Businesses, self.gateway.list(Collection::Businesses, &by_user).await?)?;
        if let Some(business) = businesses.into_iter().next() {
            return Ok(SessionUser { role: Role::Business, business_id: Some(business.id), ..base });
        }

        if auth_user.user_type() == Some("admin") {
            return Ok(SessionUser { role: Role::Admin, ..base });
        }

        let customers: Vec<Customer> =
            decode_all(Collection::Customers, self.gateway.list(Collection::Customers, &by_user).await?)?;
        match customers.into_iter().next() {
            Some(customer) => Ok(SessionUser { customer_id: Some(customer.id), ..base }),
            None => Err(BookingError::not_found(Collection::Customers, auth_user.id.as_str())),
        }
    }

    /// Attach `user` to the session and pick the landing page. A wizard left
    /// behind by a different user is discarded.
    fn establish(
        &self,
        session: &mut SessionEntry,
        user: SessionUser,
        lease: Option<TokenLease>,
    ) -> AuthOutcome {
        let same_user = session.context.user.as_ref().is_some_and(|u| u.user_id == user.user_id);
        if !same_user {
            session.wizard = None;
        }
        let confirmed = lease.is_some();
        let redirect = match (user.role, session.context.selected_business_id.clone()) {
            (Role::Customer, Some(selected)) => {
                session.wizard = Some(self.wizards.start(Some(selected)));
                BOOKING_REDIRECT.to_string()
            }
            (Role::Customer, None) => "customer-dashboard.html".to_string(),
            (Role::Business, _) => "business-dashboard.html".to_string(),
            (Role::Admin, _) => "admin-dashboard.html".to_string(),
        };
        let outcome = AuthOutcome {
            role: user.role,
            user_id: user.user_id.clone(),
            customer_id: user.customer_id.clone(),
            business_id: user.business_id.clone(),
            confirmed,
            redirect,
        };
        session.context.user = Some(user);
        session.lease = lease;
        outcome
    }

    /// Confirm a signed-in session is still backed by a live provider token.
    /// An expired or revoked token signs the session out locally; the
    /// remembered salon stays. Provider outages keep the session as is.
    pub async fn revalidate(&self, session: &mut SessionEntry) {
        let (Some(user), Some(lease)) = (&session.context.user, session.lease) else {
            return;
        };
        let Some(token) = user.access_token.clone() else {
            return;
        };
        let now = Instant::now();
        let live = if lease.is_expired(now) {
            false
        } else if now.duration_since(lease.verified_at) < self.recheck_interval {
            return;
        } else {
            match self.identity.get_session(&token).await {
                Ok(found) => found.is_some_and(|u| u.id == user.user_id),
                Err(e) => {
                    warn!(user_id = %user.user_id, error = %e, "identity_recheck_failed");
                    return;
                }
            }
        };

        if live {
            session.lease = Some(TokenLease { verified_at: now, ..lease });
            return;
        }
        info!(user_id = %user.user_id, "session_expired");
        session.context.user = None;
        session.lease = None;
        session.wizard = None;
    }

    /// Drop the identity from the session. Upstream failures are logged; the
    /// local session is cleared regardless.
    pub async fn logout(&self, session: &mut SessionEntry) -> Result<(), BookingError> {
        let Some(user) = session.context.user.take() else {
            return Err(BookingError::Unauthorized);
        };
        session.context.selected_business_id = None;
        session.wizard = None;
        session.lease = None;
        if let Some(token) = &user.access_token {
            match self.identity.sign_out(token).await {
                Ok(()) => {}
                Err(IdentityError::InvalidCredentials) => {}
                Err(e) => warn!(user_id = %user.user_id, error = %e, "identity_sign_out_failed"),
            }
        }
        info!(user_id = %user.user_id, "user_signed_out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::{SlotSchedule, WizardStep};
    use crate::io::memory::{MemoryGateway, MemoryIdentity};

    fn customer_form() -> CustomerRegistration {
        CustomerRegistration {
            first_name: "Ana".to_string(),
            last_name: "Silva".to_string(),
            email: "ana@example.com".to_string(),
            country: "PT".to_string(),
            phone_number: "+351 912 345 678".to_string(),
            password: "Secret1!".to_string(),
            terms_accepted: true,
        }
    }

    fn service() -> (AuthService, Arc<MemoryGateway>, Arc<MemoryIdentity>) {
        let gateway = Arc::new(MemoryGateway::new());
        let identity = Arc::new(MemoryIdentity::new());
        let metrics = Arc::new(Metrics::new());
        let wizards = Arc::new(WizardService::new(gateway.clone(), metrics.clone(), SlotSchedule::default()));
        (AuthService::new(gateway.clone(), identity.clone(), metrics, wizards), gateway, identity)
    }

    #[test]
    fn test_field_rules() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("a@.de"));

        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("555-CALL-NOW1"));

        assert!(is_valid_password("Secret1!"));
        assert!(!is_valid_password("secret1!"));
        assert!(!is_valid_password("Secret!!"));
        assert!(!is_valid_password("Secret12"));
        assert!(!is_valid_password("Secr et1!"));
    }

    #[test]
    fn test_form_collects_every_bad_field() {
        let form = CustomerRegistration {
            first_name: "A".to_string(),
            country: String::new(),
            terms_accepted: false,
            ..customer_form()
        };
        match form.validate() {
            Err(ValidationError::Form(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field).collect();
                assert_eq!(names, vec!["first_name", "country", "terms"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_customer_creates_profile_and_continues_booking() {
        let (auth, gateway, _) = service();
        let mut session = SessionEntry::default();
        session.context.selected_business_id = Some(BusinessId::new("b1"));

        let outcome = auth.register_customer(customer_form(), &mut session).await.unwrap();
        assert_eq!(outcome.role, Role::Customer);
        assert_eq!(outcome.redirect, BOOKING_REDIRECT);

        let customers = gateway.rows(Collection::Customers);
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0]["user_id"], outcome.user_id.as_str());
        assert_eq!(session.wizard.as_ref().unwrap().step(), WizardStep::SelectService);
    }

    #[tokio::test]
    async fn test_invalid_form_never_reaches_identity() {
        let (auth, gateway, identity) = service();
        let mut session = SessionEntry::default();
        let form = CustomerRegistration { password: "weak".to_string(), ..customer_form() };
        assert!(auth.register_customer(form, &mut session).await.is_err());
        assert_eq!(gateway.call_count(), 0);
        assert!(identity.sign_in("ana@example.com", "weak").await.is_err());
    }

    #[tokio::test]
    async fn test_login_detects_business_owner() {
        let (auth, _, _) = service();
        let mut session = SessionEntry::default();
        let form = BusinessRegistration {
            owner_name: "Maria".to_string(),
            business_name: "Shear Bliss".to_string(),
            email: "owner@example.com".to_string(),
            phone_number: "+351912345678".to_string(),
            password: "Secret1!".to_string(),
            terms_accepted: true,
        };
        auth.register_business(form, &mut session).await.unwrap();

        let mut fresh = SessionEntry::default();
        let creds = Credentials { email: "owner@example.com".to_string(), password: "Secret1!".to_string() };
        let outcome = auth.login(creds, &mut fresh).await.unwrap();
        assert_eq!(outcome.role, Role::Business);
        assert!(outcome.business_id.is_some());
        assert_eq!(outcome.redirect, "business-dashboard.html");
    }

    #[tokio::test]
    async fn test_login_without_profile_is_rejected_and_signed_out() {
        let (auth, _, identity) = service();
        identity.sign_up("ghost@example.com", "Secret1!", json!({})).await.unwrap();

        let mut session = SessionEntry::default();
        let creds = Credentials { email: "ghost@example.com".to_string(), password: "Secret1!".to_string() };
        let err = auth.login(creds, &mut session).await.unwrap_err();
        assert_eq!(err.user_message(), "No customer account found with these credentials");
        assert!(session.context.user.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let (auth, _, _) = service();
        let mut session = SessionEntry::default();
        auth.register_customer(customer_form(), &mut session).await.unwrap();
        auth.logout(&mut session).await.unwrap();
        assert!(session.context.user.is_none());
        assert!(matches!(auth.logout(&mut session).await, Err(BookingError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_revoked_token_signs_session_out() {
        let (auth, _, identity) = service();
        let auth = auth.with_recheck_interval(Duration::ZERO);
        let mut session = SessionEntry::default();
        session.context.selected_business_id = Some(BusinessId::new("b1"));
        auth.register_customer(customer_form(), &mut session).await.unwrap();

        auth.revalidate(&mut session).await;
        assert!(session.context.is_authenticated());

        let token = session.context.user.as_ref().and_then(|u| u.access_token.clone()).unwrap();
        identity.sign_out(&token).await.unwrap();

        auth.revalidate(&mut session).await;
        assert!(!session.context.is_authenticated());
        assert!(session.wizard.is_none());
        assert_eq!(session.context.selected_business_id, Some(BusinessId::new("b1")));
    }

    #[tokio::test]
    async fn test_recently_verified_token_is_trusted() {
        let (auth, _, identity) = service();
        let mut session = SessionEntry::default();
        auth.register_customer(customer_form(), &mut session).await.unwrap();

        let token = session.context.user.as_ref().and_then(|u| u.access_token.clone()).unwrap();
        identity.sign_out(&token).await.unwrap();

        // Inside the recheck interval no provider call is made
        auth.revalidate(&mut session).await;
        assert!(session.context.is_authenticated());
    }

    #[tokio::test]
    async fn test_expired_lease_signs_out_without_provider() {
        let (auth, _, _) = service();
        let mut session = SessionEntry::default();
        auth.register_customer(customer_form(), &mut session).await.unwrap();

        let lease = session.lease.unwrap();
        if let Some(past) = Instant::now().checked_sub(Duration::from_secs(1)) {
            session.lease = Some(TokenLease { expires_at: Some(past), ..lease });
            auth.revalidate(&mut session).await;
            assert!(!session.context.is_authenticated());
        }
    }

    #[tokio::test]
    async fn test_second_user_does_not_inherit_wizard() {
        let (auth, _, _) = service();
        let mut session = SessionEntry::default();
        session.context.selected_business_id = Some(BusinessId::new("b1"));
        auth.register_customer(customer_form(), &mut session).await.unwrap();
        assert!(session.wizard.is_some());

        // Another customer signs in on the same session without a salon chosen
        session.context.selected_business_id = None;
        let other = CustomerRegistration { email: "bo@example.com".to_string(), ..customer_form() };
        let mut scratch = SessionEntry::default();
        auth.register_customer(other, &mut scratch).await.unwrap();

        let creds = Credentials { email: "bo@example.com".to_string(), password: "Secret1!".to_string() };
        auth.login(creds, &mut session).await.unwrap();
        assert!(session.wizard.is_none());
        assert_eq!(session.context.user.as_ref().map(|u| u.email.clone()), Some(Some("bo@example.com".to_string())));
    }
}

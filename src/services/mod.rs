//! Services - booking flows and session state
//!
//! - `session` - Per-client session store (signed-in user, selected salon, wizard)
//! - `wizard` - Gateway-backed booking wizard
//! - `qr` - QR and manual business-id resolution
//! - `auth` - Registration, login and role detection
//! - `dashboard` - Customer, salon and admin dashboards

pub mod auth;
pub mod dashboard;
pub mod qr;
pub mod session;
pub mod wizard;

// Re-export commonly used types
pub use auth::AuthService;
pub use dashboard::DashboardService;
pub use qr::{QrOutcome, QrResolver};
pub use session::{SessionContext, SessionStore};
pub use wizard::{BookingWizard, WizardService};

//! End-to-end booking flows through the HTTP dispatcher against the in-memory backend

use std::sync::Arc;

use chrono::NaiveDate;
use hyper::{Method, StatusCode};
use salon_booking::domain::Collection;
use salon_booking::infra::{Config, Metrics};
use salon_booking::io::http_api::{dispatch, ApiRequest, ApiResponse};
use salon_booking::io::{AppState, MemoryGateway, MemoryIdentity};
use serde_json::{json, Value};

const SALON: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
const CLOSED: &str = "0b7d1c2e-1111-4222-8333-944455556666";

struct Harness {
    state: AppState,
    gateway: Arc<MemoryGateway>,
}

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed(
            Collection::Businesses,
            json!({"id": SALON, "business_name": "Shear Bliss", "is_active": true}),
        );
        gateway.seed(
            Collection::Businesses,
            json!({"id": CLOSED, "business_name": "Closed For Good", "is_active": false}),
        );
        gateway.seed(
            Collection::Services,
            json!({"id": "s1", "business_id": SALON, "name": "Trim", "duration": 30, "price": 40, "is_active": true}),
        );
        gateway.seed(
            Collection::Stylists,
            json!({"id": "st1", "business_id": SALON, "name": "Ana", "is_available": true}),
        );

        let state = AppState::pinned_to(
            &Config::default(),
            gateway.clone(),
            Arc::new(MemoryIdentity::new()),
            Arc::new(Metrics::new()),
            NaiveDate::from_ymd_opt(2025, 5, 30).unwrap(),
        );
        Self { state, gateway }
    }

    async fn send(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> ApiResponse {
        let mut request = ApiRequest::new(method, path);
        if let Some(token) = token {
            request = request.with_token(token);
        }
        if let Some(body) = body {
            request = request.with_json(&body);
        }
        dispatch(&self.state, request).await
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> Value {
        let response = self.send(Method::POST, path, Some(token), Some(body)).await;
        assert_eq!(response.status, StatusCode::OK, "{path}: {}", response.json_body());
        response.json_body()["data"].clone()
    }

    async fn register_customer(&self, token: Option<&str>) -> (String, Value) {
        let response = self
            .send(
                Method::POST,
                "/auth/register/customer",
                token,
                Some(json!({
                    "first_name": "Ana",
                    "last_name": "Silva",
                    "email": "ana@example.com",
                    "country": "PT",
                    "phone_number": "+351 912 345 678",
                    "password": "Passw0rd!",
                    "terms_accepted": true,
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.json_body());
        let token = response.session_token.clone().unwrap();
        (token, response.json_body()["data"].clone())
    }
}

#[tokio::test]
async fn test_malformed_payload_never_reaches_backend() {
    let harness = Harness::new();
    let response = harness
        .send(Method::POST, "/qr/resolve", None, Some(json!({"payload": "not-a-uuid"})))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json_body()["message"], "Invalid QR code. Please scan a valid SalonPro QR code.");
    assert_eq!(harness.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_inactive_business_is_not_remembered() {
    let harness = Harness::new();
    let response = harness
        .send(Method::POST, "/qr/manual", None, Some(json!({"business_id": CLOSED})))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json_body()["error"], "business_inactive");

    // Nothing was remembered, so no session was opened either
    assert!(response.session_token.is_none());
    assert!(harness.state.sessions().is_empty());
}

#[tokio::test]
async fn test_scan_register_and_book() {
    let harness = Harness::new();

    // Anonymous scan remembers the salon and routes to sign-up
    let scan = harness
        .send(
            Method::POST,
            "/qr/resolve",
            None,
            Some(json!({"payload": format!("SALONPRO-BUSINESS-{SALON}")})),
        )
        .await;
    assert_eq!(scan.status, StatusCode::OK);
    assert_eq!(
        scan.json_body()["data"]["redirect"],
        format!("customer-register.html?business={SALON}")
    );
    let token = scan.session_token.unwrap();

    // Sign-up reopens the wizard on the remembered salon
    let (token, outcome) = harness.register_customer(Some(&token)).await;
    assert_eq!(outcome["redirect"], "customer-dashboard.html?page=book-appointment");

    let view = harness.send(Method::GET, "/booking", Some(&token), None).await.json_body();
    assert_eq!(view["data"]["step"], "select_service");
    assert_eq!(view["data"]["business_id"], SALON);
    assert_eq!(view["data"]["options"]["kind"], "services");
    assert_eq!(view["data"]["options"]["services"][0]["id"], "s1");

    // Choosing a service stays on the step until the customer moves on
    let view = harness.post("/booking/service", &token, json!({"service_id": "s1"})).await;
    assert_eq!(view["step"], "select_service");
    harness.post("/booking/next", &token, json!({})).await;

    let view = harness.post("/booking/stylist", &token, json!({"stylist_id": null})).await;
    assert_eq!(view["step"], "select_stylist");
    assert_eq!(view["stylist"]["state"], "no_preference");
    harness.post("/booking/next", &token, json!({})).await;

    let view = harness
        .post("/booking/datetime", &token, json!({"date": "2025-06-01", "time": "10:00"}))
        .await;
    assert_eq!(view["step"], "confirm");
    assert_eq!(view["summary"]["stylist_name"], "No Preference");

    // Back to the stylist step and forward again keeps date and time
    harness.post("/booking/back", &token, json!({})).await;
    let view = harness.post("/booking/back", &token, json!({})).await;
    assert_eq!(view["step"], "select_stylist");
    let view = harness.post("/booking/next", &token, json!({})).await;
    assert_eq!(view["step"], "select_date_time");
    assert_eq!(view["date"], "2025-06-01");
    assert_eq!(view["time"], "10:00");
    harness.post("/booking/next", &token, json!({})).await;

    let confirmed = harness.post("/booking/confirm", &token, json!({"notes": ""})).await;
    assert_eq!(confirmed["booking"]["step"], "select_service");

    let rows = harness.gateway.rows(Collection::Appointments);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["business_id"], SALON);
    assert_eq!(row["service_id"], "s1");
    assert_eq!(row["stylist_id"], Value::Null);
    assert_eq!(row["appointment_date"], "2025-06-01");
    assert_eq!(row["appointment_time"], "10:00");
    assert_eq!(row["status"], "pending");
    assert_eq!(row["notes"], "");
    assert_eq!(row["total_amount"].as_f64(), Some(40.0));

    let upcoming = harness
        .send(Method::GET, "/customer/appointments?filter=upcoming", Some(&token), None)
        .await
        .json_body();
    assert_eq!(upcoming["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(harness.state.metrics().bookings_created(), 1);
}

#[tokio::test]
async fn test_confirm_without_date_is_rejected() {
    let harness = Harness::new();
    let (token, _) = harness.register_customer(None).await;

    harness.post("/booking/start", &token, json!({})).await;
    harness.post("/booking/business", &token, json!({"business_id": SALON})).await;
    harness.post("/booking/service", &token, json!({"service_id": "s1"})).await;

    let response = harness
        .send(Method::POST, "/booking/confirm", Some(&token), Some(json!({})))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(harness.gateway.rows(Collection::Appointments).is_empty());

    let view = harness.send(Method::GET, "/booking", Some(&token), None).await.json_body();
    assert_eq!(view["data"]["step"], "select_service");
    assert_eq!(view["data"]["service"]["id"], "s1");
}

#[tokio::test]
async fn test_signed_in_scan_opens_service_step() {
    let harness = Harness::new();
    let (token, outcome) = harness.register_customer(None).await;
    assert_eq!(outcome["redirect"], "customer-dashboard.html");

    let data = harness
        .post(
            "/qr/resolve",
            &token,
            json!({"payload": format!("https://salon.example/pages/booking.html?business={SALON}")}),
        )
        .await;
    assert_eq!(data["outcome"], "booking");
    assert_eq!(data["step"], "select_service");
}

#[tokio::test]
async fn test_business_owner_manages_salon() {
    let harness = Harness::new();
    let response = harness
        .send(
            Method::POST,
            "/auth/register/business",
            None,
            Some(json!({
                "owner_name": "Maria Costa",
                "business_name": "Costa Cuts",
                "email": "maria@example.com",
                "phone_number": "+351 912 000 111",
                "password": "Secur3!pw",
                "terms_accepted": true,
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.json_body());
    let token = response.session_token.unwrap();

    let created = harness
        .post(
            "/business/services",
            &token,
            json!({"name": "Color", "duration": 90, "price": 120.5}),
        )
        .await;
    assert_eq!(created["name"], "Color");

    let services = harness.send(Method::GET, "/business/services", Some(&token), None).await;
    assert_eq!(services.json_body()["data"].as_array().map(Vec::len), Some(1));

    let qr = harness.send(Method::GET, "/business/qr", Some(&token), None).await.json_body();
    let payload = qr["data"]["token"].as_str().unwrap().to_string();
    assert!(payload.starts_with("SALONPRO-BUSINESS-"));

    // A customer can scan the generated token
    let scan = harness.send(Method::POST, "/qr/resolve", None, Some(json!({"payload": payload}))).await;
    assert_eq!(scan.status, StatusCode::OK);
    assert_eq!(scan.json_body()["data"]["business"]["business_name"], "Costa Cuts");

    // Salon owners cannot reach admin views
    let admin = harness.send(Method::GET, "/admin/stats", Some(&token), None).await;
    assert_eq!(admin.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let harness = Harness::new();
    harness.register_customer(None).await;
    let response = harness
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"email": "ana@example.com", "password": "Wrong0ne!"})),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json_body()["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_logout_drops_session() {
    let harness = Harness::new();
    let (token, _) = harness.register_customer(None).await;
    let sessions_before = harness.state.sessions().len();

    let response = harness.send(Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.session_token.is_none());
    assert_eq!(harness.state.sessions().len(), sessions_before - 1);
}

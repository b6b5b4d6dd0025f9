//! JSON HTTP API over hyper
//!
//! One connection task per client, each request routed by method and path
//! segments. Sessions travel in `Authorization: Bearer <token>`. A request
//! without a known token that leaves state behind (a sign-in, a remembered
//! salon) gets a new session whose token comes back in the `x-session-token`
//! header.
//!
//! Responses are `{"ok":true,"data":...}` or
//! `{"ok":false,"error":<kind>,"message":<text>}`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, AUTHORIZATION, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::booking::TimeSlot;
use crate::domain::types::{AppointmentId, AppointmentStatus, BusinessId, ServiceId, StylistId};
use crate::error::{BookingError, ValidationError};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::gateway::Gateway;
use crate::io::identity::{Identity, IdentityError};
use crate::io::prometheus;
use crate::services::auth::{AuthService, BusinessRegistration, Credentials, CustomerRegistration};
use crate::services::dashboard::{
    require_customer, AppointmentFilter, AppointmentQuery, DashboardService, ProfileUpdate,
    ServiceInput, ServicePatch, StylistInput,
};
use crate::services::qr::QrResolver;
use crate::services::session::{SessionHandle, SessionStore};
use crate::services::wizard::{BookingWizard, WizardService};

/// Request bodies larger than this are rejected with 413
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub const SESSION_HEADER: &str = "x-session-token";

const JSON: &str = "application/json";

/// Everything a request handler can reach
pub struct AppState {
    site_id: String,
    metrics_enabled: bool,
    metrics: Arc<Metrics>,
    sessions: SessionStore,
    session_idle: Duration,
    wizards: Arc<WizardService>,
    qr: QrResolver,
    auth: AuthService,
    dashboard: DashboardService,
}

impl AppState {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn Gateway>,
        identity: Arc<dyn Identity>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::build(config, gateway, identity, metrics, None)
    }

    /// Same as [`AppState::new`] with the calendar fixed to `today`
    pub fn pinned_to(
        config: &Config,
        gateway: Arc<dyn Gateway>,
        identity: Arc<dyn Identity>,
        metrics: Arc<Metrics>,
        today: NaiveDate,
    ) -> Self {
        Self::build(config, gateway, identity, metrics, Some(today))
    }

    fn build(
        config: &Config,
        gateway: Arc<dyn Gateway>,
        identity: Arc<dyn Identity>,
        metrics: Arc<Metrics>,
        today: Option<NaiveDate>,
    ) -> Self {
        let mut wizards = WizardService::new(gateway.clone(), metrics.clone(), config.slot_schedule().clone());
        let mut dashboard = DashboardService::new(gateway.clone(), config.public_base_url());
        if let Some(today) = today {
            wizards = wizards.with_today(today);
            dashboard = dashboard.with_today(today);
        }
        let wizards = Arc::new(wizards);

        Self {
            site_id: config.site_id().to_string(),
            metrics_enabled: config.metrics_enabled(),
            sessions: SessionStore::new().with_metrics(metrics.clone()),
            session_idle: Duration::from_secs(config.session_idle_secs()),
            qr: QrResolver::new(gateway.clone(), metrics.clone(), wizards.clone()),
            auth: AuthService::new(gateway, identity, metrics.clone(), wizards.clone())
                .with_recheck_interval(Duration::from_secs(config.session_recheck_secs())),
            dashboard,
            wizards,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Drop sessions idle past the configured limit
    pub fn sweep_idle_sessions(&self) -> usize {
        self.sessions.sweep_idle(self.session_idle)
    }
}

/// Transport-independent request, already collected
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub token: Option<String>,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path.to_string(), None),
        };
        Self { method, path, query, token: None, body: Bytes::new() }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    /// First non-empty value for `key`, percent-decoded
    fn query_param(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_deref()?.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
    pub session_token: Option<String>,
}

impl ApiResponse {
    fn json(status: StatusCode, value: &Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| br#"{"ok":false}"#.to_vec());
        Self { status, content_type: JSON, body: Bytes::from(body), session_token: None }
    }

    fn text(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self { status, content_type, body: body.into(), session_token: None }
    }

    fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self::json(StatusCode::OK, &json!({ "ok": true, "data": data })),
            Err(e) => {
                log_serialize_error(&e);
                Self::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "ok": false, "error": "internal", "message": "Unexpected server error" }),
                )
            }
        }
    }

    fn error(err: &BookingError) -> Self {
        let status = error_status(err);
        if status.is_server_error() {
            warn!(error = %err, kind = err.kind(), "request_failed");
        }
        let mut body = json!({ "ok": false, "error": err.kind(), "message": err.user_message() });
        if let BookingError::Validation(ValidationError::Form(fields)) = err {
            body["fields"] = json!(fields);
        }
        Self::json(status, &body)
    }

    fn with_session(mut self, token: String) -> Self {
        self.session_token = Some(token);
        self
    }

    /// Decoded JSON body; tests read responses through this
    pub fn json_body(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub fn error_status(err: &BookingError) -> StatusCode {
    match err {
        BookingError::Validation(_) => StatusCode::BAD_REQUEST,
        BookingError::Unauthorized => StatusCode::UNAUTHORIZED,
        BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
        BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
        BookingError::BusinessInactive(_) => StatusCode::CONFLICT,
        BookingError::Gateway(_) => StatusCode::BAD_GATEWAY,
        BookingError::Identity(IdentityError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
        BookingError::Identity(IdentityError::AlreadyRegistered) => StatusCode::CONFLICT,
        BookingError::Identity(_) => StatusCode::BAD_GATEWAY,
    }
}

#[cold]
#[inline(never)]
fn log_serialize_error(e: &serde_json::Error) {
    error!(error = %e, "response_serialize_failed");
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, BookingError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { body };
    serde_json::from_slice(raw)
        .map_err(|e| ValidationError::Invalid(format!("Malformed request body: {e}")).into())
}

fn bearer_token(req: &Request<Incoming>) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[derive(Deserialize)]
struct PayloadBody {
    #[serde(default)]
    payload: String,
}

#[derive(Deserialize)]
struct ManualBody {
    #[serde(default)]
    business_id: String,
}

#[derive(Deserialize)]
struct BusinessChoice {
    business_id: BusinessId,
}

#[derive(Deserialize)]
struct ServiceChoice {
    service_id: ServiceId,
}

#[derive(Deserialize)]
struct StylistChoiceBody {
    #[serde(default)]
    stylist_id: Option<StylistId>,
}

#[derive(Deserialize)]
struct DateTimeBody {
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmBody {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: AppointmentStatus,
}

#[derive(Deserialize)]
struct ActiveBody {
    active: bool,
}

#[derive(Serialize)]
struct Deleted<'a> {
    deleted: &'a str,
}

/// Route one request. Never fails: errors become JSON error responses.
pub async fn dispatch(state: &AppState, req: ApiRequest) -> ApiResponse {
    let path = req.path.trim_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&req.method, segments.as_slice()) {
        (&Method::GET, ["health"]) => return ApiResponse::text(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, ["metrics"]) if state.metrics_enabled => {
            let body = prometheus::format_prometheus_metrics(&state.metrics, &state.site_id);
            return ApiResponse::text(StatusCode::OK, prometheus::CONTENT_TYPE, body);
        }
        (&Method::OPTIONS, _) => return ApiResponse::text(StatusCode::NO_CONTENT, "text/plain", ""),
        _ => {}
    }

    let slot = state.sessions.resolve(req.token.as_deref());
    if slot.stored {
        state.auth.revalidate(&mut *slot.handle.lock().await).await;
    }
    let result = route(state, &req, &segments, &slot.token, &slot.handle).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => ApiResponse::error(&e),
    };

    // Blank detached sessions are never stored, and a signed-out session is
    // gone; neither token is handed back
    if state.sessions.keep(&slot).await {
        response.with_session(slot.token)
    } else {
        response
    }
}

async fn route(
    state: &AppState,
    req: &ApiRequest,
    segments: &[&str],
    token: &str,
    handle: &SessionHandle,
) -> Result<ApiResponse, BookingError> {
    let dashboard = &state.dashboard;
    match (&req.method, segments) {
        // --- auth ---
        (&Method::POST, ["auth", "register", "customer"]) => {
            let form: CustomerRegistration = parse_body(&req.body)?;
            let mut entry = handle.lock().await;
            Ok(ApiResponse::ok(&state.auth.register_customer(form, &mut entry).await?))
        }
        (&Method::POST, ["auth", "register", "business"]) => {
            let form: BusinessRegistration = parse_body(&req.body)?;
            let mut entry = handle.lock().await;
            Ok(ApiResponse::ok(&state.auth.register_business(form, &mut entry).await?))
        }
        (&Method::POST, ["auth", "login"]) => {
            let credentials: Credentials = parse_body(&req.body)?;
            let mut entry = handle.lock().await;
            Ok(ApiResponse::ok(&state.auth.login(credentials, &mut entry).await?))
        }
        (&Method::POST, ["auth", "logout"]) => {
            let mut entry = handle.lock().await;
            state.auth.logout(&mut entry).await?;
            drop(entry);
            state.sessions.remove(token);
            Ok(ApiResponse::ok(&json!({ "signed_out": true })))
        }
        (&Method::GET, ["auth", "session"]) => {
            let entry = handle.lock().await;
            let ctx = &entry.context;
            Ok(ApiResponse::ok(&json!({
                "authenticated": ctx.is_authenticated(),
                "role": ctx.role(),
                "customer_id": ctx.customer_id(),
                "business_id": ctx.business_id(),
                "selected_business_id": ctx.selected_business_id,
            })))
        }

        // --- qr ---
        (&Method::POST, ["qr", "resolve"]) => {
            let body: PayloadBody = parse_body(&req.body)?;
            let mut entry = handle.lock().await;
            Ok(ApiResponse::ok(&state.qr.resolve_scan(&body.payload, &mut entry).await?))
        }
        (&Method::POST, ["qr", "manual"]) => {
            let body: ManualBody = parse_body(&req.body)?;
            let mut entry = handle.lock().await;
            Ok(ApiResponse::ok(&state.qr.resolve_manual(&body.business_id, &mut entry).await?))
        }

        // --- booking wizard ---
        (&Method::GET, ["booking"]) => booking_view(state, handle).await,
        (&Method::POST, ["booking", "start"]) => {
            let mut entry = handle.lock().await;
            require_customer(&entry.context)?;
            let wizard = state.wizards.start(entry.context.selected_business_id.clone());
            let view = wizard.view(None);
            entry.wizard = Some(wizard);
            Ok(ApiResponse::ok(&view))
        }
        (&Method::POST, ["booking", action]) => booking_action(state, req, handle, action).await,

        // --- customer ---
        (&Method::GET, ["customer", "appointments"]) => {
            let filter: AppointmentFilter =
                req.query_param("filter").as_deref().unwrap_or("all").parse()?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.customer_appointments(&ctx, filter).await?))
        }
        (&Method::GET, ["customer", "upcoming"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.upcoming_panel(&ctx).await?))
        }
        (&Method::POST, ["customer", "appointments", id, "cancel"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.cancel_appointment(&ctx, &AppointmentId::new(*id)).await?))
        }
        (&Method::PATCH, ["customer", "profile"]) => {
            let update: ProfileUpdate = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.update_profile(&ctx, update).await?))
        }

        // --- business ---
        (&Method::GET, ["business", "stats"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.business_stats(&ctx).await?))
        }
        (&Method::GET, ["business", "appointments"]) => {
            let filter = appointment_query(req)?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.business_appointments(&ctx, &filter).await?))
        }
        (&Method::POST, ["business", "appointments", id, "status"]) => {
            let body: StatusBody = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            let updated = dashboard
                .update_appointment_status(&ctx, &AppointmentId::new(*id), body.status)
                .await?;
            Ok(ApiResponse::ok(&updated))
        }
        (&Method::GET, ["business", "services"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.list_services(&ctx).await?))
        }
        (&Method::POST, ["business", "services"]) => {
            let input: ServiceInput = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.create_service(&ctx, input).await?))
        }
        (&Method::PATCH, ["business", "services", id]) => {
            let patch: ServicePatch = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.update_service(&ctx, &ServiceId::new(*id), patch).await?))
        }
        (&Method::DELETE, ["business", "services", id]) => {
            let ctx = handle.lock().await.context.clone();
            dashboard.delete_service(&ctx, &ServiceId::new(*id)).await?;
            Ok(ApiResponse::ok(&Deleted { deleted: id }))
        }
        (&Method::GET, ["business", "stylists"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.list_stylists(&ctx).await?))
        }
        (&Method::POST, ["business", "stylists"]) => {
            let input: StylistInput = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.create_stylist(&ctx, input).await?))
        }
        (&Method::DELETE, ["business", "stylists", id]) => {
            let ctx = handle.lock().await.context.clone();
            dashboard.delete_stylist(&ctx, &StylistId::new(*id)).await?;
            Ok(ApiResponse::ok(&Deleted { deleted: id }))
        }
        (&Method::GET, ["business", "qr"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.qr_payloads(&ctx)?))
        }

        // --- admin ---
        (&Method::GET, ["admin", "stats"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.admin_stats(&ctx).await?))
        }
        (&Method::GET, ["admin", "appointments"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.all_appointments(&ctx).await?))
        }
        (&Method::GET, ["admin", "top-businesses"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.top_businesses(&ctx).await?))
        }
        (&Method::GET, ["admin", "activity"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.recent_activity(&ctx).await?))
        }
        (&Method::GET, ["admin", "businesses"]) => {
            let ctx = handle.lock().await.context.clone();
            Ok(ApiResponse::ok(&dashboard.list_businesses(&ctx).await?))
        }
        (&Method::POST, ["admin", "businesses", id, "active"]) => {
            let body: ActiveBody = parse_body(&req.body)?;
            let ctx = handle.lock().await.context.clone();
            let business = dashboard
                .set_business_active(&ctx, &BusinessId::new(*id), body.active)
                .await?;
            Ok(ApiResponse::ok(&business))
        }
        (&Method::DELETE, ["admin", "businesses", id]) => {
            let ctx = handle.lock().await.context.clone();
            dashboard.delete_business(&ctx, &BusinessId::new(*id)).await?;
            Ok(ApiResponse::ok(&Deleted { deleted: id }))
        }

        _ => Ok(ApiResponse::json(
            StatusCode::NOT_FOUND,
            &json!({ "ok": false, "error": "no_route", "message": "Not Found" }),
        )),
    }
}

fn appointment_query(req: &ApiRequest) -> Result<AppointmentQuery, BookingError> {
    let bad = |what: &str| BookingError::from(ValidationError::Invalid(format!("Invalid {what}")));
    let date = |key: &str| -> Result<Option<NaiveDate>, BookingError> {
        req.query_param(key)
            .map(|v| v.parse::<NaiveDate>().map_err(|_| bad(key)))
            .transpose()
    };
    Ok(AppointmentQuery {
        status: req
            .query_param("status")
            .map(|v| v.parse::<AppointmentStatus>().map_err(|_| bad("status")))
            .transpose()?,
        date_from: date("date_from")?,
        date_to: date("date_to")?,
        limit: req
            .query_param("limit")
            .map(|v| v.parse::<usize>().map_err(|_| bad("limit")))
            .transpose()?,
    })
}

/// Current step with its option list. Options are fetched without holding the
/// session lock and dropped if the wizard moved on in the meantime.
async fn booking_view(state: &AppState, handle: &SessionHandle) -> Result<ApiResponse, BookingError> {
    let snapshot: BookingWizard = {
        let mut entry = handle.lock().await;
        require_customer(&entry.context)?;
        let selected = entry.context.selected_business_id.clone();
        entry.wizard.get_or_insert_with(|| state.wizards.start(selected)).clone()
    };

    let fetched = state.wizards.load_options(&snapshot).await?;

    let entry = handle.lock().await;
    let Some(current) = entry.wizard.as_ref() else {
        return Ok(ApiResponse::ok(&snapshot.view(None)));
    };
    let options = current.accept(fetched).map(|o| o.options);
    if options.is_none() {
        debug!(generation = current.generation(), "stale_options_dropped");
    }
    Ok(ApiResponse::ok(&current.view(options)))
}

async fn booking_action(
    state: &AppState,
    req: &ApiRequest,
    handle: &SessionHandle,
    action: &str,
) -> Result<ApiResponse, BookingError> {
    let wizards = &state.wizards;
    let mut entry = handle.lock().await;
    let customer_id = require_customer(&entry.context)?;
    let selected = entry.context.selected_business_id.clone();
    let wizard = entry.wizard.get_or_insert_with(|| wizards.start(selected));

    match action {
        "business" => {
            let body: BusinessChoice = parse_body(&req.body)?;
            wizards.select_business(wizard, &body.business_id).await?;
        }
        "service" => {
            let body: ServiceChoice = parse_body(&req.body)?;
            wizards.select_service(wizard, &body.service_id).await?;
        }
        "stylist" => {
            let body: StylistChoiceBody = parse_body(&req.body)?;
            wizards.select_stylist(wizard, body.stylist_id.as_ref()).await?;
        }
        "datetime" => {
            let body: DateTimeBody = parse_body(&req.body)?;
            let time = body.time.as_deref().map(str::parse::<TimeSlot>).transpose()?;
            wizards.set_date_time(wizard, body.date, time)?;
        }
        "next" => wizards.next(wizard)?,
        "back" => wizards.back(wizard)?,
        "confirm" => {
            let body: ConfirmBody = parse_body(&req.body)?;
            let appointment = wizards.confirm(wizard, &customer_id, body.notes).await?;
            return Ok(ApiResponse::ok(&json!({
                "appointment": appointment,
                "booking": wizard.view(None),
            })));
        }
        _ => {
            return Ok(ApiResponse::json(
                StatusCode::NOT_FOUND,
                &json!({ "ok": false, "error": "no_route", "message": "Not Found" }),
            ))
        }
    }
    Ok(ApiResponse::ok(&wizard.view(None)))
}

fn into_hyper(response: ApiResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    let headers = out.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(response.content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(SESSION_HEADER));
    if let Some(token) = response.session_token {
        if let Ok(value) = HeaderValue::from_str(&token) {
            headers.insert(SESSION_HEADER, value);
        }
    }
    out
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let token = bearer_token(&req);
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            let mut api = ApiRequest::new(method.clone(), uri.path());
            api.query = uri.query().map(str::to_string);
            api.token = token;
            api.body = collected.to_bytes();
            dispatch(&state, api).await
        }
        Err(e) => {
            debug!(error = %e, "request_body_rejected");
            ApiResponse::json(
                StatusCode::PAYLOAD_TOO_LARGE,
                &json!({ "ok": false, "error": "body_too_large", "message": "Request body too large" }),
            )
        }
    };

    state.metrics.record_http_request(response.status.as_u16());
    debug!(method = %method, path = %uri.path(), status = response.status.as_u16(), "http_request");
    Ok(into_hyper(response))
}

/// Start the API server; returns once `shutdown` flips to true
pub async fn start_api_server(
    state: Arc<AppState>,
    bind_address: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, site = %state.site_id, "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

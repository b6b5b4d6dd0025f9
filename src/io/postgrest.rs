//! PostgREST implementation of the data gateway
//!
//! Talks to the hosted database through `{url}/rest/v1/{collection}`:
//! - filters render as `column=op.value` (`eq`, `neq`, `gt`, `gte`, `lt`, `lte`, `in`)
//! - ordering renders as `order=col.asc,col2.desc`
//! - writes send `Prefer: return=representation` and read back the stored row

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::{debug, error};

use crate::domain::types::Collection;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::gateway::{Direction, FilterOp, Gateway, GatewayError, Query};

/// Log failed gateway request (cold path)
#[cold]
fn log_request_failed(collection: Collection, op: &str, e: &GatewayError) {
    error!(collection = %collection, op = %op, error = %e, "gateway_request_failed");
}

/// SQLSTATE for a literal that does not parse as the column type
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

/// A key that is not a valid uuid matches no row. PostgREST rejects it with a
/// 400 carrying SQLSTATE 22P02 instead of an empty result.
fn is_malformed_key(e: &GatewayError) -> bool {
    match e {
        GatewayError::Status { status: 400, body, .. } => serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("code").and_then(Value::as_str).map(|c| c == INVALID_TEXT_REPRESENTATION))
            .unwrap_or(false),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bearer token for requests; the API key when unset
    pub service_key: Option<String>,
    pub timeout: Duration,
}

impl PostgrestConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.supabase_url().to_string(),
            api_key: config.supabase_anon_key().to_string(),
            service_key: config.supabase_service_key().map(str::to_string),
            timeout: Duration::from_millis(config.supabase_timeout_ms()),
        }
    }
}

pub struct PostgrestGateway {
    config: PostgrestConfig,
    http: Client,
    metrics: Option<Arc<Metrics>>,
}

impl PostgrestGateway {
    pub fn new(config: PostgrestConfig) -> Result<Self, GatewayError> {
        // Client built once for connection pooling
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http, metrics: None })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn collection_url(&self, collection: Collection) -> Result<Url, GatewayError> {
        let raw = format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            collection.as_str()
        );
        Url::parse(&raw).map_err(|e| GatewayError::Unavailable(format!("invalid url {raw}: {e}")))
    }

    fn url_with_query(
        &self,
        collection: Collection,
        pairs: &[(String, String)],
    ) -> Result<Url, GatewayError> {
        let mut url = self.collection_url(collection)?;
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.config.service_key.as_deref().unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Accept", "application/json")
    }

    async fn send(
        &self,
        collection: Collection,
        op: &'static str,
        request: RequestBuilder,
    ) -> Result<Vec<Value>, GatewayError> {
        let start = Instant::now();
        let result = self.send_inner(collection, request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        if let Some(metrics) = &self.metrics {
            metrics.record_gateway_latency(latency_ms);
            if result.as_ref().is_err_and(|e| !is_malformed_key(e)) {
                metrics.record_gateway_error();
            }
        }

        match &result {
            Err(e) if is_malformed_key(e) => {
                debug!(collection = %collection, op = %op, "gateway_malformed_key")
            }
            Ok(rows) => debug!(
                collection = %collection,
                op = %op,
                rows = rows.len(),
                latency_ms = %latency_ms,
                "gateway_request"
            ),
            Err(e) => log_request_failed(collection, op, e),
        }
        result
    }

    async fn send_inner(
        &self,
        collection: Collection,
        request: RequestBuilder,
    ) -> Result<Vec<Value>, GatewayError> {
        let response = self.authorize(request).send().await?;
        let response = check_status(collection, response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text)
            .map_err(|source| GatewayError::Decode { collection, source })?
        {
            Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }
}

async fn check_status(collection: Collection, response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status { collection, status: status.as_u16(), body })
}

/// Render a filter value the way PostgREST expects it in a query string
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values inside `in.(...)` are quoted when they contain reserved characters
fn render_list_item(value: &Value) -> String {
    let raw = render_value(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Translate a [`Query`] into PostgREST query-string pairs
pub fn render_query(query: &Query) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(query.filters.len() + 2);

    for filter in &query.filters {
        let rendered = match &filter.op {
            FilterOp::Eq(v) if v.is_null() => "is.null".to_string(),
            FilterOp::Eq(v) => format!("eq.{}", render_value(v)),
            FilterOp::Neq(v) => format!("neq.{}", render_value(v)),
            FilterOp::Gt(v) => format!("gt.{}", render_value(v)),
            FilterOp::Gte(v) => format!("gte.{}", render_value(v)),
            FilterOp::Lt(v) => format!("lt.{}", render_value(v)),
            FilterOp::Lte(v) => format!("lte.{}", render_value(v)),
            FilterOp::In(values) => format!(
                "in.({})",
                values.iter().map(render_list_item).collect::<Vec<_>>().join(",")
            ),
        };
        pairs.push((filter.column.clone(), rendered));
    }

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                format!("{}.{}", o.column, dir)
            })
            .collect::<Vec<_>>()
            .join(",");
        pairs.push(("order".to_string(), order));
    }

    if let Some(limit) = query.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }

    pairs
}

fn id_filter(id: &str) -> Vec<(String, String)> {
    vec![("id".to_string(), format!("eq.{id}"))]
}

#[async_trait]
impl Gateway for PostgrestGateway {
    async fn create(&self, collection: Collection, record: Value) -> Result<Value, GatewayError> {
        let url = self.collection_url(collection)?;
        let request = self
            .http
            .post(url)
            .header("Prefer", "return=representation")
            .json(&record);
        let rows = self.send(collection, "create", request).await?;
        rows.into_iter().next().ok_or_else(|| GatewayError::Status {
            collection,
            status: 201,
            body: "insert returned no representation".to_string(),
        })
    }

    async fn get_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, GatewayError> {
        let mut pairs = id_filter(id);
        pairs.push(("limit".to_string(), "1".to_string()));
        let url = self.url_with_query(collection, &pairs)?;
        match self.send(collection, "get_by_id", self.http.get(url)).await {
            Ok(rows) => Ok(rows.into_iter().next()),
            Err(e) if is_malformed_key(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let url = self.url_with_query(collection, &render_query(query))?;
        self.send(collection, "list", self.http.get(url)).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Option<Value>, GatewayError> {
        let url = self.url_with_query(collection, &id_filter(id))?;
        let request = self
            .http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&patch);
        match self.send(collection, "update", request).await {
            Ok(rows) => Ok(rows.into_iter().next()),
            Err(e) if is_malformed_key(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        let url = self.url_with_query(collection, &id_filter(id))?;
        match self.send(collection, "delete", self.http.delete(url)).await {
            Ok(_) => Ok(()),
            Err(e) if is_malformed_key(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_render_query_filters_order_limit() {
        let query = Query::new()
            .eq("business_id", "b1")
            .eq("is_active", true)
            .gte("appointment_date", "2025-06-01")
            .lt("appointment_date", "2025-06-02")
            .order_by("appointment_date", Direction::Desc)
            .order_by("appointment_time", Direction::Desc)
            .limit(5);

        assert_eq!(
            render_query(&query),
            vec![
                pair("business_id", "eq.b1"),
                pair("is_active", "eq.true"),
                pair("appointment_date", "gte.2025-06-01"),
                pair("appointment_date", "lt.2025-06-02"),
                pair("order", "appointment_date.desc,appointment_time.desc"),
                pair("limit", "5"),
            ]
        );
    }

    #[test]
    fn test_render_in_list_quotes_reserved() {
        let query = Query::new().is_in("status", ["pending", "no show"]);
        assert_eq!(render_query(&query), vec![pair("status", "in.(pending,\"no show\")")]);
    }

    #[test]
    fn test_null_equality_uses_is() {
        let query = Query::new().eq("stylist_id", serde_json::Value::Null);
        assert_eq!(render_query(&query), vec![pair("stylist_id", "is.null")]);
    }

    #[test]
    fn test_collection_url() {
        let gateway = PostgrestGateway::new(PostgrestConfig {
            base_url: "https://abc.supabase.co/".to_string(),
            api_key: "anon".to_string(),
            service_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let url = gateway
            .url_with_query(Collection::Services, &[pair("business_id", "eq.b1")])
            .unwrap();
        assert_eq!(url.as_str(), "https://abc.supabase.co/rest/v1/services?business_id=eq.b1");
    }

    #[test]
    fn test_malformed_key_classification() {
        let uuid_error = GatewayError::Status {
            collection: Collection::Services,
            status: 400,
            body: r#"{"code":"22P02","details":null,"hint":null,"message":"invalid input syntax for type uuid: \"x\""}"#
                .to_string(),
        };
        assert!(is_malformed_key(&uuid_error));

        let other_400 = GatewayError::Status {
            collection: Collection::Services,
            status: 400,
            body: r#"{"code":"PGRST100","message":"bad filter"}"#.to_string(),
        };
        assert!(!is_malformed_key(&other_400));

        let server_error = GatewayError::Status {
            collection: Collection::Services,
            status: 500,
            body: r#"{"code":"22P02"}"#.to_string(),
        };
        assert!(!is_malformed_key(&server_error));
    }

    /// Serves one canned PostgREST reply on a local port
    async fn canned_postgrest(status: u16, body: &'static str) -> String {
        use http_body_util::Full;
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper_util::rt::TokioIo;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let service = service_fn(move |_req: hyper::Request<hyper::body::Incoming>| async move {
                    let mut response = hyper::Response::new(Full::new(bytes::Bytes::from(body)));
                    *response.status_mut() = hyper::StatusCode::from_u16(status).unwrap();
                    Ok::<_, std::convert::Infallible>(response)
                });
                tokio::spawn(http1::Builder::new().serve_connection(TokioIo::new(stream), service));
            }
        });
        format!("http://{addr}")
    }

    fn gateway_at(base_url: String, metrics: Arc<Metrics>) -> PostgrestGateway {
        PostgrestGateway::new(PostgrestConfig {
            base_url,
            api_key: "anon".to_string(),
            service_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
        .with_metrics(metrics)
    }

    #[tokio::test]
    async fn test_non_uuid_id_reads_as_missing() {
        let base = canned_postgrest(
            400,
            r#"{"code":"22P02","details":null,"hint":null,"message":"invalid input syntax for type uuid: \"x\""}"#,
        )
        .await;
        let metrics = Arc::new(Metrics::new());
        let gateway = gateway_at(base, metrics.clone());

        assert!(gateway.get_by_id(Collection::Services, "x").await.unwrap().is_none());
        assert!(gateway
            .update(Collection::Appointments, "x", serde_json::json!({"status": "cancelled"}))
            .await
            .unwrap()
            .is_none());
        assert_eq!(metrics.gateway_errors(), 0);
    }

    #[tokio::test]
    async fn test_other_rejections_still_fail() {
        let base = canned_postgrest(401, r#"{"message":"Invalid API key"}"#).await;
        let metrics = Arc::new(Metrics::new());
        let gateway = gateway_at(base, metrics.clone());

        let err = gateway.get_by_id(Collection::Services, "x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 401, .. }));
        assert_eq!(metrics.gateway_errors(), 1);
    }
}

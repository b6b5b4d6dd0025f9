//! In-process backend for local development and tests
//!
//! Implements both [`Gateway`] and [`Identity`] over hash maps so the service
//! can run without the hosted backend (`--memory`). Every gateway call is
//! counted, and the gateway can be switched into a failing mode to exercise
//! error paths.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::types::Collection;
use crate::io::gateway::{Direction, FilterOp, Gateway, GatewayError, Query};
use crate::io::identity::{AuthSession, AuthUser, Identity, IdentityError, SignUp};

#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<FxHashMap<Collection, Vec<Value>>>,
    calls: AtomicU64,
    failing: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing call accounting
    pub fn seed(&self, collection: Collection, record: Value) {
        self.tables.lock().entry(collection).or_default().push(record);
    }

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.tables.lock().get(&collection).cloned().unwrap_or_default()
    }

    /// Total gateway calls made through the trait
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// While set, every call fails with [`GatewayError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn begin(&self) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(GatewayError::Unavailable("memory gateway set to fail".to_string()));
        }
        Ok(())
    }
}

fn id_of(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Order two JSON scalars. Strings compare lexically, which is correct for
/// ISO dates and `HH:MM` times.
fn compare(a: &Value, b: &Value) -> Option<CmpOrdering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(CmpOrdering::Equal),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(CmpOrdering::Equal)
}

fn matches(record: &Value, query: &Query) -> bool {
    query.filters.iter().all(|filter| {
        let field = record.get(&filter.column).unwrap_or(&Value::Null);
        match &filter.op {
            FilterOp::Eq(v) => loosely_equal(field, v),
            FilterOp::Neq(v) => !loosely_equal(field, v),
            FilterOp::Gt(v) => compare(field, v) == Some(CmpOrdering::Greater),
            FilterOp::Gte(v) => {
                matches!(compare(field, v), Some(CmpOrdering::Greater | CmpOrdering::Equal))
            }
            FilterOp::Lt(v) => compare(field, v) == Some(CmpOrdering::Less),
            FilterOp::Lte(v) => {
                matches!(compare(field, v), Some(CmpOrdering::Less | CmpOrdering::Equal))
            }
            FilterOp::In(values) => values.iter().any(|v| loosely_equal(field, v)),
        }
    })
}

/// Sort order for one column. Nulls rank above every value, as in Postgres.
fn sort_cmp(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Null, Value::Null) => CmpOrdering::Equal,
        (Value::Null, _) => CmpOrdering::Greater,
        (_, Value::Null) => CmpOrdering::Less,
        _ => compare(a, b).unwrap_or(CmpOrdering::Equal),
    }
}

fn sort(rows: &mut [Value], query: &Query) {
    rows.sort_by(|a, b| {
        for order in &query.order {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ord = sort_cmp(left, right);
            let ord = match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn create(&self, collection: Collection, record: Value) -> Result<Value, GatewayError> {
        self.begin()?;
        let Value::Object(mut fields) = record else {
            return Err(GatewayError::Status {
                collection,
                status: 400,
                body: "record must be a JSON object".to_string(),
            });
        };
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::now_v7().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
        let stored = Value::Object(fields);
        self.tables.lock().entry(collection).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn get_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, GatewayError> {
        self.begin()?;
        let tables = self.tables.lock();
        Ok(tables
            .get(&collection)
            .and_then(|rows| rows.iter().find(|r| id_of(r) == Some(id)).cloned()))
    }

    async fn list(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.begin()?;
        let mut rows: Vec<Value> = {
            let tables = self.tables.lock();
            tables
                .get(&collection)
                .map(|rows| rows.iter().filter(|r| matches(r, query)).cloned().collect())
                .unwrap_or_default()
        };
        sort(&mut rows, query);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Option<Value>, GatewayError> {
        self.begin()?;
        let mut tables = self.tables.lock();
        let Some(row) = tables
            .get_mut(&collection)
            .and_then(|rows| rows.iter_mut().find(|r| id_of(r) == Some(id)))
        else {
            return Ok(None);
        };
        if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
            for (key, value) in changes {
                target.insert(key, value);
            }
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        self.begin()?;
        if let Some(rows) = self.tables.lock().get_mut(&collection) {
            rows.retain(|r| id_of(r) != Some(id));
        }
        Ok(())
    }
}

struct MemoryAccount {
    password: String,
    user: AuthUser,
}

/// Identity provider with auto-confirmed sign-ups and opaque random tokens
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: Mutex<FxHashMap<String, MemoryAccount>>,
    tokens: Mutex<FxHashMap<String, AuthUser>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, user: &AuthUser) -> AuthSession {
        let access_token = Uuid::now_v7().simple().to_string();
        self.tokens.lock().insert(access_token.clone(), user.clone());
        AuthSession {
            access_token,
            refresh_token: None,
            expires_in: Some(3600),
            user: user.clone(),
        }
    }
}

#[async_trait]
impl Identity for MemoryIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUp, IdentityError> {
        let key = email.to_ascii_lowercase();
        let user = {
            let mut accounts = self.accounts.lock();
            if accounts.contains_key(&key) {
                return Err(IdentityError::AlreadyRegistered);
            }
            let user = AuthUser {
                id: Uuid::now_v7().to_string(),
                email: Some(email.to_string()),
                user_metadata: if metadata.is_null() { json!({}) } else { metadata },
            };
            accounts.insert(key, MemoryAccount { password: password.to_string(), user: user.clone() });
            user
        };
        let session = self.issue(&user);
        Ok(SignUp { user, session: Some(session) })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        let user = {
            let accounts = self.accounts.lock();
            match accounts.get(&email.to_ascii_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(IdentityError::InvalidCredentials),
            }
        };
        Ok(self.issue(&user))
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<AuthUser>, IdentityError> {
        Ok(self.tokens.lock().get(access_token).cloned())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        self.tokens.lock().remove(access_token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryGateway {
        let gateway = MemoryGateway::new();
        gateway.seed(Collection::Services, json!({"id": "s1", "business_id": "b1", "name": "Trim", "price": 20}));
        gateway.seed(Collection::Services, json!({"id": "s2", "business_id": "b1", "name": "Color", "price": 80}));
        gateway.seed(Collection::Services, json!({"id": "s3", "business_id": "b2", "name": "Blowout", "price": 35}));
        gateway
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_limits() {
        let gateway = seeded();
        let query = Query::new().eq("business_id", "b1").order_by("price", Direction::Desc).limit(1);
        let rows = gateway.list(Collection::Services, &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "s2");
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_sort_column_ranks_last_ascending() {
        let gateway = seeded();
        gateway.seed(Collection::Services, json!({"id": "s4", "business_id": "b1", "name": "Consult"}));
        let query = Query::new().order_by("price", Direction::Asc);
        let rows = gateway.list(Collection::Services, &query).await.unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3", "s2", "s4"]);
    }

    #[tokio::test]
    async fn test_range_and_in_filters() {
        let gateway = seeded();
        let query = Query::new().gte("price", 30).is_in("business_id", ["b1", "b2"]);
        let mut ids: Vec<String> = gateway
            .list(Collection::Services, &query)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["s2", "s3"]);
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_update_merges() {
        let gateway = MemoryGateway::new();
        let created = gateway
            .create(Collection::Stylists, json!({"name": "Ana", "is_available": true}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let updated = gateway
            .update(Collection::Stylists, &id, json!({"is_available": false}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["name"], "Ana");
        assert_eq!(updated["is_available"], false);

        gateway.delete(Collection::Stylists, &id).await.unwrap();
        assert!(gateway.get_by_id(Collection::Stylists, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let gateway = seeded();
        gateway.set_failing(true);
        assert!(matches!(
            gateway.get_by_id(Collection::Services, "s1").await,
            Err(GatewayError::Unavailable(_))
        ));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_identity_round_trip() {
        let identity = MemoryIdentity::new();
        identity.sign_up("Ana@Example.com", "Secret1!", json!({"user_type": "customer"})).await.unwrap();
        assert!(matches!(
            identity.sign_up("ana@example.com", "x", Value::Null).await,
            Err(IdentityError::AlreadyRegistered)
        ));
        assert!(matches!(
            identity.sign_in("ana@example.com", "wrong").await,
            Err(IdentityError::InvalidCredentials)
        ));

        let session = identity.sign_in("ana@example.com", "Secret1!").await.unwrap();
        let user = identity.get_session(&session.access_token).await.unwrap().unwrap();
        assert_eq!(user.user_type(), Some("customer"));

        identity.sign_out(&session.access_token).await.unwrap();
        assert!(identity.get_session(&session.access_token).await.unwrap().is_none());
    }
}

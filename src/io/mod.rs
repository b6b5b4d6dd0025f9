//! IO modules - external system interfaces
//!
//! - `gateway` - Record store contract and query builder
//! - `postgrest` - Gateway over Supabase PostgREST
//! - `identity` - Identity provider contract
//! - `gotrue` - Identity over Supabase GoTrue
//! - `memory` - In-process Gateway and Identity for local runs and tests
//! - `http_api` - JSON HTTP API
//! - `prometheus` - Prometheus text exposition

pub mod gateway;
pub mod gotrue;
pub mod http_api;
pub mod identity;
pub mod memory;
pub mod postgrest;
pub mod prometheus;

// Re-export commonly used types
pub use gateway::{Gateway, GatewayError, Query};
pub use gotrue::GoTrueClient;
pub use http_api::{start_api_server, AppState};
pub use identity::{Identity, IdentityError};
pub use memory::{MemoryGateway, MemoryIdentity};
pub use postgrest::PostgrestGateway;

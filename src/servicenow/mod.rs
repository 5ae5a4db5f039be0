//! Client for the ITSM instance's REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Enrichment (enrichment.rs)             │
//! │  - concurrent record fetch per sub       │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │   Domain operations                      │
//! │  subscriptions / records / incidents     │
//! │  catalog / users                         │
//! │  - path templates, Filter + Params       │
//! │  - activation error translation          │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │   Call engine (client.rs)                │
//! │  - path resolution, bearer auth          │
//! │  - status / content classification       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every operation returns the HTTP status alongside its value, and failures
//! keep it on the [`ApiError`], so the boundary layer can branch on 404 vs 403.

mod catalog;
mod client;
mod enrichment;
mod error;
mod incidents;
mod models;
mod query;
mod records;
mod subscriptions;
mod users;

pub use client::{build_http_client, ClientOptions, Reply, ServiceNowClient, CONTENT_TYPE_JSON};
pub use enrichment::{enrich_and_filter, enrich_subscriptions, filter_unresolved, EnrichmentOptions};
pub use error::ApiError;
pub use models::{
    CatalogItem, Choice, ExternalUser, IncidentPayload, Record, RecordSummary, Reference,
    Subscription, SubscriptionType, SubscriptionUpdate,
};
pub use query::{
    Filter, Params, SYSPARM_DISPLAY_VALUE, SYSPARM_FIELDS, SYSPARM_LIMIT, SYSPARM_OFFSET,
    SYSPARM_QUERY,
};
pub use records::RECORD_TYPES;
pub use subscriptions::SubscriptionQuery;

/// Table API root
pub const PATH_TABLE_API: &str = "api/now/table";

/// Field the subscription listing is ordered by (newest first).
pub const FIELD_UPDATED_ON: &str = "sys_updated_on";

fn table_path(table: &str) -> String {
    format!("{}/{}", PATH_TABLE_API, table)
}

fn record_path(table: &str, sys_id: &str) -> String {
    format!("{}/{}/{}", PATH_TABLE_API, table, sys_id)
}

/// Rejects identifiers that would escape their path segment.
fn validate_identifier(kind: &str, value: &str) -> Result<(), ApiError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!("invalid {} '{}'", kind, value)))
    }
}

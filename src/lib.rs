// Bridge configuration and runtime snapshot
pub mod config;

// Token model and at-rest encryption
pub mod credentials;

// Key-value persistence
pub mod kvstore;

// Per-user connection records
pub mod users;

// OAuth connect / refresh lifecycle
pub mod oauth;

// ServiceNow REST client, domain operations and enrichment
pub mod servicenow;

// Webhook authentication
pub mod auth;

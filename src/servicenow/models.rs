//! Wire types for the instance's Table API.

use serde::{Deserialize, Deserializer, Serialize};

/// `{"result": ...}` wrapper around every Table API payload.
#[derive(Debug, Deserialize)]
pub(crate) struct ResultEnvelope<T> {
    pub result: T,
}

/// Whether a subscription follows one record or every record of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    /// Scoped to a single record (`record_id` set)
    Record,
    /// Bulk subscription to a whole record type
    #[serde(rename = "object")]
    Bulk,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Record => "record",
            SubscriptionType::Bulk => "object",
        }
    }
}

/// Channel subscription stored on the instance.
///
/// `number` and `short_description` are filled in by enrichment for the
/// current request only. They are never sent back to the instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "sys_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    pub channel_id: String,

    /// Platform user who created the subscription
    pub user_id: String,

    #[serde(rename = "type")]
    pub kind: SubscriptionType,

    pub record_type: String,

    #[serde(default)]
    pub record_id: String,

    /// Comma-separated event filter, e.g. "state,priority,commented"
    #[serde(default)]
    pub subscription_events: String,

    #[serde(default)]
    pub server_url: String,

    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub is_active: bool,

    #[serde(skip)]
    pub number: String,

    #[serde(skip)]
    pub short_description: String,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    pub fn is_record_scoped(&self) -> bool {
        self.kind == SubscriptionType::Record
    }

    /// True once enrichment attached record data.
    pub fn is_enriched(&self) -> bool {
        !self.number.is_empty() || !self.short_description.is_empty()
    }
}

/// Fields that can change on an existing subscription.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_events: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

/// Row of the subscription-auth table written when subscriptions are activated.
#[derive(Debug, Serialize)]
pub(crate) struct SubscriptionAuth<'a> {
    pub server_url: &'a str,
    pub api_secret: &'a str,
}

/// `sys_id` only projection.
#[derive(Debug, Deserialize)]
pub(crate) struct SysIdRow {
    #[allow(dead_code)]
    #[serde(default)]
    pub sys_id: String,
}

/// Reference field rendered with `sysparm_display_value=true`.
///
/// The instance sends either `{"display_value": ..., "link": ...}` or a bare
/// (often empty) string when the reference is unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawReference")]
pub struct Reference {
    pub display_value: String,
    pub link: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReference {
    Object {
        #[serde(default)]
        display_value: String,
        #[serde(default)]
        link: String,
    },
    Text(String),
    Empty,
}

impl From<RawReference> for Reference {
    fn from(raw: RawReference) -> Self {
        match raw {
            RawReference::Object {
                display_value,
                link,
            } => Reference {
                display_value,
                link,
            },
            RawReference::Text(display_value) => Reference {
                display_value,
                link: String::new(),
            },
            RawReference::Empty => Reference::default(),
        }
    }
}

/// Minimal projection used in search results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    #[serde(default)]
    pub sys_id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub short_description: String,
}

/// Full record with display values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub sys_id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub assigned_to: Reference,
    #[serde(default)]
    pub assignment_group: Reference,
    #[serde(default)]
    pub sys_updated_on: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentsRow {
    #[serde(default)]
    pub comments_and_work_notes: String,
}

/// Choice-list entry (states, urgency, impact).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub value: String,
}

/// New incident. Optional fields are omitted when unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IncidentPayload {
    pub short_description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// `sys_id` of the caller in `sys_user`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub caller_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_group: Option<String>,
}

/// Service catalog item (search projection).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(default)]
    pub sys_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub price: String,
}

/// Identity of the connected user on the instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub sys_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user_name: String,
}

/// Accepts `true`, `"true"`, `false`, `"false"` and `""` (false).
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(s) => match s.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean '{}'",
                other
            ))),
        },
    }
}

//! Record search, fetch, comments and state transitions.

use super::client::ServiceNowClient;
use super::error::ApiError;
use super::models::{Choice, CommentsRow, Record, RecordSummary};
use super::query::{Filter, Params};
use super::{record_path, table_path, validate_identifier};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

/// Record types channels can subscribe to.
pub const RECORD_TYPES: &[&str] = &[
    "incident",
    "problem",
    "change_request",
    "sc_req_item",
    "sc_task",
    "task",
];

const SUMMARY_FIELDS: &[&str] = &["sys_id", "number", "short_description"];
const FIELD_COMMENTS: &str = "comments_and_work_notes";
const TABLE_CHOICES: &str = "sys_choice";

impl ServiceNowClient {
    /// Finds records whose number or short description contains `term`.
    pub async fn search_records(
        &self,
        record_type: &str,
        term: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<RecordSummary>, StatusCode), ApiError> {
        validate_identifier("record type", record_type)?;
        let term = self.check_search_term(term)?;

        let filter = Filter::new()
            .like("number", term)
            .or_like("short_description", term);
        let params = Params::new()
            .query(&filter)
            .fields(SUMMARY_FIELDS)
            .limit(limit)
            .offset(offset);

        self.call_result::<(), _>(Method::GET, &table_path(record_type), None, &params)
            .await
    }

    /// Full record with display values for reference fields.
    pub async fn get_record(
        &self,
        record_type: &str,
        record_id: &str,
    ) -> Result<(Record, StatusCode), ApiError> {
        validate_identifier("record type", record_type)?;
        validate_identifier("record ID", record_id)?;

        self.call_result::<(), _>(
            Method::GET,
            &record_path(record_type, record_id),
            None,
            &Params::new().display_value(),
        )
        .await
    }

    /// Journal of comments and work notes as rendered by the instance.
    pub async fn get_all_comments(
        &self,
        record_type: &str,
        record_id: &str,
    ) -> Result<(String, StatusCode), ApiError> {
        validate_identifier("record type", record_type)?;
        validate_identifier("record ID", record_id)?;

        let params = Params::new().fields(&[FIELD_COMMENTS]).display_value();
        let (row, status): (CommentsRow, _) = self
            .call_result::<(), _>(
                Method::GET,
                &record_path(record_type, record_id),
                None,
                &params,
            )
            .await?;
        Ok((row.comments_and_work_notes, status))
    }

    pub async fn add_comment(
        &self,
        record_type: &str,
        record_id: &str,
        comment: &str,
    ) -> Result<StatusCode, ApiError> {
        validate_identifier("record type", record_type)?;
        validate_identifier("record ID", record_id)?;
        if comment.trim().is_empty() {
            return Err(ApiError::InvalidInput("comment is empty".into()));
        }

        let (_, status): (Value, _) = self
            .call_result(
                Method::PATCH,
                &record_path(record_type, record_id),
                Some(&json!({ "comments": comment })),
                &Params::new(),
            )
            .await?;
        Ok(status)
    }

    /// Active choices of the `state` field for a record type.
    pub async fn get_states(
        &self,
        record_type: &str,
    ) -> Result<(Vec<Choice>, StatusCode), ApiError> {
        self.get_choices(record_type, "state").await
    }

    pub async fn update_state(
        &self,
        record_type: &str,
        record_id: &str,
        state: &str,
    ) -> Result<StatusCode, ApiError> {
        validate_identifier("record type", record_type)?;
        validate_identifier("record ID", record_id)?;
        if state.is_empty() {
            return Err(ApiError::InvalidInput("state is empty".into()));
        }

        let (_, status): (Value, _) = self
            .call_result(
                Method::PATCH,
                &record_path(record_type, record_id),
                Some(&json!({ "state": state })),
                &Params::new(),
            )
            .await?;
        Ok(status)
    }

    /// Choice list of `element` on `table`, in the instance's display order.
    pub(crate) async fn get_choices(
        &self,
        table: &str,
        element: &str,
    ) -> Result<(Vec<Choice>, StatusCode), ApiError> {
        validate_identifier("record type", table)?;
        validate_identifier("field", element)?;

        let filter = Filter::new()
            .eq("name", table)
            .eq("element", element)
            .eq("inactive", "false")
            .eq("language", "en")
            .order_by("sequence");
        let params = Params::new().query(&filter).fields(&["label", "value"]);

        self.call_result::<(), _>(Method::GET, &table_path(TABLE_CHOICES), None, &params)
            .await
    }

    /// Returns the trimmed term if it is long enough to search with.
    pub(crate) fn check_search_term<'a>(&self, term: &'a str) -> Result<&'a str, ApiError> {
        let term = term.trim();
        let min = self.options().min_search_term_length;
        if term.chars().count() < min {
            return Err(ApiError::InvalidInput(format!(
                "search term must be at least {} characters",
                min
            )));
        }
        Ok(term)
    }
}

use super::client::ServiceNowClient;
use super::error::ApiError;
use super::models::{Choice, IncidentPayload, RecordSummary};
use super::query::Params;
use super::table_path;
use reqwest::{Method, StatusCode};

const TABLE_INCIDENT: &str = "incident";

impl ServiceNowClient {
    /// Opens a new incident and returns its number and sys_id.
    pub async fn create_incident(
        &self,
        payload: &IncidentPayload,
    ) -> Result<(RecordSummary, StatusCode), ApiError> {
        if payload.short_description.trim().is_empty() {
            return Err(ApiError::InvalidInput(
                "incident needs a short description".into(),
            ));
        }

        self.call_result(
            Method::POST,
            &table_path(TABLE_INCIDENT),
            Some(payload),
            &Params::new(),
        )
        .await
    }

    /// Choices for an incident field such as `urgency` or `impact`.
    pub async fn get_incident_field_choices(
        &self,
        element: &str,
    ) -> Result<(Vec<Choice>, StatusCode), ApiError> {
        self.get_choices(TABLE_INCIDENT, element).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servicenow::test_support;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_incident() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/now/table/incident")
            .match_body(Matcher::Json(json!({
                "short_description": "VPN down",
                "caller_id": "u1",
                "urgency": "2"
            })))
            .with_status(201)
            .with_body(
                json!({"result": {
                    "sys_id": "i1",
                    "number": "INC0010042",
                    "short_description": "VPN down",
                    "state": "1"
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let client = test_support::client(&server.url());
        let payload = IncidentPayload {
            short_description: "VPN down".into(),
            caller_id: "u1".into(),
            urgency: Some("2".into()),
            ..Default::default()
        };
        let (created, status) = client.create_incident(&payload).await.unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.number, "INC0010042");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_incident_requires_description() {
        let client = test_support::client("https://acme.service-now.com");
        let err = client
            .create_incident(&IncidentPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_urgency_choices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/now/table/sys_choice")
            .match_query(Matcher::UrlEncoded(
                "sysparm_query".into(),
                "name=incident^element=urgency^inactive=false^language=en^ORDERBYsequence".into(),
            ))
            .with_status(200)
            .with_body(r#"{"result":[{"label":"1 - High","value":"1"},{"label":"3 - Low","value":"3"}]}"#)
            .create_async()
            .await;

        let client = test_support::client(&server.url());
        let (choices, _) = client.get_incident_field_choices("urgency").await.unwrap();
        assert_eq!(choices[0].value, "1");
        mock.assert_async().await;
    }
}

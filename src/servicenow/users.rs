use super::client::ServiceNowClient;
use super::error::ApiError;
use super::models::ExternalUser;
use super::query::{Filter, Params};
use super::table_path;
use reqwest::{Method, StatusCode};

const TABLE_USER: &str = "sys_user";

impl ServiceNowClient {
    /// Looks up the instance user that owns `email`.
    ///
    /// Zero matches is [`ApiError::UserNotFound`]; the first row wins if the
    /// instance has duplicates.
    pub async fn get_me(&self, email: &str) -> Result<(ExternalUser, StatusCode), ApiError> {
        if email.trim().is_empty() {
            return Err(ApiError::InvalidInput("email is empty".into()));
        }

        let params = Params::new()
            .query(&Filter::new().eq("email", email))
            .fields(&["sys_id", "email", "user_name"])
            .limit(1);

        let (users, status): (Vec<ExternalUser>, _) = self
            .call_result::<(), _>(Method::GET, &table_path(TABLE_USER), None, &params)
            .await?;

        users
            .into_iter()
            .next()
            .map(|user| (user, status))
            .ok_or_else(|| ApiError::UserNotFound {
                status,
                email: email.to_string(),
            })
    }
}

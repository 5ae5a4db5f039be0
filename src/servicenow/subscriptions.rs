//! Subscription CRUD against the scoped app's tables.

use super::client::ServiceNowClient;
use super::error::ApiError;
use super::models::{Subscription, SubscriptionAuth, SubscriptionType, SubscriptionUpdate, SysIdRow};
use super::query::{Filter, Params};
use super::{record_path, table_path, validate_identifier, FIELD_UPDATED_ON};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

/// Compatibility shims for instances that only report these conditions in
/// the message text.
const INVALID_TABLE_MESSAGE: &str = "Invalid table";
const NOT_AUTHORIZED_MESSAGE: &str = "User Not Authorized";

/// Listing filter. Empty strings and `None` mean "no filter on this field".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionQuery {
    pub channel_id: String,
    pub user_id: String,
    pub kind: Option<SubscriptionType>,
    pub server_url: String,
    pub limit: u32,
    pub offset: u32,
}

impl ServiceNowClient {
    fn subscriptions_table(&self) -> String {
        format!("{}_subscriptions", self.options().app_scope)
    }

    fn subscription_auth_table(&self) -> String {
        format!("{}_subscription_auth", self.options().app_scope)
    }

    /// Verifies the instance can hold subscriptions and registers this chat
    /// server with it on first use.
    ///
    /// Fails with [`ApiError::NotConfigured`] when the scoped app is missing and
    /// [`ApiError::NotAuthorized`] when the user may not read its tables.
    pub async fn activate_subscriptions(
        &self,
        server_url: &str,
        api_secret: &str,
    ) -> Result<StatusCode, ApiError> {
        let path = table_path(&self.subscription_auth_table());
        let params = Params::new()
            .query(&Filter::new().eq("server_url", server_url))
            .fields(&["sys_id"])
            .limit(1);

        let (rows, status): (Vec<SysIdRow>, _) = self
            .call_result::<(), _>(Method::GET, &path, None, &params)
            .await
            .map_err(classify_activation_error)?;

        if !rows.is_empty() {
            debug!(server_url = %server_url, "Subscriptions already activated");
            return Ok(status);
        }

        info!(server_url = %server_url, "Registering chat server for subscriptions");
        let auth = SubscriptionAuth {
            server_url,
            api_secret,
        };
        let (_, status): (Value, _) = self
            .call_result(Method::POST, &path, Some(&auth), &Params::new())
            .await
            .map_err(classify_activation_error)?;

        Ok(status)
    }

    pub async fn create_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(Subscription, StatusCode), ApiError> {
        validate_subscription(subscription)?;
        self.call_result(
            Method::POST,
            &table_path(&self.subscriptions_table()),
            Some(subscription),
            &Params::new(),
        )
        .await
    }

    /// Returns whether an active subscription with the same channel, type,
    /// record type, record and server already exists.
    ///
    /// The flag is only meaningful when the call succeeded.
    pub async fn check_for_duplicate_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(bool, StatusCode), ApiError> {
        let mut filter = Filter::new()
            .eq("channel_id", &subscription.channel_id)
            .eq("is_active", "true")
            .eq("type", subscription.kind.as_str())
            .eq("record_type", &subscription.record_type);
        if subscription.is_record_scoped() {
            filter = filter.eq("record_id", &subscription.record_id);
        }
        filter = filter.eq("server_url", &subscription.server_url);

        let params = Params::new().query(&filter).fields(&["sys_id"]).limit(1);
        let (rows, status): (Vec<SysIdRow>, _) = self
            .call_result::<(), _>(
                Method::GET,
                &table_path(&self.subscriptions_table()),
                None,
                &params,
            )
            .await?;

        Ok((!rows.is_empty(), status))
    }

    /// Lists active subscriptions, newest update first.
    ///
    /// `query.limit` is clamped to the configured page bounds, so one call
    /// never returns more than `max_page_size` rows.
    pub async fn get_all_subscriptions(
        &self,
        query: &SubscriptionQuery,
    ) -> Result<(Vec<Subscription>, StatusCode), ApiError> {
        let filter = Filter::new()
            .eq_if_present("channel_id", &query.channel_id)
            .eq_if_present("user_id", &query.user_id)
            .eq_if_present("type", query.kind.map(|k| k.as_str()).unwrap_or_default())
            .eq_if_present("server_url", &query.server_url)
            .eq("is_active", "true")
            .order_by_desc(FIELD_UPDATED_ON);

        let params = Params::new()
            .query(&filter)
            .limit(self.options().page_size(query.limit))
            .offset(query.offset);

        self.call_result::<(), _>(
            Method::GET,
            &table_path(&self.subscriptions_table()),
            None,
            &params,
        )
        .await
    }

    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<(Subscription, StatusCode), ApiError> {
        validate_identifier("subscription ID", subscription_id)?;
        self.call_result::<(), _>(
            Method::GET,
            &record_path(&self.subscriptions_table(), subscription_id),
            None,
            &Params::new(),
        )
        .await
    }

    pub async fn edit_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<StatusCode, ApiError> {
        validate_identifier("subscription ID", subscription_id)?;
        let (_, status): (Value, _) = self
            .call_result(
                Method::PATCH,
                &record_path(&self.subscriptions_table(), subscription_id),
                Some(update),
                &Params::new(),
            )
            .await?;
        Ok(status)
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<StatusCode, ApiError> {
        validate_identifier("subscription ID", subscription_id)?;
        let reply = self
            .call_raw(
                Method::DELETE,
                &record_path(&self.subscriptions_table(), subscription_id),
                None,
                None,
                &Params::new(),
            )
            .await?;
        Ok(reply.status)
    }
}

fn validate_subscription(subscription: &Subscription) -> Result<(), ApiError> {
    if subscription.channel_id.is_empty() {
        return Err(ApiError::InvalidInput("subscription has no channel".into()));
    }
    validate_identifier("record type", &subscription.record_type)?;
    if subscription.is_record_scoped() {
        validate_identifier("record ID", &subscription.record_id)?;
    }
    Ok(())
}

/// Maps activation failures onto [`ApiError::NotConfigured`] and
/// [`ApiError::NotAuthorized`]. Everything else passes through unchanged.
fn classify_activation_error(err: ApiError) -> ApiError {
    let ApiError::Remote {
        status,
        message,
        detail,
        body,
    } = err
    else {
        return err;
    };

    let text = format!("{} {}", message, detail);
    let combined = if detail.is_empty() {
        message.clone()
    } else {
        format!("{}. {}", message, detail)
    };

    if status == StatusCode::FORBIDDEN || text.contains(NOT_AUTHORIZED_MESSAGE) {
        return ApiError::NotAuthorized {
            status,
            message: combined,
        };
    }
    if (status == StatusCode::BAD_REQUEST && message.starts_with(INVALID_TABLE_MESSAGE))
        || text.contains(INVALID_TABLE_MESSAGE)
    {
        return ApiError::NotConfigured {
            status,
            message: combined,
        };
    }

    ApiError::Remote {
        status,
        message,
        detail,
        body,
    }
}

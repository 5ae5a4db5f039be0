//! Concurrent decoration of subscription lists with live record data.
//!
//! Each record-scoped subscription gets one `get_record` call. All calls finish
//! before the batch returns, and results are written back by input index so
//! completion order never affects list order. A failed fetch is logged and
//! leaves that subscription unenriched.

use super::client::ServiceNowClient;
use super::models::{Record, Subscription};
use crate::config::SubscriptionsConfig;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, warn};

/// Fan-out policy for one enrichment batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentOptions {
    /// Maximum in-flight fetches. 0 runs one fetch per subscription at once.
    pub concurrency: usize,
    /// Deadline for each fetch on top of the HTTP client timeout.
    pub timeout: Option<Duration>,
}

impl From<&SubscriptionsConfig> for EnrichmentOptions {
    fn from(config: &SubscriptionsConfig) -> Self {
        Self {
            concurrency: config.enrichment_concurrency,
            timeout: (config.enrichment_timeout_seconds > 0)
                .then(|| Duration::from_secs(config.enrichment_timeout_seconds)),
        }
    }
}

struct Target {
    index: usize,
    subscription_id: String,
    record_type: String,
    record_id: String,
}

/// Fills `number` and `short_description` on record-scoped subscriptions.
///
/// Returns how many subscriptions were enriched.
pub async fn enrich_subscriptions(
    client: &ServiceNowClient,
    subscriptions: &mut [Subscription],
    options: &EnrichmentOptions,
) -> usize {
    let targets: Vec<Target> = subscriptions
        .iter()
        .enumerate()
        .filter(|(_, sub)| sub.is_record_scoped() && !sub.record_id.is_empty())
        .map(|(index, sub)| Target {
            index,
            subscription_id: sub.id.clone(),
            record_type: sub.record_type.clone(),
            record_id: sub.record_id.clone(),
        })
        .collect();

    if targets.is_empty() {
        return 0;
    }

    let width = match options.concurrency {
        0 => targets.len(),
        n => n,
    };
    debug!(tasks = targets.len(), width, "Enriching subscriptions");

    let results: Vec<(usize, Option<Record>)> = stream::iter(targets)
        .map(|target| fetch(client, target, options.timeout))
        .buffer_unordered(width)
        .collect()
        .await;

    let mut enriched = 0;
    for (index, record) in results {
        if let (Some(record), Some(sub)) = (record, subscriptions.get_mut(index)) {
            sub.number = record.number;
            sub.short_description = record.short_description;
            if sub.is_enriched() {
                enriched += 1;
            }
        }
    }
    enriched
}

async fn fetch(
    client: &ServiceNowClient,
    target: Target,
    timeout: Option<Duration>,
) -> (usize, Option<Record>) {
    let call = client.get_record(&target.record_type, &target.record_id);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", limit)),
        },
        None => call.await.map_err(|e| e.to_string()),
    };

    match outcome {
        Ok((record, _)) => (target.index, Some(record)),
        Err(error) => {
            warn!(
                subscription_id = %target.subscription_id,
                record_type = %target.record_type,
                record_id = %target.record_id,
                error = %error,
                "Failed to enrich subscription"
            );
            (target.index, None)
        }
    }
}

/// Drops record-scoped subscriptions that enrichment could not resolve.
/// Bulk subscriptions are always kept. Order is preserved.
pub fn filter_unresolved(mut subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    subscriptions.retain(|sub| !sub.is_record_scoped() || sub.is_enriched());
    subscriptions
}

pub async fn enrich_and_filter(
    client: &ServiceNowClient,
    mut subscriptions: Vec<Subscription>,
    options: &EnrichmentOptions,
) -> Vec<Subscription> {
    enrich_subscriptions(client, &mut subscriptions, options).await;
    filter_unresolved(subscriptions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servicenow::models::SubscriptionType;
    use crate::servicenow::test_support;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    fn sub(id: &str, kind: SubscriptionType, record_id: &str) -> Subscription {
        Subscription {
            id: id.into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            kind,
            record_type: "incident".into(),
            record_id: record_id.into(),
            subscription_events: "state".into(),
            server_url: "https://chat.example.com".into(),
            is_active: true,
            number: String::new(),
            short_description: String::new(),
        }
    }

    async fn record_mock(server: &mut ServerGuard, record_id: &str, number: &str) -> mockito::Mock {
        server
            .mock("GET", format!("/api/now/table/incident/{}", record_id).as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"result": {
                    "sys_id": record_id,
                    "number": number,
                    "short_description": format!("about {}", number)
                }})
                .to_string(),
            )
            .create_async()
            .await
    }

    async fn mixed_batch(server: &mut ServerGuard) -> (Vec<Subscription>, Vec<mockito::Mock>) {
        let mut mocks = vec![
            record_mock(server, "r1", "INC001").await,
            record_mock(server, "r3", "INC003").await,
        ];
        let missing = server
            .mock("GET", "/api/now/table/incident/r2")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":{"message":"No Record found","detail":""}}"#)
            .create_async()
            .await;
        mocks.push(missing);

        let subs = vec![
            sub("s1", SubscriptionType::Record, "r1"),
            sub("s2", SubscriptionType::Record, "r2"),
            sub("bulk", SubscriptionType::Bulk, ""),
            sub("s3", SubscriptionType::Record, "r3"),
        ];
        (subs, mocks)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_batch_and_order() {
        let mut server = Server::new_async().await;
        let (mut subs, _mocks) = mixed_batch(&mut server).await;
        let client = test_support::client(&server.url());

        let enriched =
            enrich_subscriptions(&client, &mut subs, &EnrichmentOptions::default()).await;

        assert_eq!(enriched, 2);
        let ids: Vec<&str> = subs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "bulk", "s3"]);
        assert_eq!(subs[0].number, "INC001");
        assert_eq!(subs[0].short_description, "about INC001");
        assert!(!subs[1].is_enriched());
        assert_eq!(subs[3].number, "INC003");
    }

    #[tokio::test]
    async fn test_filter_drops_only_unresolved_records() {
        let mut server = Server::new_async().await;
        let (subs, _mocks) = mixed_batch(&mut server).await;
        let client = test_support::client(&server.url());

        let kept = enrich_and_filter(&client, subs, &EnrichmentOptions::default()).await;

        let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "bulk", "s3"]);
    }

    #[tokio::test]
    async fn test_bounded_width_same_result() {
        let mut server = Server::new_async().await;
        let (subs, _mocks) = mixed_batch(&mut server).await;
        let client = test_support::client(&server.url());

        let options = EnrichmentOptions {
            concurrency: 1,
            timeout: None,
        };
        let kept = enrich_and_filter(&client, subs, &options).await;

        let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "bulk", "s3"]);
    }

    #[tokio::test]
    async fn test_bulk_only_makes_no_requests() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let client = test_support::client(&server.url());

        let mut subs = vec![sub("b1", SubscriptionType::Bulk, "")];
        let enriched =
            enrich_subscriptions(&client, &mut subs, &EnrichmentOptions::default()).await;

        assert_eq!(enriched, 0);
        assert_eq!(filter_unresolved(subs).len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_timeout_leaves_subscription_unenriched() {
        // Accepts connections into the backlog but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let client = test_support::client(&base);

        let options = EnrichmentOptions {
            concurrency: 0,
            timeout: Some(Duration::from_millis(200)),
        };
        let kept = enrich_and_filter(
            &client,
            vec![
                sub("s1", SubscriptionType::Record, "r1"),
                sub("b1", SubscriptionType::Bulk, ""),
            ],
            &options,
        )
        .await;

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b1");
        drop(listener);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = SubscriptionsConfig::default();
        assert_eq!(EnrichmentOptions::from(&config), EnrichmentOptions::default());

        config.enrichment_concurrency = 4;
        config.enrichment_timeout_seconds = 5;
        let options = EnrichmentOptions::from(&config);
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }
}

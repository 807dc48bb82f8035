//! AWS SQS broker.
//!
//! SQS stores every message durably, so [`PublishOptions::persistent`] has no
//! effect here. Acknowledging deletes the message; nacking resets its
//! visibility so it is redelivered immediately.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use intake_core::config::{AwsConfig, QueueConfig};

use crate::broker::{Broker, Connector, PublishOptions, QueueHealth, QueueMessage};
use crate::error::QueueError;

/// Map an SDK failure onto [`QueueError`]. Anything that never produced a
/// parsed service response counts as lost connectivity.
fn classify<E: Debug, R: Debug>(context: &str, err: SdkError<E, R>) -> QueueError {
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            QueueError::Connection(format!("{context}: {err:?}"))
        }
        other => QueueError::Provider(format!("{context}: {other:?}")),
    }
}

/// Build an SQS client from project config.
pub fn build_client(aws: &AwsConfig) -> Client {
    let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

    // Build SQS client config directly; aws_config::defaults() would honour
    // AWS_ENDPOINT_URL, which may point at a different service.
    let mut sqs_config = aws_sdk_sqs::Config::builder()
        .region(region)
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "intake-queue-static",
        );
        sqs_config = sqs_config.credentials_provider(creds);
    }

    if let Some(ref endpoint) = aws.endpoint_url {
        if !endpoint.is_empty() {
            let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            };
            sqs_config = sqs_config.endpoint_url(&url);
        }
    }

    Client::from_conf(sqs_config.build())
}

/// Opens [`SqsBroker`] connections.
#[derive(Clone)]
pub struct SqsConnector {
    aws: AwsConfig,
    queue: QueueConfig,
}

impl SqsConnector {
    pub fn new(aws: AwsConfig, queue: QueueConfig) -> Self {
        Self { aws, queue }
    }
}

#[async_trait]
impl Connector for SqsConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>, QueueError> {
        let client = build_client(&self.aws);

        // The client is lazy; one cheap call proves the endpoint answers.
        client
            .list_queues()
            .max_results(1)
            .send()
            .await
            .map_err(|e| classify("SQS connect failed", e))?;

        info!(region = %self.aws.region, "SQS connection established");
        Ok(Arc::new(SqsBroker::new(client, &self.queue)))
    }
}

/// One SQS client plus a cache of resolved queue URLs.
pub struct SqsBroker {
    client: Client,
    urls: RwLock<HashMap<String, String>>,
    wait_time_secs: i32,
    visibility_timeout_secs: i32,
}

impl SqsBroker {
    pub fn new(client: Client, queue: &QueueConfig) -> Self {
        Self {
            client,
            urls: RwLock::new(HashMap::new()),
            wait_time_secs: queue.wait_time_secs.min(20) as i32,
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
        }
    }

    async fn queue_url(&self, queue: &str) -> Result<String, QueueError> {
        if let Some(url) = self.urls.read().await.get(queue) {
            return Ok(url.clone());
        }

        let resp = self
            .client
            .get_queue_url()
            .queue_name(queue)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_queue_does_not_exist()) {
                    QueueError::NotFound(queue.to_string())
                } else {
                    classify("SQS get_queue_url failed", e)
                }
            })?;

        let url = resp
            .queue_url()
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?
            .to_string();
        self.urls.write().await.insert(queue.to_string(), url.clone());
        Ok(url)
    }
}

#[async_trait]
impl Broker for SqsBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        match self.queue_url(queue).await {
            Ok(_) => return Ok(()),
            Err(QueueError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let resp = self
            .client
            .create_queue()
            .queue_name(queue)
            .send()
            .await
            .map_err(|e| classify("SQS create_queue failed", e))?;

        let url = resp
            .queue_url()
            .ok_or_else(|| QueueError::Provider(format!("create_queue returned no URL for {queue}")))?
            .to_string();
        info!(queue, url = %url, "Declared SQS queue");
        self.urls.write().await.insert(queue.to_string(), url);
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &str,
        _options: PublishOptions,
    ) -> Result<(), QueueError> {
        let url = self.queue_url(queue).await?;
        let resp = self
            .client
            .send_message()
            .queue_url(&url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| classify("SQS send failed", e))?;
        debug!(queue, message_id = resp.message_id().unwrap_or("unknown"), "Published SQS message");
        Ok(())
    }

    async fn poll(&self, queue: &str, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let url = self.queue_url(queue).await?;
        // SQS caps at 10 messages per request.
        let capped = max_messages.clamp(1, 10) as i32;

        debug!(queue, max_messages = capped, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| classify("SQS receive failed", e))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            // SentTimestamp is epoch millis.
            let timestamp = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                id: msg.message_id().unwrap_or("unknown").to_string(),
                body: msg.body().unwrap_or("").to_string(),
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let url = self.queue_url(queue).await?;
        debug!(queue, message_id = %message.id, "Acking SQS message");

        self.client
            .delete_message()
            .queue_url(&url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| match classify("SQS delete failed", e) {
                QueueError::Provider(m) => QueueError::Ack(m),
                other => other,
            })?;
        Ok(())
    }

    async fn nack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let url = self.queue_url(queue).await?;
        debug!(queue, message_id = %message.id, "Nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| classify("SQS visibility change failed", e))?;
        Ok(())
    }

    async fn health(&self, queue: &str) -> Result<QueueHealth, QueueError> {
        let url = self.queue_url(queue).await?;
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| classify("SQS health check failed", e))?;

        let count = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok());

        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "sqs".to_string(),
        })
    }

    fn provider(&self) -> &'static str {
        "sqs"
    }
}

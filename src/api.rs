use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;

use crate::errors::SqsNotificationError;

/// A message ready to be handed to SQS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub queue_url: String,
    pub body: String,
    pub delay_seconds: i32,
    /// Sent as `String` message attributes.
    pub attributes: BTreeMap<String, String>,
}

/// The SQS calls the notification channel depends on.
///
/// Implemented for [`aws_sdk_sqs::Client`]; other implementations can stand
/// in for SQS, e.g. in tests.
#[async_trait]
pub trait SqsSendMessageApi: Send + Sync {
    /// Looks up the URL of `queue_name`, optionally in another account.
    async fn get_queue_url(
        &self,
        queue_name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<String, SqsNotificationError>;

    /// Sends one message and returns its id when SQS reports one.
    async fn send_message(
        &self,
        message: OutgoingMessage,
    ) -> Result<Option<String>, SqsNotificationError>;
}

#[async_trait]
impl SqsSendMessageApi for aws_sdk_sqs::Client {
    async fn get_queue_url(
        &self,
        queue_name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<String, SqsNotificationError> {
        let resolution_error = |message: String| SqsNotificationError::QueueResolution {
            queue: queue_name.to_string(),
            message,
        };

        let output = self
            .get_queue_url()
            .queue_name(queue_name)
            .set_queue_owner_aws_account_id(owner_account_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| resolution_error(DisplayErrorContext(&e).to_string()))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| resolution_error("response did not contain a queue URL".to_string()))
    }

    async fn send_message(
        &self,
        message: OutgoingMessage,
    ) -> Result<Option<String>, SqsNotificationError> {
        let send_error = |text: String| SqsNotificationError::SendMessage {
            queue_url: message.queue_url.clone(),
            message: text,
        };

        let mut request = self
            .send_message()
            .queue_url(&message.queue_url)
            .message_body(&message.body)
            .delay_seconds(message.delay_seconds);

        for (name, value) in &message.attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| send_error(format!("invalid message attribute {name}: {e}")))?;
            request = request.message_attributes(name, attribute);
        }

        let output = request
            .send()
            .await
            .map_err(|e| send_error(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id().map(str::to_string))
    }
}

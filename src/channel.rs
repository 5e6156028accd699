use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::api::{OutgoingMessage, SqsSendMessageApi};
use crate::attributes::outgoing_message_attributes;
use crate::client::create_sqs_client;
use crate::config::AwsSqsOptions;
use crate::errors::SqsNotificationError;
use crate::notification::{Destination, Notification, NotificationService};

/// Notification channel delivering to an AWS SQS queue.
///
/// The SQS client is built on the first send and reused afterwards. If
/// building fails the error is returned and the next send tries again.
pub struct AwsSqsService {
    opts: AwsSqsOptions,
    api: OnceCell<Arc<dyn SqsSendMessageApi>>,
}

impl AwsSqsService {
    pub fn new(opts: AwsSqsOptions) -> Self {
        AwsSqsService {
            opts,
            api: OnceCell::new(),
        }
    }

    /// Creates a channel that talks to SQS through `api` instead of building
    /// its own client from the options.
    pub fn with_api(opts: AwsSqsOptions, api: impl SqsSendMessageApi + 'static) -> Self {
        let api: Arc<dyn SqsSendMessageApi> = Arc::new(api);
        AwsSqsService {
            opts,
            api: OnceCell::new_with(Some(api)),
        }
    }

    pub fn options(&self) -> &AwsSqsOptions {
        &self.opts
    }

    /// The queue a send to `destination` resolves: the recipient when set,
    /// the configured queue otherwise.
    pub fn queue_name<'a>(&'a self, destination: &'a Destination) -> &'a str {
        if destination.recipient.is_empty() {
            &self.opts.queue
        } else {
            &destination.recipient
        }
    }

    async fn api(&self) -> Result<&Arc<dyn SqsSendMessageApi>, SqsNotificationError> {
        self.api
            .get_or_try_init(|| async {
                let client = create_sqs_client(&self.opts).await?;
                Ok::<_, SqsNotificationError>(Arc::new(client) as Arc<dyn SqsSendMessageApi>)
            })
            .await
    }

    async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<(), SqsNotificationError> {
        let queue_name = self.queue_name(destination);
        if queue_name.is_empty() {
            return Err(SqsNotificationError::EmptyQueueName);
        }

        let attributes = match notification.message_attributes() {
            Some(attributes) => outgoing_message_attributes(attributes).inspect_err(|e| {
                tracing::error!(queue = queue_name, error = %e, "message attributes rejected");
            })?,
            None => Default::default(),
        };

        let api = self.api().await?;

        let queue_url = api
            .get_queue_url(queue_name, self.opts.account())
            .await
            .inspect_err(|e| {
                tracing::error!(queue = queue_name, error = %e, "failed to get the queue URL");
            })?;

        let message = OutgoingMessage {
            queue_url,
            body: notification.message.clone(),
            delay_seconds: self.opts.delay_seconds,
            attributes,
        };

        let message_id = api.send_message(message).await.inspect_err(|e| {
            tracing::error!(queue = queue_name, error = %e, "failed to send the message");
        })?;

        tracing::debug!(
            queue = queue_name,
            message_id = message_id.as_deref().unwrap_or("unknown"),
            "message sent"
        );

        Ok(())
    }
}

#[async_trait]
impl NotificationService for AwsSqsService {
    async fn send(
        &self,
        notification: &Notification,
        destination: &Destination,
        cancel: &CancellationToken,
    ) -> Result<(), SqsNotificationError> {
        let delivery = async {
            match self.opts.timeout() {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.deliver(notification, destination)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(SqsNotificationError::Timeout(limit)),
                    }
                }
                None => self.deliver(notification, destination).await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(queue = self.queue_name(destination), "send cancelled");
                Err(SqsNotificationError::Cancelled)
            }
            result = delivery => result,
        }
    }
}

use std::time::Duration;

use thiserror::Error;

/// Error types for the AWS SQS notification channel.
///
/// Configuration problems, queue resolution and delivery failures are all
/// returned to the caller. Nothing in this crate aborts the process.
#[derive(Debug, Error)]
pub enum SqsNotificationError {
    /// The channel options are not usable (bad endpoint URL, delay out of range, ...).
    #[error("invalid AWS SQS channel configuration: {0}")]
    InvalidConfig(String),

    /// No region could be found in the options, the environment or the shared config.
    #[error("an AWS region is required, but was not found")]
    RegionRequired,

    /// Neither the options nor the destination name a queue.
    #[error("no queue name configured and destination has no recipient")]
    EmptyQueueName,

    #[error("failed to get the URL of queue {queue}: {message}")]
    QueueResolution { queue: String, message: String },

    #[error("failed to send message to {queue_url}: {message}")]
    SendMessage { queue_url: String, message: String },

    /// The rendered message attributes would be rejected by SQS.
    #[error("invalid message attributes: {0}")]
    InvalidMessageAttributes(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("send was cancelled")]
    Cancelled,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while parsing or executing a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template: {name}: {message}")]
    Parse { name: String, message: String },

    #[error("template: {name}: executing: {message}")]
    Execute { name: String, message: String },
}

impl TemplateError {
    pub(crate) fn parse(name: &str, message: impl Into<String>) -> Self {
        TemplateError::Parse {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn execute(name: &str, message: impl Into<String>) -> Self {
        TemplateError::Execute {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Returns `true` when the template could not be parsed.
    pub fn is_parse(&self) -> bool {
        matches!(self, TemplateError::Parse { .. })
    }
}

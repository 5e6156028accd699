use std::fmt;
use std::time::Duration;

use aws_sdk_sqs::config::Credentials;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::SqsNotificationError;

/// Delivery delay applied to every message unless configured otherwise.
pub const DEFAULT_DELAY_SECONDS: i32 = 10;

/// Largest delivery delay SQS accepts (15 minutes).
pub const MAX_DELAY_SECONDS: i32 = 900;

/// Configuration for the AWS SQS notification channel.
///
/// Loaded once by the enclosing service and immutable afterwards. Every
/// optional field left out (or set to an empty string) defers to the AWS
/// default provider chain.
///
/// ```rust
/// use rs_sqs_notifier::config::AwsSqsOptions;
///
/// let opts: AwsSqsOptions = serde_json::from_str(
///     r#"{"queue": "alerts", "region": "eu-west-1", "endpointUrl": "http://localhost:4566"}"#,
/// )
/// .unwrap();
/// assert_eq!(opts.delay_seconds, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSqsOptions {
    /// Name of the queue messages are sent to.
    pub queue: String,

    /// Account that owns the queue, for cross-account lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom SQS endpoint, e.g. LocalStack or ElasticMQ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    #[serde(flatten)]
    pub access: AwsAccess,

    /// Delivery delay in seconds applied to every message.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: i32,

    /// Upper bound for a whole send (queue lookup plus delivery).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_delay_seconds() -> i32 {
    DEFAULT_DELAY_SECONDS
}

impl Default for AwsSqsOptions {
    fn default() -> Self {
        AwsSqsOptions {
            queue: String::new(),
            account: None,
            region: None,
            endpoint_url: None,
            access: AwsAccess::default(),
            delay_seconds: DEFAULT_DELAY_SECONDS,
            timeout_seconds: None,
        }
    }
}

/// Static access key pair. Both halves must be non-empty to be used.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsAccess {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

impl fmt::Debug for AwsAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsAccess")
            .field("key", &self.key)
            .field("secret", &"** redacted **")
            .finish()
    }
}

impl AwsAccess {
    /// Static credentials, if both the key and the secret are set.
    pub fn static_credentials(&self) -> Option<Credentials> {
        if self.key.is_empty() || self.secret.is_empty() {
            return None;
        }
        Some(Credentials::new(
            self.key.clone(),
            self.secret.clone(),
            None,
            None,
            "rs-sqs-notifier",
        ))
    }
}

impl AwsSqsOptions {
    pub fn new(queue: impl Into<String>) -> Self {
        AwsSqsOptions {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn account(&self) -> Option<&str> {
        non_empty(&self.account)
    }

    pub fn region(&self) -> Option<&str> {
        non_empty(&self.region)
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        non_empty(&self.endpoint_url)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Checks the options without touching the network.
    pub fn validate(&self) -> Result<(), SqsNotificationError> {
        if let Some(endpoint) = self.endpoint_url() {
            Url::parse(endpoint).map_err(|e| {
                SqsNotificationError::InvalidConfig(format!(
                    "endpoint URL {endpoint:?} is invalid: {e}"
                ))
            })?;
        }

        if !(0..=MAX_DELAY_SECONDS).contains(&self.delay_seconds) {
            return Err(SqsNotificationError::InvalidConfig(format!(
                "delaySeconds must be between 0 and {MAX_DELAY_SECONDS}, got {}",
                self.delay_seconds
            )));
        }

        if self.timeout_seconds == Some(0) {
            return Err(SqsNotificationError::InvalidConfig(
                "timeoutSeconds must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

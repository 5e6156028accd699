use aws_config::{BehaviorVersion, Region, SdkConfig};

use crate::config::AwsSqsOptions;
use crate::errors::SqsNotificationError;

/// Environment variable used as signing region for a custom endpoint when
/// no region is configured anywhere else.
pub const DEFAULT_REGION_ENV: &str = "AWS_DEFAULT_REGION";

/// Creates an AWS SQS client from the channel options.
///
/// The shared AWS configuration is loaded from the environment (variables
/// such as `AWS_ACCESS_KEY_ID`, `AWS_REGION` or `AWS_PROFILE`, the shared
/// config files, instance roles) and then overridden by whatever the options
/// set explicitly. See [`build_sqs_config`] for the rules.
///
/// # Errors
///
/// Returns [`SqsNotificationError::InvalidConfig`] for malformed options and
/// [`SqsNotificationError::RegionRequired`] when no region can be found.
///
/// # Example
///
/// ```rust,no_run
/// use rs_sqs_notifier::{client::create_sqs_client, config::AwsSqsOptions};
///
/// #[tokio::main]
/// async fn main() {
///     let opts = AwsSqsOptions::new("alerts");
///     let client = create_sqs_client(&opts).await.unwrap();
///     // Use the client...
/// }
/// ```
pub async fn create_sqs_client(
    opts: &AwsSqsOptions,
) -> Result<aws_sdk_sqs::Client, SqsNotificationError> {
    opts.validate()?;

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = opts.region() {
        loader = loader.region(Region::new(region.to_string()));
    }
    let sdk_config = loader.load().await;

    let fallback_region = std::env::var(DEFAULT_REGION_ENV)
        .ok()
        .filter(|r| !r.is_empty());
    let config = build_sqs_config(opts, &sdk_config, fallback_region)?;

    tracing::debug!(
        region = ?config.region(),
        endpoint = opts.endpoint_url(),
        "built AWS SQS client"
    );

    Ok(aws_sdk_sqs::Client::from_conf(config))
}

/// Assembles the SQS service configuration on top of a loaded [`SdkConfig`].
///
/// - A static credentials provider is installed when both the access key and
///   the secret are set; otherwise the provider of `sdk_config` is kept.
/// - The region of the options always wins.
/// - With a custom endpoint and no region in the options, `fallback_region`
///   signs requests, ahead of the region of `sdk_config`. The endpoint only
///   affects this SQS configuration.
/// - Without a custom endpoint, the region of `sdk_config` is used.
///
/// # Errors
///
/// Returns [`SqsNotificationError::RegionRequired`] if no region is left
/// after applying the rules above.
pub fn build_sqs_config(
    opts: &AwsSqsOptions,
    sdk_config: &SdkConfig,
    fallback_region: Option<String>,
) -> Result<aws_sdk_sqs::Config, SqsNotificationError> {
    opts.validate()?;

    let mut builder = aws_sdk_sqs::config::Builder::from(sdk_config);

    if let Some(credentials) = opts.access.static_credentials() {
        builder = builder.credentials_provider(credentials);
    }

    let sdk_region = || sdk_config.region().map(|r| r.as_ref().to_string());
    let region = match (opts.region(), opts.endpoint_url()) {
        (Some(region), _) => Some(region.to_string()),
        (None, Some(_)) => fallback_region.or_else(sdk_region),
        (None, None) => sdk_region(),
    };
    let region = region.ok_or(SqsNotificationError::RegionRequired)?;
    builder = builder.region(Region::new(region));

    if let Some(endpoint) = opts.endpoint_url() {
        builder = builder.endpoint_url(endpoint);
    }

    Ok(builder.build())
}

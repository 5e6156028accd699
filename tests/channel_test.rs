use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rs_sqs_notifier::api::{OutgoingMessage, SqsSendMessageApi};
use rs_sqs_notifier::attributes::AwsSqsNotification;
use rs_sqs_notifier::channel::AwsSqsService;
use rs_sqs_notifier::config::AwsSqsOptions;
use rs_sqs_notifier::errors::SqsNotificationError;
use rs_sqs_notifier::notification::{Destination, Notification, NotificationService};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Lookup {
    queue_name: String,
    owner_account_id: Option<String>,
}

/// In-memory stand-in for SQS that records every call.
#[derive(Clone, Default)]
struct RecordingSqs {
    lookups: Arc<Mutex<Vec<Lookup>>>,
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    fail_lookup: bool,
    fail_send: bool,
    stall: bool,
}

impl RecordingSqs {
    async fn lookups(&self) -> Vec<Lookup> {
        self.lookups.lock().await.clone()
    }

    async fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SqsSendMessageApi for RecordingSqs {
    async fn get_queue_url(
        &self,
        queue_name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<String, SqsNotificationError> {
        self.lookups.lock().await.push(Lookup {
            queue_name: queue_name.to_string(),
            owner_account_id: owner_account_id.map(str::to_string),
        });

        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if self.fail_lookup {
            return Err(SqsNotificationError::QueueResolution {
                queue: queue_name.to_string(),
                message: "AWS.SimpleQueueService.NonExistentQueue".to_string(),
            });
        }

        Ok(format!("https://sqs.us-east-1.amazonaws.com/123456789012/{queue_name}"))
    }

    async fn send_message(
        &self,
        message: OutgoingMessage,
    ) -> Result<Option<String>, SqsNotificationError> {
        let queue_url = message.queue_url.clone();
        self.sent.lock().await.push(message);

        if self.fail_send {
            return Err(SqsNotificationError::SendMessage {
                queue_url,
                message: "throttled".to_string(),
            });
        }

        Ok(Some("219f8380-5770-4cc2-8c3e-5c715e145f5e".to_string()))
    }
}

fn options() -> AwsSqsOptions {
    AwsSqsOptions::new("configured-queue")
}

async fn send(
    service: &AwsSqsService,
    notification: &Notification,
    destination: &Destination,
) -> Result<(), SqsNotificationError> {
    service
        .send(notification, destination, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_send_uses_configured_queue() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    send(&service, &Notification::new("disk full"), &Destination::default())
        .await
        .unwrap();

    assert_eq!(
        sqs.lookups().await,
        vec![Lookup {
            queue_name: "configured-queue".to_string(),
            owner_account_id: None,
        }]
    );
    let sent = sqs.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].queue_url,
        "https://sqs.us-east-1.amazonaws.com/123456789012/configured-queue"
    );
    assert_eq!(sent[0].body, "disk full");
    assert_eq!(sent[0].delay_seconds, 10);
    assert!(sent[0].attributes.is_empty());
}

#[tokio::test]
async fn test_recipient_overrides_configured_queue() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    send(
        &service,
        &Notification::new("hello"),
        &Destination::new("annotated-queue"),
    )
    .await
    .unwrap();

    assert_eq!(sqs.lookups().await[0].queue_name, "annotated-queue");
    assert_eq!(
        service.queue_name(&Destination::new("annotated-queue")),
        "annotated-queue"
    );
    assert_eq!(service.queue_name(&Destination::default()), "configured-queue");
}

#[tokio::test]
async fn test_account_scopes_queue_lookup() {
    let sqs = RecordingSqs::default();
    let mut opts = options();
    opts.account = Some("210987654321".to_string());
    let service = AwsSqsService::with_api(opts, sqs.clone());

    send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap();

    assert_eq!(
        sqs.lookups().await[0].owner_account_id.as_deref(),
        Some("210987654321")
    );
}

#[tokio::test]
async fn test_configured_delay_is_applied() {
    let sqs = RecordingSqs::default();
    let mut opts = options();
    opts.delay_seconds = 0;
    let service = AwsSqsService::with_api(opts, sqs.clone());

    send(&service, &Notification::new("now"), &Destination::default())
        .await
        .unwrap();

    assert_eq!(service.options().delay_seconds, 0);
    assert_eq!(sqs.sent().await[0].delay_seconds, 0);
}

#[tokio::test]
async fn test_rendered_attributes_are_sent() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let attributes: BTreeMap<String, String> = [
        ("eventType".to_string(), "user.created".to_string()),
        ("tenant".to_string(), "acme".to_string()),
    ]
    .into_iter()
    .collect();
    let notification = Notification {
        message: "payload".to_string(),
        aws_sqs: Some(AwsSqsNotification::new(attributes.clone())),
    };

    send(&service, &notification, &Destination::default())
        .await
        .unwrap();

    assert_eq!(sqs.sent().await[0].attributes, attributes);
}

fn with_attributes(pairs: &[(&str, &str)]) -> Notification {
    let attributes = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Notification {
        message: "payload".to_string(),
        aws_sqs: Some(AwsSqsNotification::new(attributes)),
    }
}

#[tokio::test]
async fn test_empty_attribute_values_are_dropped() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let notification = with_attributes(&[("eventType", "user.created"), ("tenant", "")]);
    send(&service, &notification, &Destination::default())
        .await
        .unwrap();

    let sent = sqs.sent().await;
    assert_eq!(sent[0].attributes.len(), 1);
    assert_eq!(sent[0].attributes["eventType"], "user.created");
}

#[tokio::test]
async fn test_too_many_attributes_are_rejected_before_lookup() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let names: Vec<String> = (0..11).map(|i| format!("attr{i}")).collect();
    let pairs: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "v")).collect();

    let err = send(&service, &with_attributes(&pairs), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::InvalidMessageAttributes(_)));
    assert!(sqs.lookups().await.is_empty());
    assert!(sqs.sent().await.is_empty());

    // Ten is still fine.
    send(&service, &with_attributes(&pairs[..10]), &Destination::default())
        .await
        .unwrap();
    assert_eq!(sqs.sent().await[0].attributes.len(), 10);
}

#[tokio::test]
async fn test_invalid_attribute_names_are_rejected() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let long = "a".repeat(257);
    let names = [
        "AWS.trace",
        "amazon.region",
        ".leading",
        "trailing.",
        "double..dot",
        "white space",
        "caf\u{e9}",
        long.as_str(),
    ];

    for name in names {
        let err = send(&service, &with_attributes(&[(name, "v")]), &Destination::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, SqsNotificationError::InvalidMessageAttributes(_)),
            "expected {name:?} to be rejected, got {err:?}"
        );
    }
    assert!(sqs.lookups().await.is_empty());

    let ok = with_attributes(&[("my-app.event_Type2", "v")]);
    send(&service, &ok, &Destination::default()).await.unwrap();
}

#[tokio::test]
async fn test_lookup_failure_is_returned_and_nothing_is_sent() {
    let sqs = RecordingSqs {
        fail_lookup: true,
        ..Default::default()
    };
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let err = send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::QueueResolution { .. }));
    assert!(sqs.sent().await.is_empty());
}

#[tokio::test]
async fn test_send_failure_is_returned() {
    let sqs = RecordingSqs {
        fail_send: true,
        ..Default::default()
    };
    let service = AwsSqsService::with_api(options(), sqs.clone());

    let err = send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::SendMessage { .. }));
    // No retries.
    assert_eq!(sqs.lookups().await.len(), 1);
    assert_eq!(sqs.sent().await.len(), 1);
}

#[tokio::test]
async fn test_missing_queue_name_is_rejected() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(AwsSqsOptions::new(""), sqs.clone());

    let err = send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::EmptyQueueName));
    assert!(sqs.lookups().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_token_aborts_send() {
    let sqs = RecordingSqs {
        stall: true,
        ..Default::default()
    };
    let service = AwsSqsService::with_api(options(), sqs.clone());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = service
        .send(&Notification::new("hello"), &Destination::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::Cancelled));
    assert!(sqs.sent().await.is_empty());
}

#[tokio::test]
async fn test_already_cancelled_token_skips_sqs() {
    let sqs = RecordingSqs::default();
    let service = AwsSqsService::with_api(options(), sqs.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .send(&Notification::new("hello"), &Destination::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::Cancelled));
    assert!(sqs.lookups().await.is_empty());
}

#[tokio::test]
async fn test_timeout_bounds_the_whole_send() {
    let sqs = RecordingSqs {
        stall: true,
        ..Default::default()
    };
    let mut opts = options();
    opts.timeout_seconds = Some(1);
    let service = AwsSqsService::with_api(opts, sqs.clone());

    let err = send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::Timeout(d) if d == Duration::from_secs(1)));
    assert!(sqs.sent().await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_returned_not_fatal() {
    // No api injected, so the first send builds the client from the options.
    let mut opts = options();
    opts.endpoint_url = Some("definitely not a url".to_string());
    let service = AwsSqsService::new(opts);

    let err = send(&service, &Notification::new("hello"), &Destination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SqsNotificationError::InvalidConfig(_)));
}

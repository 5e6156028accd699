use std::env;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::config::SharedCredentialsProvider;
use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
use aws_smithy_types::body::SdkBody;
use rs_sqs_notifier::attributes::AwsSqsNotification;
use rs_sqs_notifier::channel::AwsSqsService;
use rs_sqs_notifier::client::{build_sqs_config, create_sqs_client};
use rs_sqs_notifier::config::AwsSqsOptions;
use rs_sqs_notifier::notification::{Destination, Notification, NotificationService};
use rs_sqs_notifier::template::{FuncMap, Vars};
use tokio_util::sync::CancellationToken;

const ENDPOINT: &str = "http://127.0.0.1:4566";

fn json_event(request_body: &str, response_body: &str) -> ReplayEvent {
    ReplayEvent::new(
        http::Request::builder()
            .method("POST")
            .uri(ENDPOINT)
            .header("Content-Type", "application/x-amz-json-1.0")
            .body(SdkBody::from(request_body.to_string()))
            .unwrap(),
        http::Response::builder()
            .status(http::StatusCode::from_u16(200).unwrap())
            .header("Content-Type", "application/x-amz-json-1.0")
            .body(SdkBody::from(response_body.to_string()))
            .unwrap(),
    )
}

fn replay_sdk_config(replay_client: StaticReplayClient) -> SdkConfig {
    SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
            "ATESTCLIENT",
            "atestsecretkey",
            None,
            None,
            "",
        )))
        .http_client(replay_client)
        .build()
}

#[tokio::test]
async fn test_endpoint_url_routes_every_call() {
    let replay_client = StaticReplayClient::new(vec![
        json_event(
            r#"{"QueueName":"notifications"}"#,
            r#"{"QueueUrl":"http://127.0.0.1:4566/000000000000/notifications"}"#,
        ),
        json_event(
            r#"{"QueueUrl":"http://127.0.0.1:4566/000000000000/notifications","MessageBody":"abcdef","DelaySeconds":10,"MessageAttributes":{"eventType":{"DataType":"String","StringValue":"user.created"}}}"#,
            r#"{"MD5OfMessageBody":"e80b5017098950fc58aad83c8c14978e","MessageId":"219f8380-5770-4cc2-8c3e-5c715e145f5e"}"#,
        ),
    ]);

    let mut opts = AwsSqsOptions::new("notifications");
    opts.region = Some("us-east-1".to_string());
    opts.endpoint_url = Some(ENDPOINT.to_string());

    let config = build_sqs_config(&opts, &replay_sdk_config(replay_client.clone()), None)
        .expect("Failed to build SQS config");
    let service = AwsSqsService::with_api(opts, aws_sdk_sqs::Client::from_conf(config));

    // Render the notification the way the dispatch framework does.
    let template = Notification {
        message: "{{.message}}".to_string(),
        aws_sqs: Some(AwsSqsNotification::new(
            [("eventType".to_string(), "{{.event}}".to_string())].into(),
        )),
    };
    let templater = template
        .get_templater("sqs", &FuncMap::new())
        .expect("Failed to build templater");
    let mut vars = Vars::new();
    vars.insert("message".to_string(), "abcdef".into());
    vars.insert("event".to_string(), "user.created".into());
    let mut notification = Notification::default();
    templater(&mut notification, &vars).expect("Failed to render notification");

    service
        .send(&notification, &Destination::default(), &CancellationToken::new())
        .await
        .expect("Failed to send notification");

    let requests: Vec<_> = replay_client.actual_requests().collect();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        println!("Request went to: {}", request.uri());
        assert!(
            request.uri().starts_with(ENDPOINT),
            "request was not routed to the custom endpoint: {}",
            request.uri()
        );
    }

    let lookup = std::str::from_utf8(requests[0].body().bytes().unwrap()).unwrap();
    assert!(lookup.contains(r#""QueueName":"notifications""#));

    let send = std::str::from_utf8(requests[1].body().bytes().unwrap()).unwrap();
    assert!(send.contains(r#""MessageBody":"abcdef""#));
    assert!(send.contains(r#""DelaySeconds":10"#));
    // Members of an attribute value may be serialized in any order.
    assert!(send.contains(r#""MessageAttributes":{"eventType":{"#));
    assert!(send.contains(r#""DataType":"String""#));
    assert!(send.contains(r#""StringValue":"user.created""#));
}

/// Runs against a live SQS-compatible endpoint (e.g. LocalStack) when
/// `TEST_SQS_ENDPOINT_URL` is set.
#[tokio::test]
async fn test_send_to_local_endpoint() {
    dotenvy::dotenv().ok();

    let Ok(endpoint_url) = env::var("TEST_SQS_ENDPOINT_URL") else {
        println!("TEST_SQS_ENDPOINT_URL not set, skipping");
        return;
    };

    let queue_name = "rs-sqs-notifier-test";
    let mut opts = AwsSqsOptions::new(queue_name);
    opts.region = Some(env::var("TEST_SQS_REGION").unwrap_or_else(|_| "us-east-1".to_string()));
    opts.endpoint_url = Some(endpoint_url);
    opts.access.key = "test".to_string();
    opts.access.secret = "test".to_string();
    opts.delay_seconds = 0;

    let sqs_client = create_sqs_client(&opts)
        .await
        .expect("Failed to create SQS client");
    let queue_url = sqs_client
        .create_queue()
        .queue_name(queue_name)
        .send()
        .await
        .expect("Failed to create queue")
        .queue_url()
        .expect("Queue URL missing")
        .to_string();

    let mut attributes = std::collections::BTreeMap::new();
    attributes.insert("eventType".to_string(), "integration".to_string());
    let notification = Notification {
        message: "Integration test message".to_string(),
        aws_sqs: Some(AwsSqsNotification::new(attributes)),
    };

    let service = AwsSqsService::new(opts);
    service
        .send(&notification, &Destination::default(), &CancellationToken::new())
        .await
        .expect("Failed to send notification");

    let received = sqs_client
        .receive_message()
        .queue_url(&queue_url)
        .max_number_of_messages(1)
        .wait_time_seconds(5)
        .message_attribute_names("All")
        .send()
        .await
        .expect("Failed to receive message");

    let message = received
        .messages()
        .first()
        .expect("Should have received the notification");
    assert_eq!(message.body(), Some("Integration test message"));
    assert_eq!(
        message
            .message_attributes()
            .and_then(|a| a.get("eventType"))
            .and_then(|v| v.string_value()),
        Some("integration")
    );

    let purge_result = sqs_client.purge_queue().queue_url(&queue_url).send().await;

    if let Err(e) = purge_result {
        println!("Warning: Failed to purge queue: {}", e);
    }
}

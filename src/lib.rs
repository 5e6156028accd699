//! # AWS SQS Notifier
//!
//! An AWS SQS notification channel for a multi-channel notification
//! dispatcher. Given a rendered notification and a destination it resolves
//! the queue URL and publishes the message, with message attributes that are
//! themselves templates rendered against runtime variables.
//!
//! ## Features
//!
//! - Static credentials, pinned region and custom endpoints (LocalStack,
//!   ElasticMQ), each falling back to the AWS default provider chain
//! - Destination recipients override the configured queue name
//! - Cross-account queue lookup
//! - Configurable delivery delay (10 seconds by default)
//! - Cancellation tokens and an optional per-send timeout
//! - One long-lived SQS client per channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rs_sqs_notifier::{
//!     channel::AwsSqsService,
//!     config::AwsSqsOptions,
//!     notification::{Destination, Notification, NotificationService},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut opts = AwsSqsOptions::new("alerts");
//!     opts.region = Some("eu-west-1".to_string());
//!
//!     let service = AwsSqsService::new(opts);
//!     service
//!         .send(
//!             &Notification::new("disk almost full"),
//!             &Destination::default(),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod attributes;
pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod notification;
pub mod template;

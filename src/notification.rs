use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::attributes::AwsSqsNotification;
use crate::errors::{SqsNotificationError, TemplateError};
use crate::template::{FuncMap, Template, Vars};

/// A rendering step run by the templating subsystem before a send.
///
/// It writes the rendered parts of a notification into its first argument.
pub type Templater =
    Box<dyn Fn(&mut Notification, &Vars) -> Result<(), TemplateError> + Send + Sync>;

/// A message plus the per-channel payloads the dispatch framework hands to channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_sqs: Option<AwsSqsNotification>,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Notification {
            message: message.into(),
            aws_sqs: None,
        }
    }

    /// Builds the rendering step for this notification template.
    ///
    /// The message is parsed here, so a malformed message template is
    /// reported immediately. The returned step renders the message into the
    /// target and then runs the SQS payload templater, if there is one.
    ///
    /// ```rust
    /// use rs_sqs_notifier::notification::Notification;
    /// use rs_sqs_notifier::template::{FuncMap, Vars};
    ///
    /// let templater = Notification::new("hello {{.name}}")
    ///     .get_templater("greeting", &FuncMap::new())
    ///     .unwrap();
    ///
    /// let mut vars = Vars::new();
    /// vars.insert("name".into(), "world".into());
    ///
    /// let mut rendered = Notification::default();
    /// templater(&mut rendered, &vars).unwrap();
    /// assert_eq!(rendered.message, "hello world");
    /// ```
    pub fn get_templater(&self, name: &str, funcs: &FuncMap) -> Result<Templater, TemplateError> {
        let message = Template::parse(name, &self.message, funcs)?;
        let sqs = self
            .aws_sqs
            .as_ref()
            .map(|sqs| sqs.get_templater(name, funcs));

        Ok(Box::new(move |notification: &mut Notification, vars: &Vars| -> Result<(), TemplateError> {
            notification.message = message.execute(vars)?;
            if let Some(sqs) = &sqs {
                sqs(notification, vars)?;
            }
            Ok(())
        }))
    }

    /// Rendered SQS message attributes, if any.
    pub fn message_attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.aws_sqs
            .as_ref()
            .map(|sqs| &sqs.message_attributes)
            .filter(|attributes| !attributes.is_empty())
    }
}

/// Where a notification goes. For SQS the recipient is a queue name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub recipient: String,
}

impl Destination {
    pub fn new(recipient: impl Into<String>) -> Self {
        Destination {
            recipient: recipient.into(),
        }
    }
}

/// A pluggable delivery mechanism driven by the dispatch framework.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Delivers a rendered notification.
    ///
    /// # Arguments
    ///
    /// * `notification` - The rendered notification
    /// * `destination` - The channel-specific routing target
    /// * `cancel` - Aborts the delivery when cancelled
    async fn send(
        &self,
        notification: &Notification,
        destination: &Destination,
        cancel: &CancellationToken,
    ) -> Result<(), SqsNotificationError>;
}

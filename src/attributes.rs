use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{SqsNotificationError, TemplateError};
use crate::notification::{Notification, Templater};
use crate::template::{FuncMap, Template, Vars};

/// Most message attributes SQS accepts on one message.
pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;

/// Longest attribute name SQS accepts.
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 256;

/// SQS-specific part of a notification.
///
/// Each message attribute value is a template rendered once per send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSqsNotification {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message_attributes: BTreeMap<String, String>,
}

impl AwsSqsNotification {
    pub fn new(message_attributes: BTreeMap<String, String>) -> Self {
        AwsSqsNotification { message_attributes }
    }

    /// Returns the rendering step for the SQS payload.
    ///
    /// The step makes sure the target notification carries an SQS payload and,
    /// when this payload has message attributes, copies them over and renders
    /// them with [`AwsSqsNotification::render_message_attributes`].
    pub fn get_templater(&self, name: &str, funcs: &FuncMap) -> Templater {
        let attributes = self.message_attributes.clone();
        let name = name.to_string();
        let funcs = funcs.clone();

        Box::new(move |notification: &mut Notification, vars: &Vars| -> Result<(), TemplateError> {
            let target = notification.aws_sqs.get_or_insert_with(Default::default);

            if !attributes.is_empty() {
                target.message_attributes = attributes.clone();
                target.render_message_attributes(&name, &funcs, vars)?;
            }

            Ok(())
        })
    }

    /// Renders every attribute value in place.
    ///
    /// A value that does not parse as a template is left untouched. An
    /// execution error stops rendering and is returned. A value that renders
    /// to an empty string keeps its original template text.
    pub fn render_message_attributes(
        &mut self,
        name: &str,
        funcs: &FuncMap,
        vars: &Vars,
    ) -> Result<(), TemplateError> {
        for (key, value) in self.message_attributes.iter_mut() {
            let template = match Template::parse(name, value, funcs) {
                Ok(template) => template,
                Err(e) => {
                    tracing::debug!(
                        attribute = %key,
                        error = %e,
                        "skipping unparsable message attribute"
                    );
                    continue;
                }
            };

            let rendered = template.execute(vars)?;
            if !rendered.is_empty() {
                *value = rendered;
            }
        }
        Ok(())
    }
}

/// Prepares rendered attributes for the wire.
///
/// Attributes with an empty value are dropped, since SQS rejects a `String`
/// attribute without a value. What remains must fit SQS's limits: at most
/// [`MAX_MESSAGE_ATTRIBUTES`] entries, and names of at most
/// [`MAX_ATTRIBUTE_NAME_LEN`] characters drawn from `A-Z a-z 0-9 _ - .`,
/// not starting with `AWS.` or `Amazon.` (any case), not starting or ending
/// with `.`, and without `..`.
pub fn outgoing_message_attributes(
    attributes: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, SqsNotificationError> {
    let mut outgoing = BTreeMap::new();
    for (name, value) in attributes {
        if value.is_empty() {
            tracing::debug!(attribute = %name, "dropping message attribute with empty value");
            continue;
        }
        validate_attribute_name(name)?;
        outgoing.insert(name.clone(), value.clone());
    }

    if outgoing.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(SqsNotificationError::InvalidMessageAttributes(format!(
            "{} attributes given, at most {MAX_MESSAGE_ATTRIBUTES} are allowed",
            outgoing.len()
        )));
    }

    Ok(outgoing)
}

fn validate_attribute_name(name: &str) -> Result<(), SqsNotificationError> {
    let invalid = |reason: &str| {
        Err(SqsNotificationError::InvalidMessageAttributes(format!(
            "attribute name {name:?} {reason}"
        )))
    };

    if name.is_empty() {
        return invalid("is empty");
    }
    if name.chars().count() > MAX_ATTRIBUTE_NAME_LEN {
        return invalid("is longer than 256 characters");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return invalid(&format!("contains {c:?}"));
    }

    let lower = name.to_ascii_lowercase();
    if lower.starts_with("aws.") || lower.starts_with("amazon.") {
        return invalid("uses a reserved prefix");
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return invalid("has a misplaced period");
    }

    Ok(())
}

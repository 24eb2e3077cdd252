//! Cloud gateway abstraction for listing, starting, creating, and deleting
//! compute instances.
//!
//! The reconciler and the launch supervisor only talk to the provider through
//! [`CloudGateway`]. Every call is a single network round trip; retry policy,
//! if any, belongs to the implementation's transport and never to callers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::instance::CloudInstance;

/// Metadata key under which the bootstrap payload is delivered.
pub const USER_DATA_METADATA_KEY: &str = "user-data";

/// Criteria selecting the instances that belong to one template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceFilter {
    /// Folder (project) that owns the instances.
    pub folder_id: String,
    /// Display name shared by every instance created for the template.
    pub name: String,
}

impl InstanceFilter {
    /// Creates a filter, trimming both fields.
    #[must_use]
    pub fn new(folder_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into().trim().to_owned(),
            name: name.into().trim().to_owned(),
        }
    }

    /// Renders the provider filter expression (`name="<name>"`).
    #[must_use]
    pub fn expression(&self) -> String {
        format!("name=\"{}\"", self.name.replace('"', "\\\""))
    }
}

/// Create-instance request merged from a base template and overrides.
///
/// The base template is the per-account JSON body in the provider's wire
/// format. Overrides replace the top-level `name`, `zoneId`, and `folderId`
/// fields and individual `metadata` entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateInstanceRequest {
    body: Map<String, Value>,
}

impl CreateInstanceRequest {
    /// Parses the base template text. Blank text yields an empty request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidTemplate`] when the text is not a JSON
    /// object, or when its `metadata` field is present but not an object.
    pub fn from_base_template(text: &str) -> Result<Self, GatewayError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|err| GatewayError::InvalidTemplate(err.to_string()))?;
        let Value::Object(body) = value else {
            return Err(GatewayError::InvalidTemplate(String::from(
                "base template must be a JSON object",
            )));
        };
        if body.get("metadata").is_some_and(|meta| !meta.is_object()) {
            return Err(GatewayError::InvalidTemplate(String::from(
                "base template metadata must be a JSON object",
            )));
        }
        Ok(Self { body })
    }

    /// Overrides the display name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.body
            .insert(String::from("name"), Value::String(value.into()));
        self
    }

    /// Overrides the availability zone.
    #[must_use]
    pub fn zone_id(mut self, value: impl Into<String>) -> Self {
        self.body
            .insert(String::from("zoneId"), Value::String(value.into()));
        self
    }

    /// Overrides the owning folder.
    #[must_use]
    pub fn folder_id(mut self, value: impl Into<String>) -> Self {
        self.body
            .insert(String::from("folderId"), Value::String(value.into()));
        self
    }

    /// Sets a single metadata entry, keeping any others from the base.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let entry = self
            .body
            .entry(String::from("metadata"))
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = entry {
            metadata.insert(key.into(), Value::String(value.into()));
        }
        self
    }

    fn string_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Returns the display name, if set.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.string_field("name")
    }

    /// Returns the zone, if set.
    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        self.string_field("zoneId")
    }

    /// Returns the folder, if set.
    #[must_use]
    pub fn folder(&self) -> Option<&str> {
        self.string_field("folderId")
    }

    /// Returns a metadata value, if set.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(|meta| meta.get(key))
            .and_then(Value::as_str)
    }

    /// Returns the merged JSON body.
    #[must_use]
    pub const fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

/// Result of a long-running provider operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OperationResult {
    /// Operation identifier, when the provider returned one.
    pub id: Option<String>,
    /// Error message attached to the operation.
    pub error: Option<String>,
}

impl OperationResult {
    /// An operation that completed without an error.
    #[must_use]
    pub const fn accepted(id: Option<String>) -> Self {
        Self { id, error: None }
    }

    /// An operation carrying the provider's error message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            id: None,
            error: Some(message.into()),
        }
    }

    /// Returns the error message when it is present and non-empty.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }
}

/// Errors raised by gateway implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GatewayError {
    /// The provider answered with a non-success status.
    #[error("provider error (status {status}): {message}")]
    Provider {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body or message returned by the provider.
        message: String,
    },
    /// The request never reached the provider or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider response could not be decoded.
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    /// The base create-instance template is malformed.
    #[error("invalid base instance template: {0}")]
    InvalidTemplate(String),
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Operations the core needs from a cloud provider.
pub trait CloudGateway: Send + Sync {
    /// Lists instances matching the filter, in provider order.
    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> GatewayFuture<'a, Vec<CloudInstance>>;

    /// Fetches a single instance, returning `None` when it does not exist.
    fn get_instance<'a>(&'a self, instance_id: &'a str)
    -> GatewayFuture<'a, Option<CloudInstance>>;

    /// Requests a power-on of a stopped instance.
    fn start_instance<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, OperationResult>;

    /// Requests creation of a new instance.
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> GatewayFuture<'a, OperationResult>;

    /// Requests irreversible deletion of an instance without waiting for it.
    fn terminate_instance<'a>(&'a self, instance_id: &'a str)
    -> GatewayFuture<'a, OperationResult>;
}

impl<G: CloudGateway + ?Sized> CloudGateway for Arc<G> {
    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> GatewayFuture<'a, Vec<CloudInstance>> {
        (**self).list_instances(filter)
    }

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Option<CloudInstance>> {
        (**self).get_instance(instance_id)
    }

    fn start_instance<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, OperationResult> {
        (**self).start_instance(instance_id)
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> GatewayFuture<'a, OperationResult> {
        (**self).create_instance(request)
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, OperationResult> {
        (**self).terminate_instance(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn overrides_replace_base_fields_and_keep_the_rest() {
        let base = r#"{
            "name": "from-template",
            "zoneId": "ru-central1-a",
            "platformId": "standard-v3",
            "metadata": {"serial-port-enable": "1"}
        }"#;
        let request = CreateInstanceRequest::from_base_template(base)
            .expect("base template should parse")
            .name("agents")
            .zone_id("ru-central1-b")
            .folder_id("folder-1")
            .metadata(USER_DATA_METADATA_KEY, "#cloud-config");

        assert_eq!(request.display_name(), Some("agents"));
        assert_eq!(request.zone(), Some("ru-central1-b"));
        assert_eq!(request.folder(), Some("folder-1"));
        assert_eq!(request.metadata_value("serial-port-enable"), Some("1"));
        assert_eq!(
            request.metadata_value(USER_DATA_METADATA_KEY),
            Some("#cloud-config")
        );
        assert_eq!(
            request.body().get("platformId").and_then(Value::as_str),
            Some("standard-v3")
        );
    }

    #[rstest]
    #[case("[1, 2]")]
    #[case("not json")]
    #[case(r#"{"metadata": "flat"}"#)]
    fn rejects_malformed_base_templates(#[case] text: &str) {
        let err = CreateInstanceRequest::from_base_template(text)
            .expect_err("template should be rejected");
        assert!(matches!(err, GatewayError::InvalidTemplate(_)));
    }

    #[rstest]
    fn blank_base_template_yields_empty_body() {
        let request =
            CreateInstanceRequest::from_base_template("  \n").expect("blank template is allowed");
        assert!(request.body().is_empty());
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("quota exceeded"), Some("quota exceeded"))]
    fn error_message_ignores_empty_text(
        #[case] error: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let result = OperationResult {
            id: None,
            error: error.map(str::to_owned),
        };
        assert_eq!(result.error_message(), expected);
    }

    #[rstest]
    fn filter_expression_quotes_the_name() {
        let filter = InstanceFilter::new(" folder ", " agents ");
        assert_eq!(filter.folder_id, "folder");
        assert_eq!(filter.expression(), "name=\"agents\"");
    }
}

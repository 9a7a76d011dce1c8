//! Script metadata returned by `getScriptMetadata()`.
//!
//! The contract is versioned through `apiVersion`; only version 1 exists.
//! A script that omits the field is treated as version 1.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::extension_events::ExtensionEvent;
use crate::validator::ValidationError;

pub const SUPPORTED_API_VERSION: u32 = 1;

const fn default_api_version() -> u32 {
    SUPPORTED_API_VERSION
}

/// What a script says about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    pub id: String,
    pub display_name: String,
    #[serde(default, deserialize_with = "version_string")]
    pub version: Option<String>,
    /// Runs through the async dispatcher instead of the sync chain.
    #[serde(default, rename = "async")]
    pub is_async: bool,
    pub events: Vec<String>,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub fields: Vec<ParameterField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "string".to_string()
}

/// Scripts commonly write `version: 1` or `version: 1.2`.
fn version_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

impl Default for ScriptMetadata {
    fn default() -> Self {
        Self {
            api_version: SUPPORTED_API_VERSION,
            id: String::new(),
            display_name: String::new(),
            version: None,
            is_async: false,
            events: Vec::new(),
            parameters: ParameterSchema::default(),
        }
    }
}

impl ScriptMetadata {
    /// Parse and check the value returned by the metadata entry point.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::metadata(format!(
                "getScriptMetadata() must return an object, got {}",
                json_type(value)
            )));
        }
        let metadata: Self = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::metadata(format!("invalid script metadata: {e}")))?;
        metadata.check()?;
        Ok(metadata)
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.api_version != SUPPORTED_API_VERSION {
            return Err(ValidationError::metadata(format!(
                "unsupported metadata apiVersion {} (supported: {SUPPORTED_API_VERSION})",
                self.api_version
            )));
        }
        if self.id.trim().is_empty() {
            return Err(ValidationError::metadata("metadata 'id' must not be empty"));
        }
        if self.display_name.trim().is_empty() {
            return Err(ValidationError::metadata(
                "metadata 'displayName' must not be empty",
            ));
        }
        if self.events.is_empty() {
            return Err(ValidationError::metadata(
                "metadata 'events' must list at least one event",
            ));
        }
        if let Some(unknown) = self
            .events
            .iter()
            .find(|event| event.parse::<ExtensionEvent>().is_err())
        {
            return Err(ValidationError::metadata(format!(
                "unknown event '{unknown}' in metadata"
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &self.parameters.fields {
            if field.name.trim().is_empty() {
                return Err(ValidationError::metadata("parameter field without a name"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ValidationError::metadata(format!(
                    "duplicate parameter field '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    pub fn subscribed_events(&self) -> BTreeSet<String> {
        self.events.iter().cloned().collect()
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterField> {
        self.parameters.fields.iter().filter(|field| field.required)
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

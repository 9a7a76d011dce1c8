//! Execution engine: artifact lookup, per-invocation globals and result
//! conversion.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::artifact_cache::ArtifactCache;
use crate::error::{Error, Result};
use crate::extensions_js::{EntryCall, ScriptRuntime};
use crate::host::ScriptLogContext;
use crate::metadata::ScriptMetadata;
use crate::model::{Payload, ScopePath, ScriptDefinition, content_hash};
use crate::store::ScriptStore;
use crate::validator::{EXECUTE_ENTRY_POINT, METADATA_ENTRY_POINT, ValidationError};

/// Global holding the firing event's name.
pub const EXTENSION_EVENT_GLOBAL: &str = "extensionEvent";
/// Global holding the previous script's result in a sync chain.
pub const OUTPUT_GLOBAL: &str = "output";
/// Global holding the merged operator parameters.
pub const PARAMETERS_GLOBAL: &str = "extensionParameters";
/// Global naming the type the caller expects back.
pub const RETURN_CLASS_GLOBAL: &str = "returnClass";

/// Names a payload can never shadow.
const HOST_GLOBALS: [&str; 4] = ["log", "json", "simpleHttpClient", "utils"];

/// Everything one script run needs besides the engine itself.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub script: &'a ScriptDefinition,
    pub event: &'a str,
    /// The scope the event fired at, which may be below the script's own.
    pub scope: &'a ScopePath,
    pub payload: &'a Payload,
    pub output: Option<&'a Value>,
    pub parameters: &'a Payload,
    pub return_class: &'a str,
}

pub struct ExecutionEngine {
    runtime: Arc<ScriptRuntime>,
    cache: Arc<ArtifactCache>,
    store: Arc<dyn ScriptStore>,
}

impl ExecutionEngine {
    pub fn new(
        runtime: Arc<ScriptRuntime>,
        cache: Arc<ArtifactCache>,
        store: Arc<dyn ScriptStore>,
    ) -> Self {
        Self {
            runtime,
            cache,
            store,
        }
    }

    pub const fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Run `executeScript` and return its raw JSON result.
    pub fn execute(&self, invocation: &Invocation<'_>) -> Result<Value> {
        let script = invocation.script;
        let id = script.id().to_string();
        let artifact = self
            .cache
            .get_or_compile(&script.content_hash, || {
                // The stored text may already belong to a newer version.
                Ok(self
                    .store
                    .get_source(&script.scope, &script.name)?
                    .filter(|source| content_hash(source) == script.content_hash)
                    .unwrap_or_else(|| script.source.clone()))
            })
            .map_err(|err| match err {
                Error::Compile { message, .. } => Error::compile(id.clone(), message),
                other => other,
            })?;

        let globals = invocation_globals(invocation);
        let log_context = ScriptLogContext {
            script: id.clone(),
            scope: invocation.scope.to_string(),
            event: invocation.event.to_string(),
        };
        let argument = Value::String(invocation.event.to_string());
        debug!(
            event = "engine.execute",
            script = %id,
            scope = %invocation.scope,
            extension_event = invocation.event,
            "Executing script"
        );
        self.runtime.call_entry(&EntryCall {
            script: &id,
            program: artifact.program(),
            entry: EXECUTE_ENTRY_POINT,
            globals: &globals,
            argument: Some(&argument),
            log_context: &log_context,
        })
    }

    /// Run a script and convert its result to `T`.
    pub fn run_sync<T: DeserializeOwned>(&self, invocation: &Invocation<'_>) -> Result<T> {
        let value = self.execute(invocation)?;
        convert(&invocation.script.id().to_string(), value)
    }

    /// Call `getScriptMetadata()` on a validated source with no payload.
    ///
    /// Any failure, including an exception in the script, is a validation
    /// error: the script is rejected, never retried.
    pub fn extract_metadata(&self, label: &str, source: &str) -> Result<ScriptMetadata> {
        let log_context = ScriptLogContext {
            script: label.to_string(),
            ..ScriptLogContext::default()
        };
        let raw = self
            .runtime
            .call_entry(&EntryCall {
                script: label,
                program: source,
                entry: METADATA_ENTRY_POINT,
                globals: &Payload::new(),
                argument: None,
                log_context: &log_context,
            })
            .map_err(|err| {
                warn!(
                    event = "engine.metadata_failed",
                    script = label,
                    error = %err,
                    "getScriptMetadata() failed"
                );
                ValidationError::metadata(format!("getScriptMetadata() failed: {err}"))
            })?;
        Ok(ScriptMetadata::from_value(&raw)?)
    }
}

fn invocation_globals(invocation: &Invocation<'_>) -> Payload {
    let mut globals: Payload = invocation
        .payload
        .iter()
        .filter(|(key, _)| !HOST_GLOBALS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    globals.insert(
        EXTENSION_EVENT_GLOBAL.to_string(),
        Value::String(invocation.event.to_string()),
    );
    globals.insert(
        OUTPUT_GLOBAL.to_string(),
        invocation.output.cloned().unwrap_or(Value::Null),
    );
    globals.insert(
        PARAMETERS_GLOBAL.to_string(),
        Value::Object(invocation.parameters.clone()),
    );
    globals.insert(
        RETURN_CLASS_GLOBAL.to_string(),
        Value::String(invocation.return_class.to_string()),
    );
    globals
}

/// Convert a script result into the caller's type via a JSON round trip.
pub fn convert<T: DeserializeOwned>(script: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::conversion(
            script,
            format!("cannot convert result to {}: {e}", short_type_name::<T>()),
        )
    })
}

/// Last path segment of a type name, e.g. `TaxIdValidation`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

//! Extension service: the public face of the engine.
//!
//! Authoring (save, delete, toggle, parameter values) and event firing (sync
//! chains and async fan-out) both go through [`ExtensionService`]. Sync chains
//! run on the caller's thread; async work is only enqueued.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact_cache::{ArtifactCache, QuickJsCompiler};
use crate::clock::{SharedClock, SystemClock};
use crate::config::EngineConfig;
use crate::connectors::http::{BlockingHttpClient, HttpClient};
use crate::engine::{ExecutionEngine, Invocation, convert, short_type_name};
use crate::error::{Error, Result};
use crate::extension_dispatcher::{AsyncDispatcher, AsyncJob};
use crate::extensions_js::ScriptRuntime;
use crate::host::{HostBindings, ScriptLogger, TracingScriptLogger};
use crate::model::{Payload, ScopePath, ScriptDefinition, ScriptDraft, ScriptId, content_hash};
use crate::resolver::PathResolver;
use crate::store::ScriptStore;
use crate::validator::{self, ValidationError};

/// Collaborators the service is built from.
#[derive(Clone)]
pub struct ServiceComponents {
    pub store: Arc<dyn ScriptStore>,
    pub logger: Arc<dyn ScriptLogger>,
    pub http: Arc<dyn HttpClient>,
    pub clock: SharedClock,
}

pub struct ExtensionService {
    store: Arc<dyn ScriptStore>,
    resolver: PathResolver,
    engine: Arc<ExecutionEngine>,
    dispatcher: AsyncDispatcher,
}

impl ExtensionService {
    pub fn new(config: &EngineConfig, components: ServiceComponents) -> Self {
        let ServiceComponents {
            store,
            logger,
            http,
            clock,
        } = components;
        let runtime = Arc::new(ScriptRuntime::new(
            HostBindings::new(logger, http),
            config.runtime_limits(),
        ));
        let cache = Arc::new(ArtifactCache::new(
            Arc::new(QuickJsCompiler::new(Arc::clone(&runtime))),
            clock,
            config.artifact_idle(),
        ));
        let engine = Arc::new(ExecutionEngine::new(runtime, cache, Arc::clone(&store)));
        let dispatcher = AsyncDispatcher::new(engine.clone(), config.async_queue_idle());
        Self {
            resolver: PathResolver::new(Arc::clone(&store)),
            store,
            engine,
            dispatcher,
        }
    }

    /// Production wiring: `tracing` logger, blocking HTTP client, system clock.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn ScriptStore>) -> Result<Self> {
        let http = BlockingHttpClient::new(config.http.clone())?;
        Ok(Self::new(
            config,
            ServiceComponents {
                store,
                logger: Arc::new(TracingScriptLogger),
                http: Arc::new(http),
                clock: Arc::new(SystemClock),
            },
        ))
    }

    pub fn artifact_cache(&self) -> &Arc<ArtifactCache> {
        self.engine.cache()
    }

    // ------------------------------------------------------------------
    // Authoring
    // ------------------------------------------------------------------

    /// Validate, extract metadata and persist a script.
    ///
    /// Nothing is stored when any step fails. A changed source invalidates the
    /// cached artifact of the previous version.
    pub fn save_script(&self, draft: ScriptDraft) -> Result<ScriptDefinition> {
        check_script_name(&draft.name)?;
        let id = ScriptId::new(draft.scope.clone(), draft.name.clone());
        let label = id.to_string();

        let tree = validator::validate(&draft.source).inspect_err(|err| {
            warn!(event = "service.rejected", script = %label, error = %err, "Script rejected");
        })?;
        validator::require_entry_points(&tree)?;
        let metadata = self.engine.extract_metadata(&label, &draft.source)?;

        let definition = ScriptDefinition {
            scope: draft.scope,
            name: draft.name,
            content_hash: content_hash(&draft.source),
            source: draft.source,
            enabled: draft.enabled,
            async_capable: metadata.is_async,
            subscribed_events: metadata.subscribed_events(),
            metadata,
        };
        let previous = self.store.save(definition.clone())?;
        if let Some(previous) = previous
            && previous.content_hash != definition.content_hash
        {
            self.artifact_cache().invalidate(&previous.content_hash);
        }
        info!(
            event = "service.saved",
            script = %label,
            content_hash = %definition.content_hash,
            async_capable = definition.async_capable,
            "Script saved"
        );
        Ok(definition)
    }

    /// Remove a script, its subscriptions and parameter values. Returns
    /// whether anything was deleted.
    pub fn delete_script(&self, scope: &ScopePath, name: &str) -> Result<bool> {
        let id = ScriptId::new(scope.clone(), name);
        let Some(removed) = self.store.delete(&id)? else {
            return Ok(false);
        };
        self.artifact_cache().invalidate(&removed.content_hash);
        info!(event = "service.deleted", script = %id, "Script deleted");
        Ok(true)
    }

    /// Toggle a script without re-validating it.
    pub fn set_enabled(&self, scope: &ScopePath, name: &str, enabled: bool) -> Result<ScriptDefinition> {
        let id = ScriptId::new(scope.clone(), name);
        let mut definition = self
            .store
            .get(&id)?
            .ok_or_else(|| Error::ScriptNotFound(id.to_string()))?;
        definition.enabled = enabled;
        self.store.save(definition.clone())?;
        info!(event = "service.toggled", script = %id, enabled, "Script toggled");
        Ok(definition)
    }

    pub fn get_script(&self, scope: &ScopePath, name: &str) -> Result<Option<ScriptDefinition>> {
        self.store.get(&ScriptId::new(scope.clone(), name))
    }

    pub fn list_scripts(&self) -> Result<Vec<ScriptDefinition>> {
        self.store.list()
    }

    /// Store operator parameter values for `name` at `scope`. An empty map
    /// clears them.
    pub fn set_parameter_values(&self, scope: &ScopePath, name: &str, values: Payload) -> Result<()> {
        self.store.save_parameter_values(scope, name, values)
    }

    // ------------------------------------------------------------------
    // Firing
    // ------------------------------------------------------------------

    pub fn resolve_active_scripts(
        &self,
        event: &str,
        scope: &ScopePath,
        async_mode: bool,
    ) -> Result<Vec<ScriptDefinition>> {
        self.resolver.resolve_active_scripts(event, scope, async_mode)
    }

    /// Run every active sync script for `event` at `scope` in order, feeding
    /// each result to the next as `output`.
    ///
    /// Returns the last script's converted result, or `default` when no script
    /// ran. The first failing script aborts the chain.
    pub fn fire_sync<T: DeserializeOwned>(
        &self,
        event: &str,
        scope: &ScopePath,
        payload: &Payload,
        default: T,
    ) -> Result<T> {
        let scripts = self.resolve_active_scripts(event, scope, false)?;
        let return_class = short_type_name::<T>();
        let mut output: Option<Value> = None;
        let mut last = None;

        for script in &scripts {
            let Some(parameters) = self.parameters_for(script, scope)? else {
                continue;
            };
            let value = self
                .engine
                .execute(&Invocation {
                    script,
                    event,
                    scope,
                    payload,
                    output: output.as_ref(),
                    parameters: &parameters,
                    return_class,
                })
                .inspect_err(|err| {
                    warn!(
                        event = "service.sync_failed",
                        script = %script.id(),
                        scope = %scope,
                        extension_event = event,
                        error = %err,
                        "Sync script failed; aborting chain"
                    );
                })?;
            last = Some(convert::<T>(&script.id().to_string(), value.clone())?);
            output = Some(value);
        }
        Ok(last.unwrap_or(default))
    }

    /// Enqueue every active async script for `event` at `scope`; returns how
    /// many were dispatched.
    pub fn fire_async(&self, event: &str, scope: &ScopePath, payload: &Payload) -> Result<usize> {
        let scripts = self.resolve_active_scripts(event, scope, true)?;
        let mut dispatched = 0;
        for script in scripts {
            let Some(parameters) = self.parameters_for(&script, scope)? else {
                continue;
            };
            self.dispatcher.dispatch(AsyncJob {
                script,
                event: event.to_string(),
                scope: scope.clone(),
                payload: payload.clone(),
                parameters,
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Wait for queued async work and stop the workers.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Parameter values merged over every prefix of `scope`, most specific
    /// last. `None` when a required parameter has no value.
    fn parameters_for(&self, script: &ScriptDefinition, scope: &ScopePath) -> Result<Option<Payload>> {
        let mut merged = Payload::new();
        for prefix in scope.prefixes() {
            merged.extend(self.store.parameter_values(&prefix, &script.name)?);
        }
        if let Some(missing) = script
            .metadata
            .required_parameters()
            .find(|field| merged.get(&field.name).is_none_or(Value::is_null))
        {
            warn!(
                event = "service.script_skipped",
                script = %script.id(),
                scope = %scope,
                parameter = %missing.name,
                "Required extension parameter has no value; skipping script"
            );
            return Ok(None);
        }
        Ok(Some(merged))
    }
}

fn check_script_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::metadata("script name must not be empty").into());
    }
    if name.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::metadata(format!(
            "script name {name:?} must not contain '/', whitespace or control characters"
        ))
        .into());
    }
    Ok(())
}

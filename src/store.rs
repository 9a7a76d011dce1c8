//! Script persistence boundary.
//!
//! The engine never owns storage; it talks to a [`ScriptStore`]. The
//! [`InMemoryScriptStore`] backs tests and the CLI.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::model::{Payload, ScopePath, ScriptDefinition, ScriptId};

pub trait ScriptStore: Send + Sync {
    /// Enabled definitions at any of `prefixes` that subscribe to `event` and
    /// whose async flag equals `async_mode`. Order is unspecified.
    fn find_active_by_prefixes(
        &self,
        event: &str,
        prefixes: &[ScopePath],
        async_mode: bool,
    ) -> Result<Vec<ScriptDefinition>>;

    fn get(&self, id: &ScriptId) -> Result<Option<ScriptDefinition>>;

    /// Current source text of the definition `name` at `scope`.
    fn get_source(&self, scope: &ScopePath, name: &str) -> Result<Option<String>>;

    /// Insert or replace; returns the previous definition.
    fn save(&self, definition: ScriptDefinition) -> Result<Option<ScriptDefinition>>;

    /// Remove the definition, its subscriptions and the parameter values
    /// stored under its own scope.
    fn delete(&self, id: &ScriptId) -> Result<Option<ScriptDefinition>>;

    /// All definitions ordered by scope then name.
    fn list(&self) -> Result<Vec<ScriptDefinition>>;

    /// Operator-supplied parameter values for `name` at exactly `scope`.
    fn parameter_values(&self, scope: &ScopePath, name: &str) -> Result<Payload>;

    fn save_parameter_values(&self, scope: &ScopePath, name: &str, values: Payload) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryScriptStore {
    scripts: Mutex<BTreeMap<ScriptId, ScriptDefinition>>,
    parameters: Mutex<BTreeMap<ScriptId, Payload>>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptStore for InMemoryScriptStore {
    fn find_active_by_prefixes(
        &self,
        event: &str,
        prefixes: &[ScopePath],
        async_mode: bool,
    ) -> Result<Vec<ScriptDefinition>> {
        let scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(scripts
            .values()
            .filter(|definition| {
                definition.enabled
                    && definition.async_capable == async_mode
                    && definition.subscribes_to(event)
                    && prefixes.contains(&definition.scope)
            })
            .cloned()
            .collect())
    }

    fn get(&self, id: &ScriptId) -> Result<Option<ScriptDefinition>> {
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn get_source(&self, scope: &ScopePath, name: &str) -> Result<Option<String>> {
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ScriptId::new(scope.clone(), name))
            .map(|definition| definition.source.clone()))
    }

    fn save(&self, definition: ScriptDefinition) -> Result<Option<ScriptDefinition>> {
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id(), definition))
    }

    fn delete(&self, id: &ScriptId) -> Result<Option<ScriptDefinition>> {
        self.parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id))
    }

    fn list(&self) -> Result<Vec<ScriptDefinition>> {
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn parameter_values(&self, scope: &ScopePath, name: &str) -> Result<Payload> {
        Ok(self
            .parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ScriptId::new(scope.clone(), name))
            .cloned()
            .unwrap_or_default())
    }

    fn save_parameter_values(&self, scope: &ScopePath, name: &str, values: Payload) -> Result<()> {
        let mut parameters = self.parameters.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ScriptId::new(scope.clone(), name);
        if values.is_empty() {
            parameters.remove(&id);
        } else {
            parameters.insert(id, values);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use serde_json::json;

    use crate::metadata::ScriptMetadata;
    use crate::model::content_hash;

    fn definition(scope: &str, name: &str, events: &[&str], async_capable: bool) -> ScriptDefinition {
        let source = format!("// {scope}/{name}");
        ScriptDefinition {
            scope: ScopePath::parse(scope).expect("scope"),
            name: name.to_string(),
            content_hash: content_hash(&source),
            source,
            enabled: true,
            async_capable,
            subscribed_events: events.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            metadata: ScriptMetadata::default(),
        }
    }

    #[test]
    fn find_filters_on_prefix_event_flag_and_enabled() {
        let store = InMemoryScriptStore::new();
        store.save(definition("", "a", &["USER_SIGNED_UP"], false)).expect("save");
        store.save(definition("acme", "b", &["USER_SIGNED_UP"], false)).expect("save");
        store.save(definition("other", "c", &["USER_SIGNED_UP"], false)).expect("save");
        store.save(definition("acme", "d", &["TICKET_ASSIGNED"], false)).expect("save");
        store.save(definition("acme", "e", &["USER_SIGNED_UP"], true)).expect("save");
        let mut disabled = definition("acme", "f", &["USER_SIGNED_UP"], false);
        disabled.enabled = false;
        store.save(disabled).expect("save");

        let prefixes = ScopePath::parse("acme.conf").expect("path").prefixes();
        let mut names: Vec<_> = store
            .find_active_by_prefixes("USER_SIGNED_UP", &prefixes, false)
            .expect("find")
            .into_iter()
            .map(|d| d.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        let async_names: Vec<_> = store
            .find_active_by_prefixes("USER_SIGNED_UP", &prefixes, true)
            .expect("find")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(async_names, vec!["e"]);
    }

    #[test]
    fn save_returns_previous_and_source_is_found_by_path_and_name() {
        let store = InMemoryScriptStore::new();
        let first = definition("acme", "a", &["USER_SIGNED_UP"], false);
        assert!(store.save(first.clone()).expect("save").is_none());
        let previous = store.save(first.clone()).expect("save").expect("previous");
        assert_eq!(previous, first);
        assert_eq!(
            store.get_source(&first.scope, &first.name).expect("source"),
            Some(first.source.clone())
        );
        assert_eq!(store.get_source(&first.scope, "missing").expect("source"), None);
        assert_eq!(store.get_source(&ScopePath::root(), &first.name).expect("source"), None);
    }

    #[test]
    fn delete_drops_parameter_values() {
        let store = InMemoryScriptStore::new();
        let def = definition("acme", "a", &["USER_SIGNED_UP"], false);
        let mut values = Payload::new();
        values.insert("apiKey".into(), json!("k"));
        store
            .save_parameter_values(&def.scope, &def.name, values)
            .expect("params");
        store.save(def.clone()).expect("save");

        assert!(store.delete(&def.id()).expect("delete").is_some());
        assert!(store.get(&def.id()).expect("get").is_none());
        assert!(store.parameter_values(&def.scope, &def.name).expect("values").is_empty());
        assert!(store.delete(&def.id()).expect("delete").is_none());
    }

    #[test]
    fn list_is_ordered_by_identity() {
        let store = InMemoryScriptStore::new();
        store.save(definition("acme", "b", &["USER_SIGNED_UP"], false)).expect("save");
        store.save(definition("", "z", &["USER_SIGNED_UP"], false)).expect("save");
        store.save(definition("acme", "a", &["USER_SIGNED_UP"], false)).expect("save");
        let ids: Vec<String> = store
            .list()
            .expect("list")
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["/z", "acme/a", "acme/b"]);
    }
}

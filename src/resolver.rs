//! Active-script resolution for a firing scope.
//!
//! Candidates come from every prefix of the firing path (root first). When a
//! name is defined at several prefixes, the most specific enabled definition
//! wins; the result is ordered by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::model::{ScopePath, ScriptDefinition};
use crate::store::ScriptStore;

pub struct PathResolver {
    store: Arc<dyn ScriptStore>,
}

impl PathResolver {
    pub fn new(store: Arc<dyn ScriptStore>) -> Self {
        Self { store }
    }

    pub fn resolve_active_scripts(
        &self,
        event: &str,
        scope: &ScopePath,
        async_mode: bool,
    ) -> Result<Vec<ScriptDefinition>> {
        let prefixes = scope.prefixes();
        let candidates = self
            .store
            .find_active_by_prefixes(event, &prefixes, async_mode)?;
        let resolved = select_overrides(candidates, event, scope, async_mode);
        debug!(
            event = "resolver.resolved",
            extension_event = event,
            scope = %scope,
            async_mode,
            count = resolved.len(),
            "Resolved active scripts"
        );
        Ok(resolved)
    }
}

/// Apply the override rule to a raw candidate list.
///
/// Candidates that are disabled, unsubscribed, of the other async kind or not
/// on the firing path are dropped first, so a disabled definition never hides
/// a less specific enabled one.
pub fn select_overrides(
    candidates: Vec<ScriptDefinition>,
    event: &str,
    scope: &ScopePath,
    async_mode: bool,
) -> Vec<ScriptDefinition> {
    let mut winners: BTreeMap<String, ScriptDefinition> = BTreeMap::new();
    for candidate in candidates {
        if !candidate.enabled
            || candidate.async_capable != async_mode
            || !candidate.subscribes_to(event)
            || !candidate.scope.is_prefix_of(scope)
        {
            continue;
        }
        match winners.get(&candidate.name) {
            Some(current) if current.scope.depth() >= candidate.scope.depth() => {}
            _ => {
                winners.insert(candidate.name.clone(), candidate);
            }
        }
    }
    winners.into_values().collect()
}

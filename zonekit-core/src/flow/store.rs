//! Flow definition store and action alias table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::FlowDefinition;
use crate::types::normalize_key;

/// Built-in action aliases (alias → canonical action name).
const DEFAULT_ACTION_ALIASES: &[(&str, &str)] = &[
    ("apply_buff", "ApplyBuff"),
    ("clean_buff", "CleanBuff"),
    ("remove_buff", "RemoveBuff"),
    ("teleport", "Teleport"),
    ("set_position", "SetPosition"),
    ("message_all", "SendMessageToAll"),
    ("message_platform", "SendMessageToPlatform"),
    ("message_user", "SendMessageToUser"),
];

/// Registry of named flows, looked up by trimmed, case-insensitive id.
///
/// Readers get an `Arc<FlowDefinition>` so a concurrent reload never
/// mutates a definition that is mid-execution.
pub struct FlowStore {
    flows: RwLock<HashMap<String, Arc<FlowDefinition>>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for FlowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStore")
            .field("flows", &self.flows.read().len())
            .field("aliases", &self.aliases.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for FlowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_aliases() -> HashMap<String, String> {
    DEFAULT_ACTION_ALIASES
        .iter()
        .map(|(alias, action)| ((*alias).to_string(), (*action).to_string()))
        .collect()
}

impl FlowStore {
    /// Create an empty store seeded with the default action aliases.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            aliases: RwLock::new(default_aliases()),
        }
    }

    // -- flows --------------------------------------------------------------

    /// Register a flow. Returns `false` for an empty id, or when the id is
    /// taken and `replace` is not set.
    pub fn register_flow(&self, definition: FlowDefinition, replace: bool) -> bool {
        let key = normalize_key(definition.id());
        if key.is_empty() {
            return false;
        }
        let mut flows = self.flows.write();
        if !replace && flows.contains_key(&key) {
            return false;
        }
        debug!(flow = %definition.id(), steps = definition.total_steps(), "Registered flow");
        flows.insert(key, Arc::new(definition));
        true
    }

    /// Remove a flow. Returns `true` if it existed.
    pub fn remove_flow(&self, flow_id: &str) -> bool {
        let key = normalize_key(flow_id);
        if key.is_empty() {
            return false;
        }
        self.flows.write().remove(&key).is_some()
    }

    /// Look up a flow. Empty and unknown ids both yield `None`.
    #[must_use]
    pub fn try_get_flow(&self, flow_id: &str) -> Option<Arc<FlowDefinition>> {
        let key = normalize_key(flow_id);
        if key.is_empty() {
            return None;
        }
        self.flows.read().get(&key).cloned()
    }

    /// Registered flow ids (original casing), sorted.
    #[must_use]
    pub fn flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .flows
            .read()
            .values()
            .map(|d| d.id().to_string())
            .collect();
        names.sort();
        names
    }

    /// Number of registered flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    /// Whether no flows are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }

    /// Replace the whole definition set in one swap.
    ///
    /// Definitions with empty ids are skipped; later duplicates win.
    pub fn reload(&self, definitions: impl IntoIterator<Item = FlowDefinition>) {
        let mut next = HashMap::new();
        for def in definitions {
            let key = normalize_key(def.id());
            if key.is_empty() {
                continue;
            }
            next.insert(key, Arc::new(def));
        }
        let count = next.len();
        *self.flows.write() = next;
        info!(flows = count, "Flow definitions reloaded");
    }

    /// Drop every flow definition (aliases are kept).
    pub fn clear_flows(&self) {
        self.flows.write().clear();
    }

    // -- action aliases -------------------------------------------------------

    /// Map `alias` to a canonical action name, overwriting any previous mapping.
    pub fn register_action_alias(&self, alias: &str, action: &str) -> bool {
        let key = normalize_key(alias);
        let action = action.trim();
        if key.is_empty() || action.is_empty() {
            return false;
        }
        self.aliases.write().insert(key, action.to_string());
        true
    }

    /// Replace the whole alias table with the defaults plus `overrides`.
    ///
    /// Aliases registered earlier and not in `overrides` stop resolving.
    /// Blank entries are skipped. Returns the resulting table size.
    pub fn reload_action_aliases<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> usize {
        let mut table = default_aliases();
        for (alias, action) in overrides {
            let key = normalize_key(alias);
            let action = action.trim();
            if !key.is_empty() && !action.is_empty() {
                table.insert(key, action.to_string());
            }
        }
        let count = table.len();
        *self.aliases.write() = table;
        debug!(aliases = count, "Action aliases reloaded");
        count
    }

    /// Remove an alias. Returns `true` if it existed.
    pub fn remove_action_alias(&self, alias: &str) -> bool {
        self.aliases.write().remove(&normalize_key(alias)).is_some()
    }

    /// Sorted copy of the alias table.
    #[must_use]
    pub fn action_aliases(&self) -> BTreeMap<String, String> {
        self.aliases
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Resolve a step's action name through the alias table.
    ///
    /// Unknown names pass through trimmed, so canonical names need no alias.
    #[must_use]
    pub fn resolve_action(&self, alias_or_name: &str) -> String {
        let trimmed = alias_or_name.trim();
        self.aliases
            .read()
            .get(&normalize_key(trimmed))
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

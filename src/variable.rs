//! Variable Registry
//!
//! Allocates stable variable identities for one query. Ids are assigned
//! monotonically and never reused; two variables are equal iff their ids
//! match. Variables outlive any individual plan, so forked plans can share
//! them or remap them through a fresh allocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identity of a query variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub u64);

impl std::fmt::Display for VariableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A query variable: a user-named binding (`FOR u IN ...`, `LET x = ...`)
/// or a planner-introduced temporary.
#[derive(Debug, Clone, Eq)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub user_defined: bool,
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Per-query variable allocator and lookup table.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: BTreeMap<VariableId, Variable>,
    next_id: u64,
}

impl VariableRegistry {
    pub fn new() -> Self {
        VariableRegistry::default()
    }

    /// Allocate a new user-defined variable.
    pub fn create(&mut self, name: impl Into<String>) -> VariableId {
        self.create_with_flag(name.into(), true)
    }

    /// Allocate a planner temporary. Temporaries are named after their id so
    /// serialized plans stay readable.
    pub fn create_temporary(&mut self) -> VariableId {
        let name = format!("${}", self.next_id);
        self.create_with_flag(name, false)
    }

    fn create_with_flag(&mut self, name: String, user_defined: bool) -> VariableId {
        let id = VariableId(self.next_id);
        self.next_id += 1;
        self.variables.insert(
            id,
            Variable {
                id,
                name,
                user_defined,
            },
        );
        id
    }

    /// Re-register a variable with a known id, used when deserializing a
    /// plan shipped from another process. Advances the id watermark so later
    /// allocations stay unique.
    pub fn insert_existing(&mut self, variable: Variable) {
        self.next_id = self.next_id.max(variable.id.0 + 1);
        self.variables.insert(variable.id, variable);
    }

    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(&id)
    }

    /// Name lookup; first match in id order when shadowing produced
    /// duplicate names.
    pub fn by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.values().find(|v| v.name == name)
    }

    /// All variables in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut registry = VariableRegistry::new();
        let a = registry.create("a");
        let b = registry.create("b");
        let t = registry.create_temporary();
        assert!(a < b);
        assert!(b < t);
    }

    #[test]
    fn equality_is_by_id_only() {
        let left = Variable {
            id: VariableId(7),
            name: "x".to_string(),
            user_defined: true,
        };
        let right = Variable {
            id: VariableId(7),
            name: "renamed".to_string(),
            user_defined: false,
        };
        assert_eq!(left, right);
    }

    #[test]
    fn insert_existing_advances_watermark() {
        let mut registry = VariableRegistry::new();
        registry.insert_existing(Variable {
            id: VariableId(41),
            name: "imported".to_string(),
            user_defined: true,
        });
        let fresh = registry.create("fresh");
        assert!(fresh.0 > 41, "fresh id must not collide with imported ids");
    }

    #[test]
    fn temporaries_are_not_user_defined() {
        let mut registry = VariableRegistry::new();
        let t = registry.create_temporary();
        assert!(!registry.get(t).unwrap().user_defined);
        assert!(registry.get(t).unwrap().name.starts_with('$'));
    }
}

//! Reducer registry.
//!
//! Reducers are pure functions `(GlobalState, Action) -> GlobalState`.
//! Domain modules register them once at startup; the registry is
//! sealed into an immutable, process-wide table after that and lives
//! for the application lifetime (no teardown).

use crate::action::Action;
use crate::error::ReducerError;
use crate::state::GlobalState;
use std::collections::HashMap;
use std::sync::Arc;

/// A pure reducer computing the next snapshot payload from the current
/// snapshot and an action. Implementations must not touch the version;
/// the store owns the version bump.
pub type Reducer =
    Arc<dyn Fn(&GlobalState, &Action) -> Result<GlobalState, ReducerError> + Send + Sync>;

/// Immutable action-kind → reducer table.
pub struct ReducerRegistry {
    reducers: HashMap<String, Reducer>,
}

impl ReducerRegistry {
    pub fn builder() -> ReducerRegistryBuilder {
        ReducerRegistryBuilder {
            reducers: HashMap::new(),
        }
    }

    /// Look up the reducer for an action kind.
    pub fn get(&self, kind: &str) -> Option<&Reducer> {
        self.reducers.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.reducers.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("kinds", &self.reducers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Startup-time registration surface. `build()` seals the table; there
/// is deliberately no way to register afterwards.
pub struct ReducerRegistryBuilder {
    reducers: HashMap<String, Reducer>,
}

impl ReducerRegistryBuilder {
    /// Register a reducer for an action kind. Last registration for a
    /// kind wins; registration is a startup concern, not a runtime one.
    pub fn register<F>(mut self, kind: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&GlobalState, &Action) -> Result<GlobalState, ReducerError> + Send + Sync + 'static,
    {
        self.reducers.insert(kind.into(), Arc::new(reducer));
        self
    }

    pub fn build(self) -> Arc<ReducerRegistry> {
        Arc::new(ReducerRegistry {
            reducers: self.reducers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RoutingClass;
    use crate::identifiers::TabId;
    use serde_json::json;

    fn registry() -> Arc<ReducerRegistry> {
        ReducerRegistry::builder()
            .register("counter/increment", |state, _action| {
                let current = state
                    .get("count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default();
                Ok(state.advanced_with("count", json!(current + 1)))
            })
            .register("counter/reject", |_state, _action| {
                Err(ReducerError::Rejected {
                    reason: "always rejected".to_string(),
                })
            })
            .build()
    }

    #[test]
    fn registered_reducer_runs() {
        let registry = registry();
        let origin = TabId::new_from_entropy([1u8; 16]);
        let action = Action::new(origin, "counter/increment", RoutingClass::Local, json!({}));
        let state = GlobalState::initial();

        let reducer = registry.get("counter/increment").expect("registered");
        let next = reducer(&state, &action).expect("reducer succeeds");
        assert_eq!(next.get("count"), Some(&json!(1)));
    }

    #[test]
    fn unknown_kind_is_absent() {
        let registry = registry();
        assert!(registry.get("counter/decrement").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reducer_errors_propagate() {
        let registry = registry();
        let origin = TabId::new_from_entropy([1u8; 16]);
        let action = Action::new(origin, "counter/reject", RoutingClass::Local, json!({}));
        let reducer = registry.get("counter/reject").expect("registered");
        let err = reducer(&GlobalState::initial(), &action).expect_err("rejects");
        assert!(matches!(err, ReducerError::Rejected { .. }));
    }
}

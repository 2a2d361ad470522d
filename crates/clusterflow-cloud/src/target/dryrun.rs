use crate::action::{Action, ActionType, FieldChange, Plan};
use crate::delta::Changes;
use crate::task::TaskKey;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// Records what a live run would do without touching the cloud
#[derive(Debug, Default)]
pub struct DryRunTarget {
    actions: Mutex<Vec<Action>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, key: &TaskKey, actual: Option<&Value>, changes: &Changes) {
        let action_type = if actual.is_some() {
            ActionType::Update
        } else {
            ActionType::Create
        };
        let changes = changes
            .iter()
            .map(|(field, to)| {
                let from = actual.and_then(|a| a.get(field)).cloned();
                (
                    field.clone(),
                    FieldChange {
                        from,
                        to: to.clone(),
                    },
                )
            })
            .collect();

        tracing::debug!(task = %key, action = %action_type, "Recorded planned action");
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Action {
                kind: key.kind.to_string(),
                name: key.name.clone(),
                action_type,
                changes,
            });
    }

    /// Everything recorded so far, sorted by kind then name.
    pub fn plan(&self) -> Plan {
        let actions = self
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Plan::new(actions)
    }
}

//! Planned actions recorded by the dry-run target

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A change a task would make if the run were live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Resource kind (e.g., "LoadBalancer", "Instance")
    pub kind: String,

    /// Task name
    pub name: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Proposed field values, with the current value for updates
    pub changes: BTreeMap<String, FieldChange>,
}

impl Action {
    pub fn task(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Option<Value>,
    pub to: Value,
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
        }
    }
}

/// Plan containing all actions a run would perform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Actions ordered by kind then name
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new(mut actions: Vec<Action>) -> Self {
        actions.sort_by(|a, b| (&a.kind, &a.name).cmp(&(&b.kind, &b.name)));
        Self { actions }
    }

    pub fn has_changes(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return writeln!(f, "No changes need to be applied");
        }

        let creates = self.actions_by_type(ActionType::Create);
        if !creates.is_empty() {
            writeln!(f, "Will create resources:")?;
            for action in creates {
                writeln!(f, "  {}", action.task())?;
                for (field, change) in &action.changes {
                    writeln!(f, "  \t{:<24}\t{}", field, short(&change.to))?;
                }
                writeln!(f)?;
            }
        }

        let updates = self.actions_by_type(ActionType::Update);
        if !updates.is_empty() {
            writeln!(f, "Will modify resources:")?;
            for action in updates {
                writeln!(f, "  {}", action.task())?;
                for (field, change) in &action.changes {
                    let from = change.from.as_ref().map(short).unwrap_or_else(|| "<nil>".into());
                    writeln!(f, "  \t{:<24}\t{} -> {}", field, from, short(&change.to))?;
                }
                writeln!(f)?;
            }
        }

        write!(f, "{}", self.summary())
    }
}

fn short(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to create, {} to update", self.create, self.update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(kind: &str, name: &str, action_type: ActionType) -> Action {
        let mut changes = BTreeMap::new();
        changes.insert(
            "type".to_string(),
            FieldChange {
                from: (action_type == ActionType::Update).then(|| json!("LB-S")),
                to: json!("LB-GP-M"),
            },
        );
        Action {
            kind: kind.into(),
            name: name.into(),
            action_type,
            changes,
        }
    }

    #[test]
    fn test_plan_sorted_and_summarised() {
        let plan = Plan::new(vec![
            action("LoadBalancer", "b", ActionType::Create),
            action("Gateway", "z", ActionType::Update),
            action("LoadBalancer", "a", ActionType::Create),
        ]);
        let order: Vec<_> = plan.actions.iter().map(Action::task).collect();
        assert_eq!(order, vec!["Gateway/z", "LoadBalancer/a", "LoadBalancer/b"]);
        assert_eq!(plan.summary().to_string(), "2 to create, 1 to update");
    }

    #[test]
    fn test_plan_text() {
        let plan = Plan::new(vec![
            action("LoadBalancer", "api", ActionType::Create),
            action("Gateway", "gw", ActionType::Update),
        ]);
        let text = plan.to_string();
        assert!(text.starts_with("Will create resources:\n  LoadBalancer/api\n"));
        assert!(text.contains("Will modify resources:\n  Gateway/gw\n"));
        assert!(text.contains("LB-S -> LB-GP-M"));
        assert!(text.ends_with("1 to create, 1 to update"));
    }

    #[test]
    fn test_empty_plan() {
        assert_eq!(Plan::default().to_string(), "No changes need to be applied\n");
    }
}

//! Delta engine
//!
//! Turns `{actual, expected}` into the set of proposed changes and drives a
//! single task through find, diff, check and render.

use crate::context::RunContext;
use crate::error::{CloudError, Result};
use crate::target::Target;
use crate::task::{Lifecycle, Resource, TaskKey, TaskOutcome};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Fields of `expected` that differ from `actual`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    fields: BTreeMap<String, Value>,
}

impl Changes {
    /// Compare the serialized fields of `expected` against `actual`.
    ///
    /// A `null` expected field is unspecified and never proposed. With no
    /// actual state every specified field is a change.
    pub fn between<R: Serialize>(actual: Option<&R>, expected: &R) -> Result<Self> {
        let expected = to_object(expected)?;
        let actual = match actual {
            Some(actual) => Some(to_object(actual)?),
            None => None,
        };

        let mut fields = BTreeMap::new();
        for (field, value) in expected {
            if value.is_null() {
                continue;
            }
            let unchanged = actual
                .as_ref()
                .and_then(|a| a.get(&field))
                .is_some_and(|current| *current == value);
            if !unchanged {
                fields.insert(field, value);
            }
        }
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Proposed value of a field, if it changes.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.fields
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

fn to_object<R: Serialize>(value: &R) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CloudError::InvalidConfig(format!(
            "task state must serialize to an object, got {}",
            other
        ))),
    }
}

/// Reject changes to fields that cannot be modified once the resource
/// exists.
pub fn cannot_change<R>(actual: Option<&R>, changes: &Changes, fields: &[&str]) -> Result<()> {
    if actual.is_none() {
        return Ok(());
    }
    match fields.iter().find(|f| changes.contains(f)) {
        Some(field) => Err(CloudError::immutable(*field)),
        None => Ok(()),
    }
}

/// Fail when a field needed for creation is unset.
pub fn required<T>(value: &Option<T>, field: &str) -> Result<()> {
    match value {
        Some(_) => Ok(()),
        None => Err(CloudError::required(field)),
    }
}

/// Like [`required`], also rejecting empty strings.
pub fn required_str(value: &Option<String>, field: &str) -> Result<()> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(CloudError::required(field)),
    }
}

pub(crate) async fn reconcile<R: Resource>(
    ctx: &RunContext<R::Cloud>,
    expected: &mut R,
) -> Result<TaskOutcome> {
    let key = TaskKey::new(R::KIND, expected.name());
    let lifecycle = expected.lifecycle();

    expected.resolve(ctx).await?;

    if !ctx.target().checks_existing() && lifecycle.requires_existing() {
        debug!(task = %key, %lifecycle, "Not rendering externally managed resource");
        return Ok(TaskOutcome::unchanged_with("externally managed"));
    }

    let actual = if ctx.target().checks_existing() {
        match expected.find(ctx).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => None,
            Err(e)
                if e.is_permission_denied() && lifecycle == Lifecycle::WarnIfInsufficientAccess =>
            {
                warn!(task = %key, error = %e, "Insufficient access to read resource, skipping");
                return Ok(TaskOutcome::unchanged_with("insufficient access"));
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    if actual.is_none() && lifecycle.requires_existing() {
        return Err(CloudError::Lifecycle {
            task: key.to_string(),
            message: "resource does not exist".to_string(),
        });
    }

    if let Some(found) = &actual
        && expected.id().is_none()
        && let Some(id) = found.id()
    {
        debug!(task = %key, id, "Adopting existing resource");
        expected.set_id(id.to_string());
    }
    if let Some(found) = &actual {
        expected.adopt_outputs(found);
    }

    let changes = Changes::between(actual.as_ref(), expected)?;
    if actual.is_some() && changes.is_empty() {
        debug!(task = %key, "No changes");
        return Ok(TaskOutcome::unchanged());
    }

    if actual.is_some() {
        match lifecycle {
            Lifecycle::ExistsAndWarnIfChanges => {
                for (field, value) in changes.iter() {
                    warn!(task = %key, field = %field, expected = %value, "Ignoring drift");
                }
                return Ok(TaskOutcome::unchanged_with(format!(
                    "drift ignored: {}",
                    changes.field_names().join(", ")
                )));
            }
            Lifecycle::ExistsAndValidates => {
                return Err(CloudError::Lifecycle {
                    task: key.to_string(),
                    message: format!("drift in {}", changes.field_names().join(", ")),
                });
            }
            Lifecycle::Normal | Lifecycle::WarnIfInsufficientAccess => {}
        }
    }

    expected.check_changes(actual.as_ref(), &changes)?;

    let id_before = expected.id().map(str::to_string);
    match ctx.target() {
        Target::Live => {
            expected.render_live(ctx, actual.as_ref(), &changes).await?;
        }
        Target::Terraform(tf) => {
            expected.render_terraform(ctx, tf, actual.as_ref(), &changes)?;
        }
        Target::DryRun(plan) => {
            let current = actual.as_ref().map(serde_json::to_value).transpose()?;
            plan.record(&key, current.as_ref(), &changes);
        }
    }

    if let Some(before) = id_before.as_deref()
        && expected.id() != Some(before)
    {
        return Err(CloudError::Conflict(format!(
            "{} changed identifier from {} to {}",
            key,
            before,
            expected.id().unwrap_or("<none>")
        )));
    }

    if actual.is_none() {
        info!(task = %key, id = expected.id().unwrap_or(""), "Created");
        Ok(TaskOutcome::Created)
    } else {
        let fields = changes.field_names();
        info!(task = %key, fields = %fields.join(","), "Updated");
        Ok(TaskOutcome::Updated { fields })
    }
}

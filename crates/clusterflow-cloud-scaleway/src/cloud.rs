//! Collaborator contract between the Scaleway tasks and the cloud
//!
//! Tasks only need five primitives per resource kind (list, get, create,
//! update, delete) plus polling for a stable state. [`crate::ScwApi`] backs
//! them with the HTTP API, [`crate::MemoryCloud`] with an in-process store.

use async_trait::async_trait;
use clusterflow_cloud::{CloudError, Result, WaitConfig, wait_until};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Resource kinds the provider manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
    ServerAction,
    Volume,
    PrivateNic,
    PrivateNetwork,
    Gateway,
    GatewayNetwork,
    LoadBalancer,
    LbPrivateNetwork,
    DnsRecord,
    SshKey,
    Ip,
}

/// Status field a kind reports and which of its values are final
pub struct StatusSpec {
    pub field: &'static str,
    pub stable: &'static [&'static str],
    pub error: &'static [&'static str],
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::ServerAction => "server_action",
            ResourceKind::Volume => "volume",
            ResourceKind::PrivateNic => "private_nic",
            ResourceKind::PrivateNetwork => "private_network",
            ResourceKind::Gateway => "gateway",
            ResourceKind::GatewayNetwork => "gateway_network",
            ResourceKind::LoadBalancer => "lb",
            ResourceKind::LbPrivateNetwork => "lb_private_network",
            ResourceKind::DnsRecord => "dns_record",
            ResourceKind::SshKey => "ssh_key",
            ResourceKind::Ip => "ip",
        }
    }

    /// Field naming the parent for kinds nested under another resource.
    pub fn parent_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::ServerAction | ResourceKind::PrivateNic => Some("server_id"),
            ResourceKind::LbPrivateNetwork => Some("lb_id"),
            ResourceKind::DnsRecord => Some("dns_zone"),
            _ => None,
        }
    }

    /// Status reporting for kinds that transition asynchronously.
    pub fn status(&self) -> Option<StatusSpec> {
        let spec = match self {
            ResourceKind::Server => StatusSpec {
                field: "state",
                stable: &["running", "stopped", "stopped in place"],
                error: &["locked"],
            },
            ResourceKind::Volume => StatusSpec {
                field: "state",
                stable: &["available"],
                error: &["error"],
            },
            ResourceKind::PrivateNic => StatusSpec {
                field: "state",
                stable: &["available"],
                error: &["syncing_error"],
            },
            ResourceKind::Gateway => StatusSpec {
                field: "status",
                stable: &["running", "stopped"],
                error: &["failed"],
            },
            ResourceKind::GatewayNetwork => StatusSpec {
                field: "status",
                stable: &["ready"],
                error: &[],
            },
            ResourceKind::LoadBalancer => StatusSpec {
                field: "status",
                stable: &["ready"],
                error: &["error", "locked"],
            },
            ResourceKind::LbPrivateNetwork => StatusSpec {
                field: "status",
                stable: &["ready"],
                error: &["error"],
            },
            _ => return None,
        };
        Some(spec)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a single resource, with its parent for nested kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
    pub parent: Option<String>,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
        }
    }

    pub fn nested(parent: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: Some(parent.into()),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent, self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Filter for `list`. Every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub name: Option<String>,
    /// Tags the resource must all carry
    pub tags: Vec<String>,
    /// Parent resource for nested kinds
    pub parent: Option<String>,
    /// Exact matches on other attributes, sent as query parameters
    pub attributes: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether a stored resource satisfies the filter.
    pub fn matches(&self, kind: ResourceKind, resource: &CloudResource) -> bool {
        if let Some(name) = &self.name
            && resource.name() != Some(name.as_str())
        {
            return false;
        }
        let tags = resource.tags();
        if !self.tags.iter().all(|t| tags.contains(t)) {
            return false;
        }
        if let (Some(parent), Some(field)) = (&self.parent, kind.parent_field())
            && resource.str_attr(field) != Some(parent.as_str())
        {
            return false;
        }
        self.attributes
            .iter()
            .all(|(key, value)| resource.attr_string(key).as_deref() == Some(value.as_str()))
    }
}

/// A resource as the API returns it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudResource(pub Map<String, Value>);

impl CloudResource {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CloudError::ApiError(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.str_attr("id")
    }

    pub fn require_id(&self) -> Result<&str> {
        self.id()
            .ok_or_else(|| CloudError::ApiError("resource has no id".to_string()))
    }

    pub fn name(&self) -> Option<&str> {
        self.str_attr("name")
    }

    pub fn tags(&self) -> Vec<String> {
        self.attr("tags").unwrap_or_default()
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Typed read of an attribute; `None` when absent or of another shape.
    pub fn attr<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Attribute rendered as a string, for filtering on scalars.
    pub fn attr_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Address of this resource for `get`/`update`/`delete`.
    pub fn reference(&self, kind: ResourceKind) -> Result<ResourceRef> {
        let id = self.require_id()?.to_string();
        Ok(match kind.parent_field().and_then(|f| self.str_attr(f)) {
            Some(parent) => ResourceRef::nested(parent, id),
            None => ResourceRef::new(id),
        })
    }
}

/// Scaleway collaborator used by every task
#[async_trait]
pub trait ScwCloud: Send + Sync {
    /// Zone the cluster lives in
    fn zone(&self) -> &str;

    /// Region of [`ScwCloud::zone`]
    fn region(&self) -> &str;

    /// Every resource of `kind` matching `filter`, across all pages.
    async fn list(&self, kind: ResourceKind, filter: &ListFilter) -> Result<Vec<CloudResource>>;

    async fn get(&self, kind: ResourceKind, reference: &ResourceRef) -> Result<CloudResource>;

    async fn create(&self, kind: ResourceKind, body: Value) -> Result<CloudResource>;

    async fn update(
        &self,
        kind: ResourceKind,
        reference: &ResourceRef,
        body: Value,
    ) -> Result<CloudResource>;

    async fn delete(&self, kind: ResourceKind, reference: &ResourceRef) -> Result<()>;
}

/// Poll `get` until the resource reports one of its kind's stable statuses.
///
/// Kinds without a status are returned as soon as they can be read. An
/// error status fails the wait immediately.
pub async fn wait_for_stable<C: ScwCloud + ?Sized>(
    cloud: &C,
    kind: ResourceKind,
    reference: &ResourceRef,
    wait: &WaitConfig,
) -> Result<CloudResource> {
    let what = format!("{} {}", kind, reference);
    wait_until(wait, &what, || async {
        let resource = cloud.get(kind, reference).await?;
        let Some(status) = kind.status() else {
            return Ok(Some(resource));
        };
        let current = resource.str_attr(status.field).unwrap_or_default();
        if status.error.iter().any(|s| *s == current) {
            return Err(CloudError::ApiError(format!(
                "{} reached error status {}",
                what, current
            )));
        }
        if status.stable.iter().any(|s| *s == current) {
            Ok(Some(resource))
        } else {
            tracing::trace!(resource = %what, status = current, "Not stable yet");
            Ok(None)
        }
    })
    .await
}

/// Poll `get` until the resource is gone.
pub async fn wait_for_deletion<C: ScwCloud + ?Sized>(
    cloud: &C,
    kind: ResourceKind,
    reference: &ResourceRef,
    wait: &WaitConfig,
) -> Result<()> {
    let what = format!("deletion of {} {}", kind, reference);
    wait_until(wait, &what, || async {
        match cloud.get(kind, reference).await {
            Err(e) if e.is_not_found() => Ok(Some(())),
            Err(e) => Err(e),
            Ok(_) => Ok(None),
        }
    })
    .await
}

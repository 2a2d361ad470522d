//! Instance groups
//!
//! An instance group is a set of interchangeable servers named
//! `<group>-<slot>`. The task converges the number of servers; servers whose
//! commercial type or image no longer match are tagged
//! [`TAG_NEEDS_UPDATE`] for a rolling update instead of being replaced here.

use super::{GB, ScwContext};
use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_deletion, wait_for_stable};
use crate::tags::{
    TAG_NEEDS_UPDATE, cluster_name_from_tags, cluster_tag, has_tag, instance_group_tag,
    role_from_tags,
};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, Lifecycle, Resource, Result, TerraformTarget, WaitConfig,
    cannot_change, find_first_free_index, ordinal_name, ordinal_suffix, required_str, wait_until,
};
use serde::Serialize;
use serde_json::{Value, json};

const TF_TYPE: &str = "scaleway_instance_server";
const ROOT_VOLUME_TYPE: &str = "b_ssd";

/// Servers of one instance group, sorted by name.
pub async fn group_servers(
    cloud: &dyn ScwCloud,
    cluster: &str,
    group: &str,
) -> Result<Vec<CloudResource>> {
    let filter = ListFilter::new()
        .tag(cluster_tag(cluster))
        .tag(instance_group_tag(group));
    let mut servers = cloud.list(ResourceKind::Server, &filter).await?;
    servers.sort_by(|a, b| a.name().cmp(&b.name()));
    Ok(servers)
}

/// The Instance API returns the image as an object, create takes its id.
fn image_of(server: &CloudResource) -> Option<String> {
    server.attr_string("image").or_else(|| {
        server
            .attr::<Value>("image")
            .and_then(|image| image.get("id").and_then(Value::as_str).map(str::to_string))
    })
}

fn needs_update(server: &CloudResource) -> bool {
    has_tag(&server.tags(), TAG_NEEDS_UPDATE)
}

/// Wait until a server reports `running`. Fails on a locked server.
async fn wait_running(cloud: &dyn ScwCloud, id: &str, wait: &WaitConfig) -> Result<CloudResource> {
    let what = format!("server {} to start", id);
    let reference = ResourceRef::new(id);
    wait_until(wait, &what, || async {
        let server = cloud.get(ResourceKind::Server, &reference).await?;
        match server.str_attr("state") {
            Some("running") => Ok(Some(server)),
            Some("locked") => Err(CloudError::ApiError(format!("server {} is locked", id))),
            _ => Ok(None),
        }
    })
    .await
}

/// A group of identical servers
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    /// Instance group name, also the server name prefix
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub zone: Option<String>,
    pub count: u32,
    pub commercial_type: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub role: Option<String>,
    /// Root volume size, for commercial types without local storage
    pub volume_size_gb: Option<u64>,

    /// Ids of the group's servers after the run
    #[serde(skip)]
    pub server_ids: Vec<String>,
}

impl Instance {
    pub fn new(name: impl Into<String>, zone: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            zone: Some(zone.into()),
            count,
            commercial_type: None,
            image: None,
            tags: Vec::new(),
            role: None,
            volume_size_gb: None,
            server_ids: Vec::new(),
        }
    }

    pub fn cluster_name(&self) -> Result<&str> {
        cluster_name_from_tags(&self.tags).ok_or_else(|| {
            CloudError::InvalidConfig(format!("instance group {} has no cluster tag", self.name))
        })
    }

    /// Whether a server no longer matches the group's type or image.
    fn drifted(&self, server: &CloudResource) -> bool {
        let type_drift = self.commercial_type.is_some()
            && server.attr_string("commercial_type") != self.commercial_type;
        let image_drift = self.image.is_some() && image_of(server) != self.image;
        type_drift || image_drift
    }

    /// Tags a server carries: the group's tags plus its needs-update mark.
    fn server_tags(&self, server: &CloudResource) -> Vec<String> {
        let mut tags = self.tags.clone();
        if needs_update(server) {
            tags.push(TAG_NEEDS_UPDATE.to_string());
        }
        tags
    }

    async fn create_server(&self, ctx: &ScwContext, name: &str) -> Result<String> {
        let cloud = ctx.cloud();
        let mut body = json!({
            "name": name,
            "commercial_type": self.commercial_type,
            "image": self.image,
            "tags": self.tags,
            "dynamic_ip_required": false,
        });
        if let Some(size) = self.volume_size_gb {
            body["volumes"] = json!({
                "0": { "size": size * GB, "volume_type": ROOT_VOLUME_TYPE },
            });
        }

        let created = cloud.create(ResourceKind::Server, body).await?;
        let id = created.require_id()?.to_string();
        tracing::info!(group = %self.name, server = name, id = %id, "Created server");
        wait_for_stable(cloud, ResourceKind::Server, &ResourceRef::new(&id), ctx.wait_config())
            .await?;

        cloud
            .create(
                ResourceKind::ServerAction,
                json!({ "server_id": id, "action": "poweron" }),
            )
            .await?;
        wait_running(cloud, &id, ctx.wait_config()).await?;
        tracing::debug!(server = name, "Server is running");
        Ok(id)
    }

    async fn remove_server(&self, ctx: &ScwContext, server: &CloudResource) -> Result<()> {
        let cloud = ctx.cloud();
        let id = server.require_id()?;
        let reference = ResourceRef::new(id);
        if server.str_attr("state") == Some("running") {
            // Terminate also deletes the server's local volumes.
            cloud
                .create(
                    ResourceKind::ServerAction,
                    json!({ "server_id": id, "action": "terminate" }),
                )
                .await?;
        } else {
            cloud.delete(ResourceKind::Server, &reference).await?;
        }
        wait_for_deletion(cloud, ResourceKind::Server, &reference, ctx.wait_config()).await?;
        tracing::info!(group = %self.name, server = ?server.name(), id, "Removed server");
        Ok(())
    }
}

#[async_trait]
impl Resource for Instance {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "Instance";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn adopt_outputs(&mut self, actual: &Self) {
        self.server_ids = actual.server_ids.clone();
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let servers = group_servers(ctx.cloud(), self.cluster_name()?, &self.name).await?;
        let Some(first) = servers.first() else {
            return Ok(None);
        };

        // Servers already marked for a rolling update are not drift anymore.
        let drifted = servers
            .iter()
            .find(|s| !needs_update(s) && self.drifted(s));
        let (commercial_type, image) = match drifted {
            Some(server) => (server.attr_string("commercial_type"), image_of(server)),
            None => (self.commercial_type.clone(), self.image.clone()),
        };
        let tags: Vec<String> = first
            .tags()
            .into_iter()
            .filter(|t| t != TAG_NEEDS_UPDATE)
            .collect();

        Ok(Some(Instance {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            zone: first.str_attr("zone").map(str::to_string),
            count: servers.len() as u32,
            commercial_type,
            image,
            role: role_from_tags(&tags).map(str::to_string),
            tags,
            volume_size_gb: self.volume_size_gb,
            server_ids: servers
                .iter()
                .filter_map(|s| s.id().map(str::to_string))
                .collect(),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["name", "zone", "role"])?;
        if actual.is_none() {
            required_str(&self.zone, "zone")?;
            required_str(&self.commercial_type, "commercial_type")?;
            required_str(&self.image, "image")?;
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        _actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let mut servers = group_servers(cloud, self.cluster_name()?, &self.name).await?;

        if changes.contains("commercial_type") || changes.contains("image") {
            for server in servers.iter_mut().filter(|s| !needs_update(s) && self.drifted(s)) {
                let mut tags = server.tags();
                tags.push(TAG_NEEDS_UPDATE.to_string());
                let reference = server.reference(ResourceKind::Server)?;
                *server = cloud
                    .update(ResourceKind::Server, &reference, json!({ "tags": tags }))
                    .await?;
                tracing::info!(group = %self.name, server = ?server.name(), "Marked server for update");
            }
        }

        if changes.contains("tags") {
            for server in &mut servers {
                let tags = self.server_tags(server);
                if server.tags() == tags {
                    continue;
                }
                let reference = server.reference(ResourceKind::Server)?;
                *server = cloud
                    .update(ResourceKind::Server, &reference, json!({ "tags": tags }))
                    .await?;
            }
        }

        let wanted = self.count as usize;
        if servers.len() < wanted {
            let mut used: Vec<usize> = servers
                .iter()
                .filter_map(|s| s.name().and_then(|n| ordinal_suffix(n, &self.name)))
                .collect();
            for _ in servers.len()..wanted {
                let slot = find_first_free_index(&used);
                used.push(slot);
                self.create_server(ctx, &ordinal_name(&self.name, slot)).await?;
            }
        } else if servers.len() > wanted {
            // Servers waiting for an update go first, then the newest slots.
            let mut victims: Vec<&CloudResource> = servers.iter().collect();
            victims.sort_by_key(|s| {
                let slot = s.name().and_then(|n| ordinal_suffix(n, &self.name));
                (!needs_update(s), std::cmp::Reverse(slot))
            });
            for server in victims.into_iter().take(servers.len() - wanted) {
                self.remove_server(ctx, server).await?;
            }
        }

        self.server_ids = group_servers(cloud, self.cluster_name()?, &self.name)
            .await?
            .iter()
            .filter_map(|s| s.id().map(str::to_string))
            .collect();
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        for slot in 0..self.count as usize {
            let name = ordinal_name(&self.name, slot);
            let mut body = HclBody::new()
                .attr("name", name.as_str())
                .attr_opt("type", self.commercial_type.clone())
                .attr_opt("image", self.image.clone())
                .attr("tags", self.tags.clone())
                .attr_opt("zone", self.zone.clone());
            if let Some(size) = self.volume_size_gb {
                body = body.block(
                    "root_volume",
                    HclBody::new()
                        .attr("size_in_gb", size as i64)
                        .attr("volume_type", ROOT_VOLUME_TYPE),
                );
            }
            let id = target.render_resource(TF_TYPE, &name, body)?;
            target.append_output(&format!("{}_server_ids", self.name.replace('-', "_")), id)?;
        }
        Ok(())
    }
}

use super::{ScwContext, single};
use crate::cloud::{ListFilter, ResourceKind, ScwCloud};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, Lifecycle, Resource, Result, TerraformTarget, cannot_change,
    required_str,
};
use serde::Serialize;
use serde_json::json;

const TF_TYPE: &str = "scaleway_iam_ssh_key";

/// SSH public key registered in the project
#[derive(Debug, Clone, Serialize)]
pub struct SshKey {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub public_key: Option<String>,
}

impl SshKey {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            public_key: Some(public_key.into().trim().to_string()),
        }
    }
}

#[async_trait]
impl Resource for SshKey {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "SshKey";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let keys = ctx
            .cloud()
            .list(ResourceKind::SshKey, &ListFilter::new().name(&self.name))
            .await?;
        Ok(single("SSH key", &self.name, keys)?.map(|key| SshKey {
            id: key.id().map(str::to_string),
            public_key: key.str_attr("public_key").map(|k| k.trim().to_string()),
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["name", "id", "public_key"])?;
        if actual.is_none() {
            if self.name.is_empty() {
                return Err(CloudError::required("name"));
            }
            required_str(&self.public_key, "public_key")?;
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let created = ctx
            .cloud()
            .create(
                ResourceKind::SshKey,
                json!({ "name": self.name, "public_key": self.public_key }),
            )
            .await?;
        self.id = created.id().map(str::to_string);
        tracing::info!(name = %self.name, id = ?self.id, "Imported SSH key");
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            TF_TYPE,
            &self.name,
            HclBody::new()
                .attr("name", self.name.as_str())
                .attr_opt("public_key", self.public_key.clone()),
        )?;
        Ok(())
    }
}

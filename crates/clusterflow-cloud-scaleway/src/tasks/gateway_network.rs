use super::{Gateway, PrivateNetwork, ScwContext, single};
use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_stable};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, HclValue, Lifecycle, Resource, Result, TaskKey, TaskRef,
    TerraformTarget, cannot_change,
};
use serde::Serialize;
use serde_json::{Map, Value, json};

const TF_TYPE: &str = "scaleway_vpc_gateway_network";

/// Attachment of a public gateway to the cluster's private network
#[derive(Debug, Clone, Serialize)]
pub struct GatewayNetwork {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    #[serde(skip)]
    pub gateway: TaskRef<Gateway>,
    #[serde(skip)]
    pub private_network: TaskRef<PrivateNetwork>,
    pub enable_masquerade: Option<bool>,
    pub enable_dhcp: Option<bool>,
    pub push_default_route: Option<bool>,

    #[serde(skip)]
    gateway_id: Option<String>,
    #[serde(skip)]
    private_network_id: Option<String>,
    #[serde(skip)]
    tf_gateway_id: Option<HclValue>,
    #[serde(skip)]
    tf_private_network_id: Option<HclValue>,
}

impl GatewayNetwork {
    pub fn new(
        name: impl Into<String>,
        gateway: TaskRef<Gateway>,
        private_network: TaskRef<PrivateNetwork>,
    ) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            gateway,
            private_network,
            enable_masquerade: Some(true),
            enable_dhcp: Some(true),
            push_default_route: Some(true),
            gateway_id: None,
            private_network_id: None,
            tf_gateway_id: None,
            tf_private_network_id: None,
        }
    }

    fn from_cloud(&self, found: &CloudResource) -> Self {
        let ipam: Option<Map<String, Value>> = found.attr("ipam_config");
        Self {
            id: found.id().map(str::to_string),
            enable_masquerade: found.attr("enable_masquerade"),
            enable_dhcp: found.attr("enable_dhcp"),
            push_default_route: ipam
                .as_ref()
                .and_then(|c| c.get("push_default_route"))
                .and_then(Value::as_bool),
            gateway_id: found.str_attr("gateway_id").map(str::to_string),
            private_network_id: found.str_attr("private_network_id").map(str::to_string),
            ..self.clone()
        }
    }
}

#[async_trait]
impl Resource for GatewayNetwork {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "GatewayNetwork";

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

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.gateway.key(), self.private_network.key()]
    }

    async fn resolve(&mut self, ctx: &ScwContext) -> Result<()> {
        let gateway = ctx.resolve(&self.gateway).await?;
        let network = ctx.resolve(&self.private_network).await?;
        self.gateway_id = gateway.id.clone();
        self.private_network_id = network.id.clone();
        self.tf_gateway_id = Some(gateway.terraform_id().into());
        self.tf_private_network_id = Some(network.terraform_id());
        Ok(())
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        // Nothing can be attached to a gateway or network that does not
        // exist yet.
        let (Some(gateway_id), Some(network_id)) = (&self.gateway_id, &self.private_network_id)
        else {
            return Ok(None);
        };
        let filter = ListFilter::new()
            .attr("gateway_id", gateway_id)
            .attr("private_network_id", network_id);
        let found = ctx.cloud().list(ResourceKind::GatewayNetwork, &filter).await?;
        Ok(single("gateway network", &self.name, found)?.map(|gwn| self.from_cloud(&gwn)))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["id", "name"])
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let push_default_route = self.push_default_route.unwrap_or(true);

        let Some(actual) = actual else {
            let gateway_id = self
                .gateway_id
                .clone()
                .ok_or_else(|| CloudError::DependencyNotReady(self.gateway.key().to_string()))?;
            let network_id = self.private_network_id.clone().ok_or_else(|| {
                CloudError::DependencyNotReady(self.private_network.key().to_string())
            })?;
            let created = cloud
                .create(
                    ResourceKind::GatewayNetwork,
                    json!({
                        "gateway_id": gateway_id,
                        "private_network_id": network_id,
                        "enable_masquerade": self.enable_masquerade.unwrap_or(true),
                        "enable_dhcp": self.enable_dhcp.unwrap_or(true),
                        "ipam_config": { "push_default_route": push_default_route },
                    }),
                )
                .await?;
            let id = created.require_id()?.to_string();
            tracing::info!(name = %self.name, id = %id, "Attaching gateway to private network");
            self.id = Some(id.clone());
            wait_for_stable(
                cloud,
                ResourceKind::GatewayNetwork,
                &ResourceRef::new(id),
                ctx.wait_config(),
            )
            .await?;
            return Ok(());
        };

        let id = actual
            .id
            .as_deref()
            .ok_or_else(|| CloudError::required("id"))?;
        let mut body = Map::new();
        for field in ["enable_masquerade", "enable_dhcp"] {
            if let Some(value) = changes.get::<bool>(field) {
                body.insert(field.to_string(), Value::Bool(value));
            }
        }
        if changes.contains("push_default_route") {
            body.insert(
                "ipam_config".to_string(),
                json!({ "push_default_route": push_default_route }),
            );
        }
        cloud
            .update(ResourceKind::GatewayNetwork, &ResourceRef::new(id), Value::Object(body))
            .await?;
        wait_for_stable(
            cloud,
            ResourceKind::GatewayNetwork,
            &ResourceRef::new(id),
            ctx.wait_config(),
        )
        .await?;
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let body = HclBody::new()
            .attr_opt("gateway_id", self.tf_gateway_id.clone())
            .attr_opt("private_network_id", self.tf_private_network_id.clone())
            .attr("enable_masquerade", self.enable_masquerade.unwrap_or(true))
            .attr("enable_dhcp", self.enable_dhcp.unwrap_or(true))
            .block(
                "ipam_config",
                HclBody::new().attr("push_default_route", self.push_default_route.unwrap_or(true)),
            );
        target.render_resource(TF_TYPE, &self.name, body)?;
        Ok(())
    }
}

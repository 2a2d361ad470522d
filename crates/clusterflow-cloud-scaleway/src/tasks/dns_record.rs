use super::{LoadBalancer, ScwContext};
use crate::cloud::{ListFilter, ResourceKind, ResourceRef, ScwCloud};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, HclValue, Lifecycle, Literal, Resource, Result, TaskKey,
    TaskRef, TerraformTarget, cannot_change, required_str,
};
use serde::Serialize;
use serde_json::json;

pub const DEFAULT_TTL: u32 = 60;

const TF_TYPE: &str = "scaleway_domain_record";

/// Record in a Scaleway-managed DNS zone
#[derive(Debug, Clone, Serialize)]
pub struct DnsRecord {
    /// Record name relative to the zone
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub dns_zone: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub data: Option<String>,
    pub ttl: Option<u32>,

    /// Load balancer whose address the record points at
    #[serde(skip)]
    pub target: Option<TaskRef<LoadBalancer>>,
    #[serde(skip)]
    tf_data: Option<Literal>,
}

impl DnsRecord {
    pub fn new(name: impl Into<String>, dns_zone: impl Into<String>, record_type: &str) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            dns_zone: Some(dns_zone.into()),
            record_type: Some(record_type.to_string()),
            data: None,
            ttl: Some(DEFAULT_TTL),
            target: None,
            tf_data: None,
        }
    }

    pub fn pointing_at(mut self, lb: TaskRef<LoadBalancer>) -> Self {
        self.target = Some(lb);
        self
    }

    fn zone(&self) -> Result<&str> {
        self.dns_zone
            .as_deref()
            .ok_or_else(|| CloudError::required("dns_zone"))
    }

    fn record_body(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "type": self.record_type,
            "data": self.data,
            "ttl": self.ttl.unwrap_or(DEFAULT_TTL),
        })
    }
}

#[async_trait]
impl Resource for DnsRecord {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "DnsRecord";

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
        self.target.iter().map(TaskRef::key).collect()
    }

    async fn resolve(&mut self, ctx: &ScwContext) -> Result<()> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let lb = ctx.resolve(target).await?;
        if let Some(address) = lb.public_ips.first() {
            self.data = Some(address.clone());
        }
        self.tf_data = Some(lb.terraform_ip_address());
        Ok(())
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let zone = self.zone()?;
        let mut filter = ListFilter::new().parent(zone).name(&self.name);
        if let Some(record_type) = &self.record_type {
            filter = filter.attr("type", record_type);
        }
        let records = ctx.cloud().list(ResourceKind::DnsRecord, &filter).await?;
        if records.len() > 1 {
            tracing::warn!(name = %self.name, zone, count = records.len(), "Several DNS records match, using the first");
        }
        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(DnsRecord {
            id: record.id().map(str::to_string),
            record_type: record.attr_string("type"),
            data: record.attr_string("data"),
            ttl: record.attr("ttl"),
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return cannot_change(actual, changes, &["name", "dns_zone", "type"]);
        }
        if self.name.is_empty() {
            return Err(CloudError::required("name"));
        }
        required_str(&self.dns_zone, "dns_zone")?;
        required_str(&self.record_type, "type")?;
        if self.tf_data.is_none() {
            required_str(&self.data, "data")?;
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        required_str(&self.data, "data")?;
        let zone = self.zone()?.to_string();
        let cloud = ctx.cloud();

        match actual {
            None => {
                let mut body = self.record_body();
                body["dns_zone"] = json!(zone);
                let created = cloud.create(ResourceKind::DnsRecord, body).await?;
                tracing::info!(name = %self.name, zone = %zone, data = ?self.data, "Created DNS record");
                self.id = created.id().map(str::to_string);
            }
            Some(actual) => {
                if !(changes.contains("data") || changes.contains("ttl")) {
                    return Ok(());
                }
                let id = actual.id.as_deref().ok_or_else(|| CloudError::required("id"))?;
                cloud
                    .update(
                        ResourceKind::DnsRecord,
                        &ResourceRef::nested(&zone, id),
                        self.record_body(),
                    )
                    .await?;
                tracing::info!(name = %self.name, zone = %zone, data = ?self.data, "Updated DNS record");
            }
        }
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let data: Option<HclValue> = match (&self.tf_data, &self.data) {
            (Some(literal), _) => Some(literal.clone().into()),
            (None, Some(data)) => Some(data.into()),
            (None, None) => None,
        };
        target.render_resource(
            TF_TYPE,
            &self.name,
            HclBody::new()
                .attr("name", self.name.as_str())
                .attr_opt("dns_zone", self.dns_zone.clone())
                .attr_opt("type", self.record_type.clone())
                .attr_opt("data", data)
                .attr("ttl", self.ttl.unwrap_or(DEFAULT_TTL))
                .block(
                    "lifecycle",
                    HclBody::new().attr("ignore_changes", vec![Literal::expression("data")]),
                ),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::{Harness, document, memory_cloud, terraform};
    use clusterflow_cloud::{Target, TaskStatus};

    fn build(harness: &mut Harness) {
        let lb = harness.add(LoadBalancer::new("api.c.example.com", "fr-par-1", Vec::new()));
        harness.add(DnsRecord::new("api.c", "example.com", "A").pointing_at(lb));
    }

    #[tokio::test]
    async fn test_record_points_at_load_balancer() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        build(&mut harness);
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert!(report.is_success(), "{:?}", report.first_failure);

        let records = cloud.resources(ResourceKind::DnsRecord);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].str_attr("data"), Some("51.15.0.2"));
        assert_eq!(records[0].str_attr("dns_zone"), Some("example.com"));
        assert_eq!(records[0].attr::<u32>("ttl"), Some(DEFAULT_TTL));

        let mutations = cloud.mutation_count();
        let mut harness = Harness::new();
        build(&mut harness);
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("DnsRecord/api.c"), Some(TaskStatus::Unchanged));
        assert_eq!(cloud.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_stale_data_is_updated() {
        let cloud = memory_cloud();
        cloud
            .seed(
                ResourceKind::DnsRecord,
                json!({"name": "api", "dns_zone": "example.com", "type": "A", "data": "10.0.0.1", "ttl": 60}),
            )
            .unwrap();

        let mut harness = Harness::new();
        harness.add(DnsRecord {
            data: Some("51.15.9.9".into()),
            ..DnsRecord::new("api", "example.com", "A")
        });
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("DnsRecord/api"), Some(TaskStatus::Updated));
        assert_eq!(
            cloud.resources(ResourceKind::DnsRecord)[0].str_attr("data"),
            Some("51.15.9.9")
        );
    }

    #[test]
    fn test_data_required_without_terraform_reference() {
        let record = DnsRecord::new("api", "example.com", "A");
        let changes = Changes::between(None, &record).unwrap();
        assert!(matches!(
            record.check_changes(None, &changes),
            Err(CloudError::RequiredField(f)) if f == "data"
        ));
    }

    #[test]
    fn test_type_cannot_change() {
        let actual = DnsRecord {
            data: Some("1.2.3.4".into()),
            ..DnsRecord::new("api", "example.com", "A")
        };
        let expected = DnsRecord {
            data: Some("1.2.3.4".into()),
            ..DnsRecord::new("api", "example.com", "CNAME")
        };
        let changes = Changes::between(Some(&actual), &expected).unwrap();
        assert!(matches!(
            expected.check_changes(Some(&actual), &changes),
            Err(CloudError::ImmutableField(f)) if f == "type"
        ));
    }

    #[tokio::test]
    async fn test_terraform_ignores_data_drift() {
        let mut harness = Harness::new();
        build(&mut harness);
        let (ctx, report) = harness.run(memory_cloud(), terraform()).await;
        assert!(report.is_success(), "{:?}", report.first_failure);

        let doc = document(&ctx);
        assert!(doc.contains(
            "resource \"scaleway_domain_record\" \"api-c\" {\n  data     = scaleway_lb_ip.api-c-example-com.ip_address\n"
        ));
        assert!(doc.contains("  lifecycle {\n    ignore_changes = [data]\n  }\n"));
    }
}

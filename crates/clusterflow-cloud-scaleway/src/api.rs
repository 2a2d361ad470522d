//! Scaleway HTTP API client
//!
//! API documentation: <https://www.scaleway.com/en/developers/api/>

use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud};
use crate::error::{Result, ScwError};
use crate::tags::region_from_zone;
use async_trait::async_trait;
use clusterflow_cloud::{CloudError, RetryConfig, retry_transient};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Base URL of the public API
pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";

/// Default timeout for a single request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct ScwApiConfig {
    pub secret_key: String,
    pub project_id: String,
    pub zone: String,
    pub api_url: String,
    pub retry: RetryConfig,
}

impl ScwApiConfig {
    pub fn new(
        secret_key: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: secret_key.into(),
            project_id: project_id.into(),
            zone: zone.into(),
            api_url: DEFAULT_API_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

enum Locality {
    Zone,
    Region,
    Global,
}

/// Where a kind lives in the API
struct Endpoint {
    product: &'static str,
    locality: Locality,
    /// Collection path, `{parent}` is replaced for nested kinds
    collection: &'static str,
    list_key: &'static str,
    /// Key wrapping a single object, for products that wrap them
    single_key: Option<&'static str>,
}

fn endpoint(kind: ResourceKind) -> Endpoint {
    let (product, locality, collection, list_key, single_key) = match kind {
        ResourceKind::Server => ("instance/v1", Locality::Zone, "servers", "servers", Some("server")),
        ResourceKind::ServerAction => ("instance/v1", Locality::Zone, "servers/{parent}/action", "task", Some("task")),
        ResourceKind::Volume => ("instance/v1", Locality::Zone, "volumes", "volumes", Some("volume")),
        ResourceKind::PrivateNic => ("instance/v1", Locality::Zone, "servers/{parent}/private_nics", "private_nics", Some("private_nic")),
        ResourceKind::PrivateNetwork => ("vpc/v2", Locality::Region, "private-networks", "private_networks", None),
        ResourceKind::Gateway => ("vpc-gw/v1", Locality::Zone, "gateways", "gateways", None),
        ResourceKind::GatewayNetwork => ("vpc-gw/v1", Locality::Zone, "gateway-networks", "gateway_networks", None),
        ResourceKind::LoadBalancer => ("lb/v1", Locality::Zone, "lbs", "lbs", None),
        ResourceKind::LbPrivateNetwork => ("lb/v1", Locality::Zone, "lbs/{parent}/private-networks", "private_network", None),
        ResourceKind::DnsRecord => ("domain/v2beta1", Locality::Global, "dns-zones/{parent}/records", "records", None),
        ResourceKind::SshKey => ("iam/v1alpha1", Locality::Global, "ssh-keys", "ssh_keys", None),
        ResourceKind::Ip => ("ipam/v1", Locality::Region, "ips", "ips", None),
    };
    Endpoint {
        product,
        locality,
        collection,
        list_key,
        single_key,
    }
}

/// Field the project id is injected into on create, if the kind takes one.
fn project_field(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Server | ResourceKind::Volume => Some("project"),
        ResourceKind::PrivateNetwork
        | ResourceKind::Gateway
        | ResourceKind::LoadBalancer
        | ResourceKind::SshKey
        | ResourceKind::Ip => Some("project_id"),
        _ => None,
    }
}

struct Reply {
    body: Value,
    total_count: Option<u64>,
}

/// Live Scaleway client
#[derive(Clone)]
pub struct ScwApi {
    client: Client,
    config: ScwApiConfig,
    region: String,
}

impl ScwApi {
    pub fn new(config: ScwApiConfig) -> Result<Self> {
        let region = region_from_zone(&config.zone)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("clusterflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config,
            region,
        })
    }

    fn collection_url(&self, kind: ResourceKind, parent: Option<&str>) -> Result<String> {
        let ep = endpoint(kind);
        let locality = match ep.locality {
            Locality::Zone => format!("/zones/{}", self.config.zone),
            Locality::Region => format!("/regions/{}", self.region),
            Locality::Global => String::new(),
        };
        let collection = if ep.collection.contains("{parent}") {
            let parent = parent.ok_or_else(|| {
                ScwError::InvalidResponse(format!("{} requires a parent resource", kind))
            })?;
            ep.collection.replace("{parent}", parent)
        } else {
            ep.collection.to_string()
        };
        Ok(format!(
            "{}/{}{}/{}",
            self.config.api_url, ep.product, locality, collection
        ))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Reply> {
        debug!(%method, url, "Scaleway API request");
        let mut request = self
            .client
            .request(method, url)
            .header("X-Auth-Token", &self.config.secret_key)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Parse a response, mapping non-success statuses to [`ScwError::Api`].
    async fn handle_response(response: reqwest::Response) -> Result<Reply> {
        let status = response.status();
        let total_count = response
            .headers()
            .get("x-total-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let text = response.text().await?;

        if status.is_success() {
            if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
                return Ok(Reply {
                    body: Value::Null,
                    total_count,
                });
            }
            let body = serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ScwError::Json(e)
            })?;
            Ok(Reply { body, total_count })
        } else {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            Err(ScwError::api(status, message))
        }
    }

    /// Send with retries on transient failures.
    async fn call(
        &self,
        what: &str,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> clusterflow_cloud::Result<Reply> {
        retry_transient(&self.config.retry, what, || {
            let method = method.clone();
            async move {
                self.send(method, url, query, body)
                    .await
                    .map_err(CloudError::from)
            }
        })
        .await
    }

    /// Unwrap a single object and fill in the fields the API leaves out.
    fn normalize(kind: ResourceKind, parent: Option<&str>, body: Value) -> clusterflow_cloud::Result<CloudResource> {
        let value = match endpoint(kind).single_key {
            Some(key) => match body {
                Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
                other => other,
            },
            None => body,
        };
        let mut resource = CloudResource::from_value(value)?;
        if let (Some(field), Some(parent)) = (kind.parent_field(), parent)
            && resource.str_attr(field).is_none()
        {
            resource.set(field, parent);
        }
        if kind == ResourceKind::LbPrivateNetwork
            && resource.id().is_none()
            && let Some(pn) = resource
                .0
                .get("private_network_id")
                .cloned()
                .or_else(|| resource.0.get("private_network").and_then(|p| p.get("id")).cloned())
        {
            resource.set("id", pn);
        }
        Ok(resource)
    }

    fn filter_query(filter: &ListFilter) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(name) = &filter.name {
            query.push(("name".to_string(), name.clone()));
        }
        if !filter.tags.is_empty() {
            query.push(("tags".to_string(), filter.tags.join(",")));
        }
        for (key, value) in &filter.attributes {
            query.push((key.clone(), value.clone()));
        }
        query
    }

    /// Apply one change to a DNS zone through its change-set endpoint.
    async fn patch_records(&self, zone: &str, change: Value) -> clusterflow_cloud::Result<Vec<Value>> {
        let url = self.collection_url(ResourceKind::DnsRecord, Some(zone))?;
        let body = json!({ "changes": [change], "return_all_records": false });
        let reply = self
            .call("patch dns records", Method::PATCH, &url, &[], Some(&body))
            .await?;
        Ok(reply
            .body
            .get("records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn parent_of(kind: ResourceKind, body: &Value) -> clusterflow_cloud::Result<Option<String>> {
        match kind.parent_field() {
            Some(field) => body
                .get(field)
                .and_then(Value::as_str)
                .map(|p| Some(p.to_string()))
                .ok_or_else(|| CloudError::required(field)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ScwCloud for ScwApi {
    fn zone(&self) -> &str {
        &self.config.zone
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn list(&self, kind: ResourceKind, filter: &ListFilter) -> clusterflow_cloud::Result<Vec<CloudResource>> {
        if kind == ResourceKind::ServerAction {
            return Err(ScwError::Unsupported {
                kind: kind.as_str(),
                operation: "list",
            }
            .into());
        }
        let ep = endpoint(kind);
        let url = self.collection_url(kind, filter.parent.as_deref())?;
        let page_size_param = if ep.product.starts_with("instance") {
            "per_page"
        } else {
            "page_size"
        };
        let base_query = Self::filter_query(filter);
        let what = format!("list {}", kind);

        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query = base_query.clone();
            query.push(("page".to_string(), page.to_string()));
            query.push((page_size_param.to_string(), PAGE_SIZE.to_string()));

            let reply = self.call(&what, Method::GET, &url, &query, None).await?;
            let batch = match reply.body.get(ep.list_key) {
                Some(Value::Array(batch)) => batch.clone(),
                _ => {
                    return Err(ScwError::InvalidResponse(format!(
                        "{} response has no {} array",
                        what, ep.list_key
                    ))
                    .into());
                }
            };
            let total = reply
                .body
                .get("total_count")
                .and_then(Value::as_u64)
                .or(reply.total_count);
            let received = batch.len();
            for item in batch {
                items.push(Self::normalize(kind, filter.parent.as_deref(), item)?);
            }

            let done = match total {
                Some(total) => items.len() as u64 >= total,
                None => received < PAGE_SIZE as usize,
            };
            if done || received == 0 {
                break;
            }
            page += 1;
        }

        // The API matches names by prefix, the contract is exact.
        items.retain(|r| filter.matches(kind, r));
        debug!(kind = %kind, count = items.len(), "Listed resources");
        Ok(items)
    }

    async fn get(&self, kind: ResourceKind, reference: &ResourceRef) -> clusterflow_cloud::Result<CloudResource> {
        match kind {
            ResourceKind::DnsRecord | ResourceKind::LbPrivateNetwork => {
                let parent = reference.parent.clone().unwrap_or_default();
                let filter = ListFilter::new().parent(parent);
                let found = self
                    .list(kind, &filter)
                    .await?
                    .into_iter()
                    .find(|r| r.id() == Some(reference.id.as_str()));
                found.ok_or_else(|| CloudError::NotFound(format!("{} {}", kind, reference)))
            }
            ResourceKind::ServerAction => Err(ScwError::Unsupported {
                kind: kind.as_str(),
                operation: "get",
            }
            .into()),
            _ => {
                let url = format!(
                    "{}/{}",
                    self.collection_url(kind, reference.parent.as_deref())?,
                    reference.id
                );
                let reply = self
                    .call(&format!("get {}", kind), Method::GET, &url, &[], None)
                    .await?;
                Self::normalize(kind, reference.parent.as_deref(), reply.body)
            }
        }
    }

    async fn create(&self, kind: ResourceKind, mut body: Value) -> clusterflow_cloud::Result<CloudResource> {
        if let (Some(field), Value::Object(map)) = (project_field(kind), &mut body)
            && !map.contains_key(field)
        {
            map.insert(field.to_string(), Value::String(self.config.project_id.clone()));
        }
        let parent = Self::parent_of(kind, &body)?;
        if let (Some(field), Value::Object(map)) = (kind.parent_field(), &mut body) {
            map.remove(field);
        }
        let what = format!("create {}", kind);

        match kind {
            ResourceKind::DnsRecord => {
                let zone = parent.unwrap_or_default();
                let created = self
                    .patch_records(&zone, json!({ "add": { "records": [body] } }))
                    .await?;
                let first = created.into_iter().next().ok_or_else(|| {
                    CloudError::ApiError(format!("{} returned no record", what))
                })?;
                Self::normalize(kind, Some(&zone), first)
            }
            ResourceKind::LbPrivateNetwork => {
                let lb = parent.unwrap_or_default();
                let url = format!(
                    "{}/{}/attach-private-network",
                    self.collection_url(ResourceKind::LoadBalancer, None)?,
                    lb
                );
                let reply = self.call(&what, Method::POST, &url, &[], Some(&body)).await?;
                Self::normalize(kind, Some(&lb), reply.body)
            }
            _ => {
                let url = self.collection_url(kind, parent.as_deref())?;
                let reply = self.call(&what, Method::POST, &url, &[], Some(&body)).await?;
                Self::normalize(kind, parent.as_deref(), reply.body)
            }
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        reference: &ResourceRef,
        body: Value,
    ) -> clusterflow_cloud::Result<CloudResource> {
        match kind {
            ResourceKind::DnsRecord => {
                let zone = reference.parent.clone().unwrap_or_default();
                let updated = self
                    .patch_records(
                        &zone,
                        json!({ "set": { "id": reference.id, "records": [body] } }),
                    )
                    .await?;
                let first = updated.into_iter().next().ok_or_else(|| {
                    CloudError::ApiError(format!("update of {} returned no record", reference))
                })?;
                Self::normalize(kind, Some(&zone), first)
            }
            ResourceKind::ServerAction | ResourceKind::LbPrivateNetwork => Err(ScwError::Unsupported {
                kind: kind.as_str(),
                operation: "update",
            }
            .into()),
            _ => {
                let url = format!(
                    "{}/{}",
                    self.collection_url(kind, reference.parent.as_deref())?,
                    reference.id
                );
                let reply = self
                    .call(&format!("update {}", kind), Method::PATCH, &url, &[], Some(&body))
                    .await?;
                Self::normalize(kind, reference.parent.as_deref(), reply.body)
            }
        }
    }

    async fn delete(&self, kind: ResourceKind, reference: &ResourceRef) -> clusterflow_cloud::Result<()> {
        let what = format!("delete {}", kind);
        match kind {
            ResourceKind::DnsRecord => {
                let zone = reference.parent.clone().unwrap_or_default();
                self.patch_records(&zone, json!({ "delete": { "id": reference.id } }))
                    .await?;
            }
            ResourceKind::LbPrivateNetwork => {
                let lb = reference.parent.clone().unwrap_or_default();
                let url = format!(
                    "{}/{}/detach-private-network",
                    self.collection_url(ResourceKind::LoadBalancer, None)?,
                    lb
                );
                let body = json!({ "private_network_id": reference.id });
                self.call(&what, Method::POST, &url, &[], Some(&body)).await?;
            }
            ResourceKind::ServerAction => {
                return Err(ScwError::Unsupported {
                    kind: kind.as_str(),
                    operation: "delete",
                }
                .into());
            }
            _ => {
                let url = format!(
                    "{}/{}",
                    self.collection_url(kind, reference.parent.as_deref())?,
                    reference.id
                );
                let query: Vec<(String, String)> = match kind {
                    ResourceKind::LoadBalancer => vec![("release_ip".into(), "true".into())],
                    ResourceKind::Gateway => vec![("cleanup_dhcp".into(), "true".into())],
                    _ => Vec::new(),
                };
                self.call(&what, Method::DELETE, &url, &query, None).await?;
            }
        }
        Ok(())
    }
}

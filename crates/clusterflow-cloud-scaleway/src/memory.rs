//! In-process Scaleway cloud
//!
//! Behaves like the API closely enough for the tasks: deterministic ids,
//! filtered listing, resources that take a few polls to settle, IPAM
//! addresses handed out when NICs and load balancers join a private
//! network. Used for offline planning and by the tests, which can also
//! inject failures per kind and operation.

use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud};
use crate::error::Result as ScwResult;
use crate::tags::region_from_zone;
use async_trait::async_trait;
use clusterflow_cloud::{CloudError, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

/// A create, update or delete the cloud accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub operation: Operation,
    pub kind: ResourceKind,
    pub id: String,
}

/// Error an injected failure raises
#[derive(Debug, Clone)]
pub enum Failure {
    NotFound,
    PermissionDenied,
    Transient,
    Api(String),
}

impl Failure {
    fn to_error(&self, what: &str) -> CloudError {
        match self {
            Failure::NotFound => CloudError::NotFound(what.to_string()),
            Failure::PermissionDenied => CloudError::PermissionDenied(what.to_string()),
            Failure::Transient => CloudError::Transient(what.to_string()),
            Failure::Api(message) => CloudError::ApiError(format!("{}: {}", what, message)),
        }
    }
}

struct Injected {
    kind: ResourceKind,
    operation: Operation,
    failure: Failure,
    /// `None` fails forever
    remaining: Option<u32>,
}

struct Stored {
    resource: CloudResource,
    polls_left: u32,
    settled: Option<String>,
}

#[derive(Default)]
struct Store {
    resources: BTreeMap<ResourceKind, BTreeMap<String, Stored>>,
    counters: BTreeMap<ResourceKind, u64>,
    mutations: Vec<Mutation>,
    failures: Vec<Injected>,
    next_private_ip: u32,
    next_public_ip: u32,
}

impl Store {
    fn next_id(&mut self, kind: ResourceKind) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        format!("{}-{:04}", id_prefix(kind), counter)
    }

    fn private_ip(&mut self) -> String {
        self.next_private_ip += 1;
        format!("172.16.{}.{}", self.next_private_ip / 250, self.next_private_ip % 250 + 2)
    }

    fn public_ip(&mut self) -> String {
        self.next_public_ip += 1;
        format!("51.15.{}.{}", self.next_public_ip / 250, self.next_public_ip % 250 + 1)
    }

    fn check_failure(&mut self, kind: ResourceKind, operation: Operation, what: &str) -> Result<()> {
        let Some(pos) = self
            .failures
            .iter()
            .position(|f| f.kind == kind && f.operation == operation)
        else {
            return Ok(());
        };
        let error = self.failures[pos].failure.to_error(what);
        match self.failures[pos].remaining {
            Some(n) if n <= 1 => {
                self.failures.remove(pos);
            }
            Some(n) => self.failures[pos].remaining = Some(n - 1),
            None => {}
        }
        Err(error)
    }

    fn table(&mut self, kind: ResourceKind) -> &mut BTreeMap<String, Stored> {
        self.resources.entry(kind).or_default()
    }

    fn insert(&mut self, kind: ResourceKind, resource: CloudResource, settle_polls: u32) {
        let mut resource = resource;
        let mut settled = None;
        let mut polls_left = 0;
        if let Some(status) = kind.status() {
            let target = resource
                .str_attr(status.field)
                .map(str::to_string)
                .unwrap_or_else(|| settled_status(kind).to_string());
            if settle_polls > 0 {
                resource.set(status.field, pending_status(kind));
                settled = Some(target);
                polls_left = settle_polls;
            } else {
                resource.set(status.field, target);
            }
        }
        let id = resource.id().unwrap_or_default().to_string();
        self.table(kind).insert(
            id,
            Stored {
                resource,
                polls_left,
                settled,
            },
        );
    }

    fn record(&mut self, operation: Operation, kind: ResourceKind, id: &str) {
        self.mutations.push(Mutation {
            operation,
            kind,
            id: id.to_string(),
        });
    }

    fn allocate_private_ip(&mut self, resource_id: &str, resource_type: &str, private_network_id: &str) {
        let id = self.next_id(ResourceKind::Ip);
        let address = self.private_ip();
        let ip = json!({
            "id": id,
            "address": address,
            "resource_id": resource_id,
            "resource_type": resource_type,
            "private_network_id": private_network_id,
        });
        if let Value::Object(map) = ip {
            self.insert(ResourceKind::Ip, CloudResource(map), 0);
        }
    }

    fn release_ips_of(&mut self, resource_id: &str) {
        self.table(ResourceKind::Ip)
            .retain(|_, ip| ip.resource.str_attr("resource_id") != Some(resource_id));
    }

    /// Remove a resource and whatever only exists through it.
    fn remove(&mut self, kind: ResourceKind, id: &str) -> Option<CloudResource> {
        let removed = self.table(kind).remove(id)?.resource;
        match kind {
            ResourceKind::Server => {
                let nics: Vec<String> = self
                    .table(ResourceKind::PrivateNic)
                    .values()
                    .filter(|n| n.resource.str_attr("server_id") == Some(id))
                    .filter_map(|n| n.resource.id().map(str::to_string))
                    .collect();
                for nic in nics {
                    self.remove(ResourceKind::PrivateNic, &nic);
                }
            }
            ResourceKind::PrivateNic => {
                self.release_ips_of(id);
                if let Some(server_id) = removed.str_attr("server_id")
                    && let Some(server) = self.table(ResourceKind::Server).get_mut(server_id)
                {
                    let nics: Vec<Value> = server
                        .resource
                        .attr::<Vec<Value>>("private_nics")
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|n| n.get("id").and_then(Value::as_str) != Some(id))
                        .collect();
                    server.resource.set("private_nics", nics);
                }
            }
            ResourceKind::LoadBalancer => {
                self.table(ResourceKind::LbPrivateNetwork)
                    .retain(|_, a| a.resource.str_attr("lb_id") != Some(id));
                self.release_ips_of(id);
            }
            ResourceKind::LbPrivateNetwork => {
                if let Some(lb) = removed.str_attr("lb_id") {
                    let lb = lb.to_string();
                    self.table(ResourceKind::Ip).retain(|_, ip| {
                        !(ip.resource.str_attr("resource_id") == Some(lb.as_str())
                            && ip.resource.str_attr("private_network_id") == Some(id))
                    });
                }
            }
            _ => {}
        }
        Some(removed)
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Server => "srv",
        ResourceKind::ServerAction => "task",
        ResourceKind::Volume => "vol",
        ResourceKind::PrivateNic => "pnic",
        ResourceKind::PrivateNetwork => "pn",
        ResourceKind::Gateway => "gw",
        ResourceKind::GatewayNetwork => "gwn",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::LbPrivateNetwork => "lbpn",
        ResourceKind::DnsRecord => "rec",
        ResourceKind::SshKey => "key",
        ResourceKind::Ip => "ip",
    }
}

/// Status a freshly created resource settles in.
fn settled_status(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Server => "stopped",
        ResourceKind::Volume | ResourceKind::PrivateNic => "available",
        ResourceKind::Gateway => "running",
        _ => "ready",
    }
}

fn pending_status(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Server => "starting",
        ResourceKind::Volume => "creating",
        ResourceKind::PrivateNic => "syncing",
        ResourceKind::GatewayNetwork => "configuring",
        _ => "pending",
    }
}

/// In-memory [`ScwCloud`]
pub struct MemoryCloud {
    zone: String,
    region: String,
    settle_polls: u32,
    store: Mutex<Store>,
}

impl MemoryCloud {
    pub fn new(zone: &str) -> ScwResult<Self> {
        Ok(Self {
            zone: zone.to_string(),
            region: region_from_zone(zone)?,
            settle_polls: 0,
            store: Mutex::new(Store::default()),
        })
    }

    /// Resources report a pending status for `polls` reads after a change.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every `operation` on `kind` from now on.
    pub fn fail(&self, kind: ResourceKind, operation: Operation, failure: Failure) {
        self.inject(kind, operation, failure, None);
    }

    /// Fail the next `times` calls of `operation` on `kind`.
    pub fn fail_times(&self, kind: ResourceKind, operation: Operation, failure: Failure, times: u32) {
        if times > 0 {
            self.inject(kind, operation, failure, Some(times));
        }
    }

    fn inject(&self, kind: ResourceKind, operation: Operation, failure: Failure, remaining: Option<u32>) {
        self.store().failures.push(Injected {
            kind,
            operation,
            failure,
            remaining,
        });
    }

    pub fn clear_failures(&self) {
        self.store().failures.clear();
    }

    /// Add an existing resource without recording a mutation.
    pub fn seed(&self, kind: ResourceKind, value: Value) -> Result<CloudResource> {
        let mut resource = CloudResource::from_value(value)?;
        let mut store = self.store();
        if resource.id().is_none() {
            let id = store.next_id(kind);
            resource.set("id", id);
        }
        store.insert(kind, resource.clone(), 0);
        Ok(resource)
    }

    pub fn resources(&self, kind: ResourceKind) -> Vec<CloudResource> {
        self.store()
            .resources
            .get(&kind)
            .map(|t| t.values().map(|s| s.resource.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of resources across all kinds
    pub fn resource_count(&self) -> usize {
        self.store().resources.values().map(BTreeMap::len).sum()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.store().mutations.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.store().mutations.len()
    }

    fn create_server_action(&self, store: &mut Store, resource: &CloudResource) -> Result<CloudResource> {
        let server_id = resource
            .str_attr("server_id")
            .ok_or_else(|| CloudError::required("server_id"))?
            .to_string();
        let action = resource.str_attr("action").unwrap_or_default().to_string();
        if !store.table(ResourceKind::Server).contains_key(&server_id) {
            return Err(CloudError::NotFound(format!("server {}", server_id)));
        }
        match action.as_str() {
            "poweron" | "poweroff" | "reboot" => {
                let state = if action == "poweroff" { "stopped" } else { "running" };
                let settle_polls = self.settle_polls;
                if let Some(server) = store.table(ResourceKind::Server).get_mut(&server_id) {
                    if settle_polls > 0 {
                        server.resource.set("state", pending_status(ResourceKind::Server));
                        server.settled = Some(state.to_string());
                        server.polls_left = settle_polls;
                    } else {
                        server.resource.set("state", state);
                    }
                }
            }
            "terminate" => {
                store.remove(ResourceKind::Server, &server_id);
            }
            other => {
                return Err(CloudError::ApiError(format!("unknown server action {}", other)));
            }
        }
        let id = store.next_id(ResourceKind::ServerAction);
        store.record(Operation::Create, ResourceKind::ServerAction, &id);
        CloudResource::from_value(json!({
            "id": id,
            "server_id": server_id,
            "description": action,
            "status": "success",
        }))
    }
}

#[async_trait]
impl ScwCloud for MemoryCloud {
    fn zone(&self) -> &str {
        &self.zone
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn list(&self, kind: ResourceKind, filter: &ListFilter) -> Result<Vec<CloudResource>> {
        let mut store = self.store();
        store.check_failure(kind, Operation::List, &format!("list {}", kind))?;
        Ok(store
            .table(kind)
            .values()
            .filter(|s| filter.matches(kind, &s.resource))
            .map(|s| s.resource.clone())
            .collect())
    }

    async fn get(&self, kind: ResourceKind, reference: &ResourceRef) -> Result<CloudResource> {
        let mut store = self.store();
        let what = format!("{} {}", kind, reference);
        store.check_failure(kind, Operation::Get, &what)?;
        let stored = store
            .table(kind)
            .get_mut(&reference.id)
            .ok_or_else(|| CloudError::NotFound(what))?;
        if stored.polls_left > 0 {
            stored.polls_left -= 1;
            if stored.polls_left == 0
                && let (Some(settled), Some(status)) = (stored.settled.take(), kind.status())
            {
                stored.resource.set(status.field, settled);
            }
        }
        Ok(stored.resource.clone())
    }

    async fn create(&self, kind: ResourceKind, body: Value) -> Result<CloudResource> {
        let mut store = self.store();
        store.check_failure(kind, Operation::Create, &format!("create {}", kind))?;
        let mut resource = CloudResource::from_value(body)?;

        if kind == ResourceKind::ServerAction {
            return self.create_server_action(&mut store, &resource);
        }

        let id = match kind {
            ResourceKind::LbPrivateNetwork => resource
                .str_attr("private_network_id")
                .ok_or_else(|| CloudError::required("private_network_id"))?
                .to_string(),
            _ => store.next_id(kind),
        };
        resource.set("id", id.clone());

        match kind {
            ResourceKind::Server => {
                resource.set("zone", self.zone.clone());
                resource.set("private_nics", Value::Array(Vec::new()));
            }
            ResourceKind::PrivateNic => {
                let server_id = resource
                    .str_attr("server_id")
                    .ok_or_else(|| CloudError::required("server_id"))?
                    .to_string();
                let pn = resource
                    .str_attr("private_network_id")
                    .unwrap_or_default()
                    .to_string();
                let server = store
                    .table(ResourceKind::Server)
                    .get_mut(&server_id)
                    .ok_or_else(|| CloudError::NotFound(format!("server {}", server_id)))?;
                let mut nics: Vec<Value> = server.resource.attr("private_nics").unwrap_or_default();
                nics.push(json!({ "id": id, "private_network_id": pn }));
                server.resource.set("private_nics", nics);
                store.allocate_private_ip(&id, "instance_private_nic", &pn);
            }
            ResourceKind::LoadBalancer => {
                let ip_id = store.next_id(ResourceKind::Ip);
                let address = store.public_ip();
                resource.set("ip", json!([{ "id": ip_id, "ip_address": address }]));
                resource.set("zone", self.zone.clone());
            }
            ResourceKind::LbPrivateNetwork => {
                let lb = resource
                    .str_attr("lb_id")
                    .ok_or_else(|| CloudError::required("lb_id"))?
                    .to_string();
                if !store.table(ResourceKind::LoadBalancer).contains_key(&lb) {
                    return Err(CloudError::NotFound(format!("lb {}", lb)));
                }
                store.allocate_private_ip(&lb, "lb_server", &id);
            }
            ResourceKind::Gateway => {
                let ip_id = store.next_id(ResourceKind::Ip);
                let address = store.public_ip();
                resource.set("ip", json!({ "id": ip_id, "address": address }));
                resource.set("zone", self.zone.clone());
            }
            ResourceKind::Volume | ResourceKind::GatewayNetwork => {
                resource.set("zone", self.zone.clone());
            }
            ResourceKind::PrivateNetwork => {
                resource.set("region", self.region.clone());
            }
            _ => {}
        }

        store.insert(kind, resource, self.settle_polls);
        store.record(Operation::Create, kind, &id);
        tracing::debug!(kind = %kind, id = %id, "Created in-memory resource");
        store
            .table(kind)
            .get(&id)
            .map(|s| s.resource.clone())
            .ok_or_else(|| CloudError::NotFound(format!("{} {}", kind, id)))
    }

    async fn update(&self, kind: ResourceKind, reference: &ResourceRef, body: Value) -> Result<CloudResource> {
        let mut store = self.store();
        let what = format!("{} {}", kind, reference);
        store.check_failure(kind, Operation::Update, &what)?;
        let Value::Object(fields) = body else {
            return Err(CloudError::ApiError(format!("update of {} needs an object", what)));
        };
        let stored = store
            .table(kind)
            .get_mut(&reference.id)
            .ok_or_else(|| CloudError::NotFound(what))?;
        for (key, value) in fields {
            stored.resource.0.insert(key, value);
        }
        let updated = stored.resource.clone();
        store.record(Operation::Update, kind, &reference.id);
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, reference: &ResourceRef) -> Result<()> {
        let mut store = self.store();
        let what = format!("{} {}", kind, reference);
        store.check_failure(kind, Operation::Delete, &what)?;
        store
            .remove(kind, &reference.id)
            .ok_or_else(|| CloudError::NotFound(what))?;
        store.record(Operation::Delete, kind, &reference.id);
        Ok(())
    }
}

use crate::error::{Result, ScwError};
use crate::tags::{ROLE_CONTROL_PLANE, ROLE_WORKER, region_from_zone};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Suffix of clusters discovered through gossip, which get no DNS records.
pub const GOSSIP_SUFFIX: &str = ".k8s.local";

/// Description of a cluster on Scaleway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Fully qualified cluster name, e.g. `demo.example.com`
    pub name: String,
    pub zone: String,
    /// Zone the API record lives in. Defaults to the cluster name minus its
    /// first label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,
    /// Existing private network to join instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroupSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    ControlPlane,
    Node,
}

impl GroupRole {
    /// Value of the role tag.
    pub fn tag_value(self) -> &'static str {
        match self {
            GroupRole::ControlPlane => ROLE_CONTROL_PLANE,
            GroupRole::Node => ROLE_WORKER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    pub name: String,
    pub role: GroupRole,
    pub machine_type: String,
    pub image: String,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

fn default_min_size() -> u32 {
    1
}

impl InstanceGroupSpec {
    pub fn zone_in<'a>(&'a self, cluster: &'a ClusterSpec) -> &'a str {
        self.zone.as_deref().unwrap_or(&cluster.zone)
    }

    pub fn is_control_plane(&self) -> bool {
        self.role == GroupRole::ControlPlane
    }
}

impl ClusterSpec {
    /// Read and validate a cluster description from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let spec = Self::from_yaml_str(&content)?;
        tracing::debug!(path = %path.display(), cluster = %spec.name, "Loaded cluster spec");
        Ok(spec)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let spec: ClusterSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("cluster name is empty"));
        }
        region_from_zone(&self.zone)?;

        if !self.is_gossip() {
            match &self.dns_zone {
                Some(zone) if !self.name.ends_with(&format!(".{}", zone)) && &self.name != zone => {
                    return Err(invalid(format!(
                        "cluster {} is not inside DNS zone {}",
                        self.name, zone
                    )));
                }
                None if !self.name.contains('.') => {
                    return Err(invalid(format!(
                        "cluster {} needs a DNS name or the {} suffix",
                        self.name, GOSSIP_SUFFIX
                    )));
                }
                _ => {}
            }
        }

        if self.instance_groups.is_empty() {
            return Err(invalid(format!("cluster {} has no instance groups", self.name)));
        }
        let mut seen = HashSet::new();
        for group in &self.instance_groups {
            if group.name.is_empty() {
                return Err(invalid("instance group name is empty"));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(invalid(format!("duplicate instance group {}", group.name)));
            }
            if group.machine_type.is_empty() || group.image.is_empty() {
                return Err(invalid(format!(
                    "instance group {} needs a machine type and an image",
                    group.name
                )));
            }
            let zone = group.zone_in(self);
            if zone != self.zone {
                return Err(invalid(format!(
                    "instance group {} is in {} but cluster {} is in {}: all instance groups must share one zone",
                    group.name, zone, self.name, self.zone
                )));
            }
        }
        Ok(())
    }

    pub fn is_gossip(&self) -> bool {
        self.name.ends_with(GOSSIP_SUFFIX)
    }

    pub fn control_plane_groups(&self) -> impl Iterator<Item = &InstanceGroupSpec> {
        self.instance_groups.iter().filter(|g| g.is_control_plane())
    }

    /// Name of the API record relative to its zone, and the zone.
    ///
    /// `None` for gossip clusters.
    pub fn api_record(&self) -> Option<(String, String)> {
        if self.is_gossip() {
            return None;
        }
        let zone = match &self.dns_zone {
            Some(zone) => zone.clone(),
            None => self.name.split_once('.')?.1.to_string(),
        };
        let fqdn = format!("api.{}", self.name);
        let record = fqdn
            .strip_suffix(&format!(".{}", zone))
            .unwrap_or(&fqdn)
            .to_string();
        Some((record, zone))
    }
}

fn invalid(message: impl Into<String>) -> ScwError {
    ScwError::InvalidSpec(message.into())
}

//! Tag conventions shared by every resource a cluster owns
//!
//! Scaleway tags are flat strings, so key/value pairs are written as
//! `key=value`. The `noprefix=` marker keeps the Scaleway CCM from adding its
//! own prefix when it propagates them.

use crate::error::{Result, ScwError};

pub const TAG_CLUSTER_NAME: &str = "noprefix=kops.k8s.io/cluster";
pub const TAG_INSTANCE_GROUP: &str = "noprefix=kops.k8s.io/instance-group";
pub const TAG_ETCD_CLUSTER_PREFIX: &str = "noprefix=kops.k8s.io/etcd";
pub const TAG_NEEDS_UPDATE: &str = "noprefix=kops.k8s.io/needs-update";
pub const TAG_ROLE: &str = "noprefix=kops.k8s.io/role";
pub const ROLE_CONTROL_PLANE: &str = "ControlPlane";
pub const ROLE_WORKER: &str = "Node";

pub fn cluster_tag(cluster: &str) -> String {
    format!("{}={}", TAG_CLUSTER_NAME, cluster)
}

pub fn instance_group_tag(group: &str) -> String {
    format!("{}={}", TAG_INSTANCE_GROUP, group)
}

pub fn role_tag(role: &str) -> String {
    format!("{}={}", TAG_ROLE, role)
}

/// `noprefix=kops.k8s.io/etcd/<cluster>=<member>/<members>`
pub fn etcd_tag(etcd_cluster: &str, member: &str) -> String {
    format!(
        "{}/{}={}/{}",
        TAG_ETCD_CLUSTER_PREFIX, etcd_cluster, member, member
    )
}

fn value_of<'a>(tags: &'a [String], key: &str) -> Option<&'a str> {
    tags.iter().find_map(|tag| {
        tag.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

pub fn cluster_name_from_tags(tags: &[String]) -> Option<&str> {
    value_of(tags, TAG_CLUSTER_NAME)
}

pub fn instance_group_name_from_tags(tags: &[String]) -> Option<&str> {
    value_of(tags, TAG_INSTANCE_GROUP)
}

pub fn role_from_tags(tags: &[String]) -> Option<&str> {
    value_of(tags, TAG_ROLE)
}

pub fn has_tag(tags: &[String], tag: &str) -> bool {
    tags.iter().any(|t| t == tag)
}

/// Region of a zone: `fr-par-1` → `fr-par`.
pub fn region_from_zone(zone: &str) -> Result<String> {
    match zone.rsplit_once('-') {
        Some((region, n))
            if !n.is_empty()
                && n.chars().all(|c| c.is_ascii_digit())
                && region.split('-').count() == 2 =>
        {
            Ok(region.to_string())
        }
        _ => Err(ScwError::InvalidZone(zone.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip_through_helpers() {
        let tags = vec![
            cluster_tag("demo.k8s.local"),
            instance_group_tag("nodes-fr-par-1"),
            role_tag(ROLE_WORKER),
        ];
        assert_eq!(cluster_name_from_tags(&tags), Some("demo.k8s.local"));
        assert_eq!(instance_group_name_from_tags(&tags), Some("nodes-fr-par-1"));
        assert_eq!(role_from_tags(&tags), Some("Node"));
        assert_eq!(role_from_tags(&[]), None);
    }

    #[test]
    fn test_etcd_tag_layout() {
        assert_eq!(
            etcd_tag("main", "control-plane-fr-par-1"),
            "noprefix=kops.k8s.io/etcd/main=control-plane-fr-par-1/control-plane-fr-par-1"
        );
    }

    #[test]
    fn test_region_from_zone() {
        assert_eq!(region_from_zone("fr-par-1").unwrap(), "fr-par");
        assert_eq!(region_from_zone("nl-ams-3").unwrap(), "nl-ams");
        assert!(region_from_zone("fr-par").is_err());
        assert!(region_from_zone("paris").is_err());
    }
}

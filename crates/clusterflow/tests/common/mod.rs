use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CLUSTER_YAML: &str = r#"
name: demo.example.com
zone: fr-par-1
ssh_public_key: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 admin@example
instance_groups:
  - name: control-plane-fr-par-1
    role: control_plane
    machine_type: PRO2-XXS
    image: ubuntu_jammy
  - name: nodes-fr-par-1
    role: node
    machine_type: DEV1-M
    image: ubuntu_jammy
    min_size: 2
"#;

const SCW_VARS: [&str; 6] = [
    "SCW_PROFILE",
    "SCW_ACCESS_KEY",
    "SCW_SECRET_KEY",
    "SCW_DEFAULT_PROJECT_ID",
    "SCW_DEFAULT_ZONE",
    "SCW_API_URL",
];

/// Working directory holding a cluster description, isolated from the
/// user's settings and Scaleway profile.
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("cluster.yaml"), CLUSTER_YAML).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn write_settings(&self, content: &str) {
        fs::write(self.path().join("clusterflow.yaml"), content).unwrap();
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.path().join(relative)
    }

    #[allow(deprecated)]
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("clusterflow").unwrap();
        cmd.current_dir(self.path())
            .env_remove("CLUSTERFLOW_CONFIG")
            .env_remove("CLUSTERFLOW_CLUSTER")
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env("SCW_CONFIG_PATH", self.path().join("scw.yaml"));
        for var in SCW_VARS {
            cmd.env_remove(var);
        }
        cmd
    }
}

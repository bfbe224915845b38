//! `25-host-rootfs`: JSON-patch exposing the host rootfs at
//! `/run/host/rootfs` (§4.2.4), used by `40-host-ipc`'s symlink rewriting.

use linglong_common::{Error, Result};
use serde_json::json;

use crate::jsonpatch::{self, Patch};
use crate::{Config, Stage};

pub struct HostRootfs;

impl Stage for HostRootfs {
    fn name(&self) -> &'static str {
        "25-host-rootfs"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        let patch = [Patch::Add {
            path: "/mounts/-".to_string(),
            value: json!({
                "destination": "/run/host/rootfs",
                "type": "none",
                "source": "/",
                "options": ["rbind", "ro"],
            }),
        }];

        jsonpatch::apply(config.value_mut(), &patch)
            .map_err(|e| Error::contract(format!("25-host-rootfs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_host_rootfs() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1","mounts":[]}"#).unwrap();
        HostRootfs.generate(&mut config).unwrap();
        assert!(config.mounts().iter().any(|m| m.destination == "/run/host/rootfs"));
    }
}

//! `10-basics`: merges a JSON patch describing default rootfs/proc/sys
//! mounts (§4.2.4). Unlike the other stages, this one is driven by data
//! rather than code — the patch is applied after checking the patch's own
//! `ociVersion` claim against the config's.

use linglong_common::{Error, Result};
use serde_json::json;

use crate::jsonpatch::{self, Patch};
use crate::{Config, Stage};

pub struct Basics;

/// The default mounts every container gets, expressed as an `add` onto
/// `/mounts/-` (append) for each one — proc, sysfs, devpts, shm, mqueue and
/// a read-only bind of the host rootfs onto the container's `/`.
fn default_mount_patches() -> Vec<Patch> {
    let mounts = [
        ("/proc", "proc", "proc", vec!["nosuid", "noexec", "nodev"]),
        ("/dev/pts", "devpts", "devpts", vec!["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"]),
        ("/dev/shm", "tmpfs", "shm", vec!["nosuid", "noexec", "nodev", "mode=1777"]),
        ("/dev/mqueue", "mqueue", "mqueue", vec!["nosuid", "noexec", "nodev"]),
        ("/sys", "sysfs", "sysfs", vec!["nosuid", "noexec", "nodev", "ro"]),
    ];

    mounts
        .into_iter()
        .map(|(destination, typ, source, options)| Patch::Add {
            path: "/mounts/-".to_string(),
            value: json!({
                "destination": destination,
                "type": typ,
                "source": source,
                "options": options,
            }),
        })
        .collect()
}

impl Stage for Basics {
    fn name(&self) -> &'static str {
        "10-basics"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;
        let patches = default_mount_patches();
        jsonpatch::apply(config.value_mut(), &patches).map_err(|e| Error::contract(format!("10-basics: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_default_mounts() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1","mounts":[]}"#).unwrap();
        Basics.generate(&mut config).unwrap();
        let mounts = config.mounts();
        assert_eq!(mounts.len(), 5);
        assert!(mounts.iter().any(|m| m.destination == "/proc"));
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"0.9","mounts":[]}"#).unwrap();
        assert!(Basics.generate(&mut config).is_err());
    }
}

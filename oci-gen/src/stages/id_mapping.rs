//! `00-id-mapping`: single-entry uidMappings/gidMappings for the current
//! uid/gid (§4.2.3), grounded on `00_id_mapping.cpp`.

use linglong_common::Result;
use nix::unistd::{getgid, getuid};

use crate::config::IdMapping as MappingEntry;
use crate::{Config, Stage};

pub struct IdMapping;

impl Stage for IdMapping {
    fn name(&self) -> &'static str {
        "00-id-mapping"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        let uid = getuid().as_raw();
        let gid = getgid().as_raw();

        config.set_uid_mappings(&[MappingEntry { container_id: uid, host_id: uid, size: 1 }])?;
        config.set_gid_mappings(&[MappingEntry { container_id: gid, host_id: gid, size: 1 }])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_current_uid_and_gid_with_size_one() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1"}"#).unwrap();
        IdMapping.generate(&mut config).unwrap();

        let uid = getuid().as_raw();
        let gid = getgid().as_raw();
        assert_eq!(
            config.value().pointer("/linux/uidMappings").unwrap().clone(),
            serde_json::json!([{"containerID": uid, "hostID": uid, "size": 1}])
        );
        assert_eq!(
            config.value().pointer("/linux/gidMappings").unwrap().clone(),
            serde_json::json!([{"containerID": gid, "hostID": gid, "size": 1}])
        );
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"0.9"}"#).unwrap();
        assert!(IdMapping.generate(&mut config).is_err());
    }
}

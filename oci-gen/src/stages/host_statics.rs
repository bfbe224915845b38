//! `25-host-statics`: mounts read-only host static asset directories (§2
//! table) that desktop toolkits expect but that bundle layers don't
//! normally carry — MIME and widget-toolkit data, distinct from the legacy
//! compatibility set `90-legacy` binds.

use std::path::Path;

use linglong_common::Result;

use crate::config::MountEntry;
use crate::{Config, Stage};

pub struct HostStatics;

const STATIC_DIRS: &[&str] = &["/usr/share/mime", "/usr/share/glib-2.0", "/usr/share/gtk-3.0"];

impl Stage for HostStatics {
    fn name(&self) -> &'static str {
        "25-host-statics"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        for &dir in STATIC_DIRS {
            if Path::new(dir).is_dir() {
                config.push_mount(MountEntry::new(dir).source(dir).typ("none").options(["rbind", "ro"]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_absent_directories() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1","mounts":[]}"#).unwrap();
        HostStatics.generate(&mut config).unwrap();
        for mount in config.mounts() {
            assert!(Path::new(&mount.destination).is_dir());
        }
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"0.9","mounts":[]}"#).unwrap();
        assert!(HostStatics.generate(&mut config).is_err());
    }
}

//! `20-devices`: binds udev, audio/GPU devices and `/media` (§4.2.5),
//! grounded on `20_devices.cpp`.

use std::path::Path;

use linglong_common::Result;

use crate::config::MountEntry;
use crate::{Config, Stage};

pub struct Devices;

fn bind(config: &mut Config, path: &str) {
    if Path::new(path).exists() {
        config.push_mount(MountEntry::new(path).source(path).typ("none").options(["rbind"]));
    }
}

impl Stage for Devices {
    fn name(&self) -> &'static str {
        "20-devices"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        if config.annotation_is_true("org.deepin.linglong.onlyApp") {
            return Ok(());
        }

        bind(config, "/run/udev");
        bind(config, "/dev/snd");
        bind(config, "/dev/dri");

        if let Ok(entries) = std::fs::read_dir("/dev") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("video") || name.starts_with("nvidia") {
                    let path = entry.path();
                    config.push_mount(
                        MountEntry::new(path.to_string_lossy())
                            .source(path.to_string_lossy())
                            .typ("none")
                            .options(["rbind"]),
                    );
                }
            }
        }

        handle_media(config);
        Ok(())
    }
}

fn handle_media(config: &mut Config) {
    let media = Path::new("/media");
    let Ok(metadata) = std::fs::symlink_metadata(media) else { return };

    if metadata.file_type().is_symlink() {
        if let Ok(target) = std::fs::canonicalize(media) {
            config.push_mount(
                MountEntry::new(target.to_string_lossy())
                    .source(target.to_string_lossy())
                    .typ("none")
                    .options(["rbind", "rshared"]),
            );
        }
        config.push_mount(
            MountEntry::new("/media").source("/media").typ("none").options(["rbind", "ro", "copy-symlink"]),
        );
    } else if metadata.is_dir() {
        config.push_mount(MountEntry::new("/media").source("/media").typ("none").options(["rbind", "rshared"]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_noop_when_only_app() {
        let mut config = Config::from_json_str(
            r#"{"ociVersion":"1.0.1","annotations":{"org.deepin.linglong.onlyApp":"true"},"mounts":[]}"#,
        )
        .unwrap();
        Devices.generate(&mut config).unwrap();
        assert!(config.mounts().is_empty());
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"0.9","mounts":[]}"#).unwrap();
        assert!(Devices.generate(&mut config).is_err());
    }
}

//! `90-legacy`: binds legacy read-only compatibility paths, randomizes an
//! `XDG_DATA_DIRS` mount-point per run, and applies a couple of
//! application-specific workarounds (§4.2.8), grounded on `90_legacy.cpp`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use linglong_common::{Error, Result};

use crate::config::MountEntry;
use crate::{Config, Stage};

pub struct Legacy;

/// `(source, destination)` read-only bind pairs. `/etc/machine-id`,
/// `/etc/ssl/certs` and `/etc/resolvconf` each get bound at both a
/// `/run/host/etc/...` shadow path and their native `/etc/...` path,
/// carried over verbatim from the original's dual-destination list.
const RO_MOUNTS: &[(&str, &str)] = &[
    ("/etc/resolvconf", "/run/host/etc/resolvconf"),
    ("/etc/machine-id", "/run/host/etc/machine-id"),
    ("/etc/machine-id", "/etc/machine-id"),
    ("/etc/ssl/certs", "/run/host/etc/ssl/certs"),
    ("/etc/ssl/certs", "/etc/ssl/certs"),
    ("/var/cache/fontconfig", "/run/host/appearance/fonts-cache"),
    ("/var/cache/fontconfig", "/var/cache/fontconfig"),
    ("/usr/share/fonts", "/usr/share/fonts"),
    ("/usr/lib/locale/", "/usr/lib/locale/"),
    ("/usr/share/themes", "/usr/share/themes"),
    ("/usr/share/icons", "/usr/share/icons"),
    ("/usr/share/zoneinfo", "/usr/share/zoneinfo"),
    ("/etc/resolvconf", "/etc/resolvconf"),
];

const BROWSER_360_APP_ID: &str = "com.360.browser-stable";

impl Stage for Legacy {
    fn name(&self) -> &'static str {
        "90-legacy"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        if config.annotation_is_true("org.deepin.linglong.onlyApp") {
            return Ok(());
        }

        let app_id = config
            .annotation("org.deepin.linglong.appID")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::contract("appID annotation missing or empty"))?
            .to_string();

        for &(source, destination) in RO_MOUNTS {
            if !Path::new(source).exists() {
                log::warn!("{source} not exists on host.");
                continue;
            }
            config.push_mount(MountEntry::new(destination).source(source).typ("bind").options(["ro", "rbind"]));
        }

        if std::env::var_os("LINGLONG_SKIP_HOME_GENERATE").is_none() && app_id == BROWSER_360_APP_ID {
            apply_360_browser_workaround(config, &app_id)?;
        }

        redirect_xdg_data_dirs(config)?;

        Ok(())
    }
}

/// `com.360.browser-stable` needs a world-writable scratch directory that
/// survives outside its usual per-app private tree; carried from the
/// original's `90_legacy.cpp` FIXME block.
fn apply_360_browser_workaround(config: &mut Config, app_id: &str) -> Result<()> {
    let home = std::env::var("HOME").map_err(|_| Error::environment("HOME not set"))?;
    let home = Path::new(&home);
    if !home.exists() {
        return Err(Error::environment(format!("HOME {} does not exist", home.display())));
    }

    let app_data_source = home.join(".linglong").join(app_id).join("share").join("appdata");
    std::fs::create_dir_all(&app_data_source)
        .map_err(|e| Error::syscall(format!("failed to create {}: {e}", app_data_source.display())))?;

    config.push_mount(
        MountEntry::new("/apps-data").source("tmpfs").typ("tmpfs").options(["nodev", "nosuid", "mode=777"]),
    );
    config.push_mount(
        MountEntry::new(format!("/apps-data/private/{app_id}"))
            .source(app_data_source.to_string_lossy())
            .typ("bind")
            .options(["rw", "rbind"]),
    );

    Ok(())
}

/// Appends a timestamp-randomized mount-point path to `XDG_DATA_DIRS`
/// (creating the var if absent) so the host's distribution metadata can be
/// exposed without colliding across concurrent container launches.
fn redirect_xdg_data_dirs(config: &mut Config) -> Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::syscall(format!("system clock before epoch: {e}")))?
        .as_secs();
    let share_dir = format!("/run/linglong/usr/share_{timestamp}");

    let mut env = config.env();
    match env.iter_mut().find(|e| e.starts_with("XDG_DATA_DIRS=")) {
        Some(existing) => *existing = format!("{existing}:{share_dir}"),
        None => env.push(format!("XDG_DATA_DIRS={share_dir}")),
    }
    config
        .value_mut()
        .pointer_mut("/process")
        .and_then(|p| p.as_object_mut())
        .map(|p| p.insert("env".to_string(), serde_json::to_value(env).expect("env always serializes")));

    let distribution_info = Path::new("/usr/share/deepin/distribution.info");
    if distribution_info.exists() {
        // Matches the original's exact option set for this bind — not the
        // `ro,rbind` convention used elsewhere in this stage.
        config.push_mount(
            MountEntry::new(format!("{share_dir}/deepin/distribution.info"))
                .source(distribution_info.to_string_lossy())
                .typ("bind")
                .options(["nodev", "nosuid", "mode=0644"]),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(app_id: &str) -> Config {
        Config::from_json_str(&format!(
            r#"{{"ociVersion":"1.0.1","annotations":{{"org.deepin.linglong.appID":"{app_id}"}},"mounts":[],"process":{{"env":[]}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn is_noop_when_only_app() {
        let mut config = Config::from_json_str(
            r#"{"ociVersion":"1.0.1","annotations":{"org.deepin.linglong.onlyApp":"true"},"mounts":[]}"#,
        )
        .unwrap();
        Legacy.generate(&mut config).unwrap();
        assert!(config.mounts().is_empty());
    }

    #[test]
    fn adds_xdg_data_dirs_when_absent() {
        let mut config = base_config("org.app");
        Legacy.generate(&mut config).unwrap();
        assert!(config.env().iter().any(|e| e.starts_with("XDG_DATA_DIRS=/run/linglong/usr/share_")));
    }

    #[test]
    fn appends_to_existing_xdg_data_dirs() {
        let mut config = Config::from_json_str(
            r#"{"ociVersion":"1.0.1","annotations":{"org.deepin.linglong.appID":"org.app"},"mounts":[],"process":{"env":["XDG_DATA_DIRS=/usr/share"]}}"#,
        )
        .unwrap();
        Legacy.generate(&mut config).unwrap();
        let entry = config.env().into_iter().find(|e| e.starts_with("XDG_DATA_DIRS=")).unwrap();
        assert!(entry.starts_with("XDG_DATA_DIRS=/usr/share:/run/linglong/usr/share_"));
    }

    #[test]
    fn rejects_missing_app_id() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1","mounts":[]}"#).unwrap();
        assert!(Legacy.generate(&mut config).is_err());
    }
}

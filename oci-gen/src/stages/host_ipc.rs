//! `40-host-ipc`: binds X11, D-Bus (system + session), Wayland,
//! `XDG_RUNTIME_DIR` skeleton, dconf, Xauthority; creates bundle-scoped
//! `/etc/*` symlinks pointing into `/run/host/rootfs` (§4.2.7), grounded on
//! `40_host_ipc.cpp`.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use linglong_common::{Error, Result};

use crate::config::MountEntry;
use crate::{Config, Stage};

pub struct HostIpc;

impl Stage for HostIpc {
    fn name(&self) -> &'static str {
        "40-host-ipc"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        let bundle_dir = config
            .annotation("org.deepin.linglong.bundleDir")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::contract("bundleDir annotation missing or empty"))?
            .to_string();
        let bundle_dir = PathBuf::from(bundle_dir);

        bind_if_exists(config, Path::new("/tmp/.X11-unix"), Path::new("/tmp/.X11-unix"));

        bind_system_bus(config)?;

        config.push_mount(
            MountEntry::new("/run/user").source("tmpfs").typ("tmpfs").options(["nodev", "nosuid", "mode=700"]),
        );

        bind_user_runtime_dir(config)?;
        bind_xauthority(config);
        bind_etc_symlinks(config, &bundle_dir);

        Ok(())
    }
}

fn bind_if_exists(config: &mut Config, source: &Path, destination: &Path) {
    if !source.exists() {
        return;
    }
    config.push_mount(
        MountEntry::new(destination.to_string_lossy())
            .source(source.to_string_lossy())
            .typ("bind")
            .options(["rbind"]),
    );
}

fn bind_system_bus(config: &mut Config) -> Result<()> {
    let default_bus = "/var/run/dbus/system_bus_socket".to_string();
    let system_bus = std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
        .ok()
        .filter(|p| Path::new(p).exists())
        .unwrap_or(default_bus);

    if !Path::new(&system_bus).exists() {
        log::warn!("D-Bus system bus socket not found at {system_bus}");
        return Ok(());
    }

    config.push_mount(
        MountEntry::new("/run/dbus/system_bus_socket").source(&system_bus).typ("bind").options(["rbind"]),
    );
    config.push_env_unique("DBUS_SYSTEM_BUS_ADDRESS", "unix:path=/run/dbus/system_bus_socket")
}

/// Only proceeds if `XDG_RUNTIME_DIR` is set, mode `0700`, and owned by the
/// calling uid — any of those failing is a soft no-op, matching the
/// original's lambda-local `return` (it never fails the stage).
fn bind_user_runtime_dir(config: &mut Config) -> Result<()> {
    let Some(host_dir) = std::env::var_os("XDG_RUNTIME_DIR") else {
        return Ok(());
    };
    let host_dir = PathBuf::from(host_dir);

    let metadata = match std::fs::metadata(&host_dir) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("failed to stat {}: {e}", host_dir.display());
            return Ok(());
        }
    };
    if metadata.mode() & 0o777 != 0o700 {
        log::warn!("{} must be mode 0700", host_dir.display());
        return Ok(());
    }
    if metadata.uid() != nix::unistd::getuid().as_raw() {
        log::warn!("{} doesn't belong to current user", host_dir.display());
        return Ok(());
    }

    let uid = nix::unistd::getuid().as_raw();
    let container_dir = PathBuf::from("/run/user").join(uid.to_string());

    config.push_mount(
        MountEntry::new(container_dir.to_string_lossy())
            .source("tmpfs")
            .typ("tmpfs")
            .options(["nodev", "nosuid", "mode=700"]),
    );
    config.push_env_unique("XDG_RUNTIME_DIR", &container_dir.to_string_lossy())?;

    bind_if_exists(config, &host_dir.join("pulse"), &container_dir.join("pulse"));
    bind_if_exists(config, &host_dir.join("gvfs"), &container_dir.join("gvfs"));

    if let Some(wayland_display) = std::env::var_os("WAYLAND_DISPLAY") {
        let socket_path = host_dir.join(&wayland_display);
        if socket_path.exists() {
            bind_if_exists(config, &socket_path, &container_dir.join(&wayland_display));
        } else {
            log::warn!("Wayland display socket not found at {}", socket_path.display());
        }
    } else {
        log::warn!("Couldn't get WAYLAND_DISPLAY");
    }

    match std::env::var("DBUS_SESSION_BUS_ADDRESS") {
        Ok(session_bus) => match session_bus.strip_prefix("unix:path=") {
            Some(socket_path) if Path::new(socket_path).exists() => {
                let socket_path = Path::new(socket_path);
                let container_bus = container_dir.join("bus");
                bind_if_exists(config, socket_path, &container_bus);
                config.push_env_unique(
                    "DBUS_SESSION_BUS_ADDRESS",
                    &format!("unix:path={}", container_bus.display()),
                )?;
            }
            Some(socket_path) => log::warn!("D-Bus session bus socket not found at {socket_path}"),
            None => log::warn!("unexpected DBUS_SESSION_BUS_ADDRESS={session_bus}"),
        },
        Err(_) => log::warn!("Couldn't get DBUS_SESSION_BUS_ADDRESS"),
    }

    bind_if_exists(config, &host_dir.join("dconf"), &container_dir.join("dconf"));

    Ok(())
}

fn bind_xauthority(config: &mut Config) {
    let Ok(home) = std::env::var("HOME") else {
        log::warn!("Couldn't get HOME from env");
        return;
    };
    let Ok(user) = std::env::var("USER") else {
        log::warn!("Couldn't get USER from env");
        return;
    };

    let mut host_xauth = PathBuf::from(&home).join(".Xauthority");
    if let Some(xauthority) = std::env::var_os("XAUTHORITY") {
        let xauthority = PathBuf::from(xauthority);
        if xauthority.exists() {
            host_xauth = xauthority;
        }
    }

    if !host_xauth.exists() {
        log::warn!("XAUTHORITY file not found at {}", host_xauth.display());
        return;
    }

    let container_xauth = PathBuf::from("/home").join(&user).join(".Xauthority");
    config.push_mount(
        MountEntry::new(container_xauth.to_string_lossy())
            .source(host_xauth.to_string_lossy())
            .typ("bind")
            .options(["rbind"]),
    );
    let _ = config.push_env_unique("XAUTHORITY", &container_xauth.to_string_lossy());
}

/// Nested-symlink-aware resolution of `/etc/localtime`: Chromium gets
/// confused by a host-rootfs path through a nested symlink, so a real
/// target is resolved before reprojecting it under `/run/host/rootfs`.
fn resolve_localtime_target() -> String {
    let localtime = Path::new("/etc/localtime");
    let Ok(metadata) = std::fs::symlink_metadata(localtime) else {
        return "/run/host/rootfs/etc/localtime".to_string();
    };
    if !metadata.file_type().is_symlink() {
        return "/run/host/rootfs/etc/localtime".to_string();
    }

    match std::fs::canonicalize(localtime) {
        Ok(target) => {
            let relative = target.strip_prefix("/").unwrap_or(&target);
            Path::new("/run/host/rootfs").join(relative).to_string_lossy().into_owned()
        }
        Err(e) => {
            log::warn!("failed to resolve realpath of /etc/localtime: {e}");
            "/run/host/rootfs/etc/localtime".to_string()
        }
    }
}

/// Creates the bundle-scoped symlinks for `ld.so.cache`, `localtime`,
/// `resolv.conf` and `timezone`, then bind-mounts each read-only into the
/// container at `/etc/<name>`. A symlink failure (e.g. the target already
/// exists) is logged and that entry is skipped, not fatal for the stage.
fn bind_etc_symlinks(config: &mut Config, bundle_dir: &Path) {
    config.push_mount(
        MountEntry::new("/run/linglong/etc")
            .source("tmpfs")
            .typ("tmpfs")
            .options(["nodev", "nosuid", "mode=700"]),
    );

    let localtime_target = resolve_localtime_target();
    let entries: [(&str, &str, &str); 4] = [
        ("ld.so.cache", "/etc/ld.so.cache", "/run/linglong/cache/ld.so.cache"),
        ("localtime", "/etc/localtime", localtime_target.as_str()),
        ("resolv.conf", "/etc/resolv.conf", "/run/host/rootfs/etc/resolv.conf"),
        ("timezone", "/etc/timezone", "/run/host/rootfs/etc/timezone"),
    ];

    for (name, destination, target) in entries {
        let link_file = bundle_dir.join(name);
        if let Err(e) = std::os::unix::fs::symlink(target, &link_file) {
            log::warn!("failed to create symlink from {target} to {}: {e}", link_file.display());
            continue;
        }
        config.push_mount(
            MountEntry::new(destination)
                .source(link_file.to_string_lossy())
                .typ("bind")
                .options(["rbind", "ro", "nosymfollow", "copy-symlink"]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(bundle_dir: &Path) -> Config {
        Config::from_json_str(&format!(
            r#"{{"ociVersion":"1.0.1","annotations":{{"org.deepin.linglong.bundleDir":"{}"}},"mounts":[],"process":{{"env":[]}}}}"#,
            bundle_dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn rejects_missing_bundle_dir_annotation() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1"}"#).unwrap();
        assert!(HostIpc.generate(&mut config).is_err());
    }

    #[test]
    fn creates_etc_symlinks_in_bundle_dir() {
        let bundle_dir = tempfile::tempdir().unwrap();
        let mut config = base_config(bundle_dir.path());
        HostIpc.generate(&mut config).unwrap();

        assert!(bundle_dir.path().join("ld.so.cache").symlink_metadata().is_ok());
        assert!(bundle_dir.path().join("resolv.conf").symlink_metadata().is_ok());
        let mounts = config.mounts();
        assert!(mounts.iter().any(|m| m.destination == "/etc/resolv.conf"));
    }

    #[test]
    fn run_user_tmpfs_is_always_present() {
        let bundle_dir = tempfile::tempdir().unwrap();
        let mut config = base_config(bundle_dir.path());
        HostIpc.generate(&mut config).unwrap();
        assert!(config.mounts().iter().any(|m| m.destination == "/run/user"));
    }
}

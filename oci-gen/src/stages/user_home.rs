//! `30-user-home`: constructs per-app HOME on tmpfs, redirects XDG_*,
//! binds selected host dirs, applies per-app `permissions.json` to
//! blacklist directories (§4.2.6), grounded on `30_user_home.cpp`.

use std::path::{Path, PathBuf};

use linglong_common::{Error, Result};

use crate::config::MountEntry;
use crate::{Config, Stage};

pub struct UserHome;

impl Stage for UserHome {
    fn name(&self) -> &'static str {
        "30-user-home"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        if std::env::var_os("LINGLONG_SKIP_HOME_GENERATE").is_some() {
            return Ok(());
        }
        config.require_oci_version()?;

        let app_id = config
            .annotation("org.deepin.linglong.appID")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::contract("appID annotation missing or empty"))?
            .to_string();

        let host_home = std::env::var("HOME").map_err(|_| Error::environment("HOME not set"))?;
        let user = std::env::var("USER").map_err(|_| Error::environment("USER not set"))?;
        let host_home = PathBuf::from(host_home);
        if !host_home.exists() {
            return Err(Error::environment(format!("HOME {} does not exist", host_home.display())));
        }
        let container_home = PathBuf::from("/home").join(&user);

        config.push_mount(
            MountEntry::new("/home").source("tmpfs").typ("tmpfs").options(["nodev", "nosuid", "mode=700"]),
        );

        bind_dir(config, &host_home, &container_home)?;
        config.push_env_unique("HOME", &container_home.to_string_lossy())?;

        let private_app_dir = host_home.join(".linglong").join(&app_id);
        std::fs::create_dir_all(&private_app_dir)
            .map_err(|e| Error::syscall(format!("failed to create {}: {e}", private_app_dir.display())))?;

        let xdg_data_home = resolve_xdg(&host_home, "XDG_DATA_HOME", ".local/share", None);
        let container_data_home = container_home.join(".local").join("share");
        bind_dir(config, &xdg_data_home, &container_data_home)?;
        config.push_env_unique("XDG_DATA_HOME", &container_data_home.to_string_lossy())?;

        let xdg_config_home =
            resolve_xdg(&host_home, "XDG_CONFIG_HOME", ".config", Some(&private_app_dir.join("config")));
        let container_config_home = container_home.join(".config");
        bind_dir(config, &xdg_config_home, &container_config_home)?;
        config.push_env_unique("XDG_CONFIG_HOME", &container_config_home.to_string_lossy())?;

        let xdg_cache_home =
            resolve_xdg(&host_home, "XDG_CACHE_HOME", ".cache", Some(&private_app_dir.join("cache")));
        let container_cache_home = container_home.join(".cache");
        bind_dir(config, &xdg_cache_home, &container_cache_home)?;
        config.push_env_unique("XDG_CACHE_HOME", &container_cache_home.to_string_lossy())?;

        // The private override lookup for XDG_STATE_HOME reuses
        // privateAppDir/"config", not a dedicated "state" subdirectory —
        // carried over from the original, which does the same.
        let xdg_state_home = resolve_xdg(
            &host_home,
            "XDG_STATE_HOME",
            ".local/state",
            Some(&private_app_dir.join("config")),
        );
        let container_state_home = container_home.join(".local").join("state");
        bind_dir(config, &xdg_state_home, &container_state_home)?;
        config.push_env_unique("XDG_STATE_HOME", &container_state_home.to_string_lossy())?;

        bind_optional(
            config,
            &xdg_config_home.join("systemd").join("user"),
            &container_config_home.join("systemd").join("user"),
        )?;
        bind_optional(config, &xdg_config_home.join("dconf"), &container_config_home.join("dconf"))?;
        bind_optional(
            config,
            &xdg_cache_home.join("deepin").join("dde-api"),
            &container_cache_home.join("deepin").join("dde-api"),
        )?;

        bind_file_if_exists(
            config,
            &xdg_config_home.join("user-dirs.dirs"),
            &container_config_home.join("user-dirs.dirs"),
        );
        bind_file_if_exists(
            config,
            &xdg_config_home.join("user-dirs.locale"),
            &container_config_home.join("user-dirs").join(".locale"),
        );

        let default_bashrc = Path::new("/etc/skel/.bashrc");
        if default_bashrc.exists() {
            config.push_mount(
                MountEntry::new(host_home.join(".bashrc").to_string_lossy())
                    .source(default_bashrc.to_string_lossy())
                    .typ("bind")
                    .options(["ro", "rbind"]),
            );
        } else {
            log::warn!("failed to mask bashrc: {} not found", default_bashrc.display());
        }

        bind_dir(config, &host_home.join(".linglong").join("data"), &container_home.join(".linglong"))?;

        apply_permission_blacklist(config, &host_home, &private_app_dir, &container_home)?;

        Ok(())
    }
}

/// Binds `host_dir` at `container_dir`, creating `host_dir` first if it
/// doesn't exist yet — matches `mountDir` in the original, which is used
/// both for plain host-XDG redirects and for private shadow directories
/// that may not have been created yet.
fn bind_dir(config: &mut Config, host_dir: &Path, container_dir: &Path) -> Result<()> {
    if !host_dir.exists() {
        std::fs::create_dir_all(host_dir)
            .map_err(|e| Error::syscall(format!("failed to create {}: {e}", host_dir.display())))?;
    }
    config.push_mount(
        MountEntry::new(container_dir.to_string_lossy())
            .source(host_dir.to_string_lossy())
            .typ("bind")
            .options(["rbind"]),
    );
    Ok(())
}

fn bind_optional(config: &mut Config, host_dir: &Path, container_dir: &Path) -> Result<()> {
    if host_dir.exists() {
        bind_dir(config, host_dir, container_dir)?;
    }
    Ok(())
}

fn bind_file_if_exists(config: &mut Config, host_file: &Path, container_file: &Path) {
    if host_file.exists() {
        config.push_mount(
            MountEntry::new(container_file.to_string_lossy())
                .source(host_file.to_string_lossy())
                .typ("bind")
                .options(["rbind"]),
        );
    }
}

/// Resolves an XDG base-dir var: the env var if set and non-empty, else
/// `host_home/default_rel`; a private override directory wins over either
/// when it exists.
fn resolve_xdg(host_home: &Path, env_var: &str, default_rel: &str, private_override: Option<&Path>) -> PathBuf {
    let mut resolved = std::env::var(env_var)
        .ok()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| host_home.join(default_rel));

    if let Some(private) = private_override {
        if private.exists() {
            resolved = private.to_path_buf();
        }
    }
    resolved
}

#[derive(Debug, Default, serde::Deserialize)]
struct XdgDirectoryPermission {
    allowed: bool,
    #[serde(rename = "dirType")]
    dir_type: String,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ApplicationConfigurationPermissions {
    #[serde(default, rename = "xdgDirectories")]
    xdg_directories: Vec<XdgDirectoryPermission>,
}

/// Extends the implicit blacklist `[".gnupg", ".ssh"]` with every disallowed
/// `dirType` from `<privateAppDir>/permissions.json` (when present), then
/// for each blacklisted directory that exists in the host HOME, shadows it
/// with the per-app private copy.
fn apply_permission_blacklist(
    config: &mut Config,
    host_home: &Path,
    private_app_dir: &Path,
    container_home: &Path,
) -> Result<()> {
    let mut blacklist: Vec<String> = vec![".gnupg".to_string(), ".ssh".to_string()];

    let permissions_file = private_app_dir.join("permissions.json");
    if permissions_file.exists() {
        let contents = std::fs::read_to_string(&permissions_file)
            .map_err(|e| Error::syscall(format!("failed to read {}: {e}", permissions_file.display())))?;
        let permissions: ApplicationConfigurationPermissions = serde_json::from_str(&contents)
            .map_err(|e| Error::malformed(format!("failed to parse {}: {e}", permissions_file.display())))?;
        for entry in permissions.xdg_directories {
            if !entry.allowed {
                blacklist.push(entry.dir_type);
            }
        }
    }

    for relative in blacklist {
        let host_path = host_home.join(&relative);
        if !host_path.exists() {
            continue;
        }
        bind_dir(config, &private_app_dir.join(&relative), &container_home.join(&relative))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Every test in this module mutates process-wide env vars; serialize
    // them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn base_config(app_id: &str) -> Config {
        Config::from_json_str(&format!(
            r#"{{"ociVersion":"1.0.1","annotations":{{"org.deepin.linglong.appID":"{app_id}"}},"mounts":[],"process":{{"env":[]}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn projects_home_and_xdg_vars_exactly_once() {
        let _guard = ENV_LOCK.lock().unwrap();
        let home = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("HOME", home.path());
            std::env::set_var("USER", "alice");
            std::env::remove_var("XDG_DATA_HOME");
            std::env::remove_var("XDG_CONFIG_HOME");
            std::env::remove_var("XDG_CACHE_HOME");
            std::env::remove_var("XDG_STATE_HOME");
            std::env::remove_var("LINGLONG_SKIP_HOME_GENERATE");
        }

        let mut config = base_config("org.app");
        UserHome.generate(&mut config).unwrap();

        let env = config.env();
        for key in ["HOME", "XDG_DATA_HOME", "XDG_CONFIG_HOME", "XDG_CACHE_HOME", "XDG_STATE_HOME"] {
            let count = env.iter().filter(|e| e.starts_with(&format!("{key}="))).count();
            assert_eq!(count, 1, "{key} should appear exactly once, got {env:?}");
        }
        assert!(env.contains(&"HOME=/home/alice".to_string()));
    }

    #[test]
    fn skips_entirely_when_env_var_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("LINGLONG_SKIP_HOME_GENERATE", "1") };
        let mut config = base_config("org.app");
        UserHome.generate(&mut config).unwrap();
        assert!(config.mounts().is_empty());
        unsafe { std::env::remove_var("LINGLONG_SKIP_HOME_GENERATE") };
    }

    #[test]
    fn blacklists_disallowed_xdg_directory() {
        let _guard = ENV_LOCK.lock().unwrap();
        let home = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("HOME", home.path());
            std::env::set_var("USER", "alice");
            std::env::remove_var("XDG_DATA_HOME");
            std::env::remove_var("XDG_CONFIG_HOME");
            std::env::remove_var("XDG_CACHE_HOME");
            std::env::remove_var("XDG_STATE_HOME");
            std::env::remove_var("LINGLONG_SKIP_HOME_GENERATE");
        }

        std::fs::create_dir_all(home.path().join("Documents")).unwrap();
        let private_app_dir = home.path().join(".linglong").join("org.app");
        std::fs::create_dir_all(&private_app_dir).unwrap();
        std::fs::write(
            private_app_dir.join("permissions.json"),
            r#"{"xdgDirectories":[{"allowed":false,"dirType":"Documents"}]}"#,
        )
        .unwrap();

        let mut config = base_config("org.app");
        UserHome.generate(&mut config).unwrap();

        let documents_shadowed = config.mounts().iter().any(|m| {
            m.destination == "/home/alice/Documents"
                && m.source.as_deref() == Some(&private_app_dir.join("Documents").to_string_lossy())
        });
        assert!(documents_shadowed, "{:?}", config.mounts());
    }
}

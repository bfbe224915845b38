//! Well-known path helpers, mirroring `linglong::common::dir` /
//! `linglong::common::xdg` from the original implementation.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// `$XDG_RUNTIME_DIR`, falling back to `/tmp` when unset (spec §4.1.5).
pub fn xdg_runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// The user's linglong runtime root, `$XDG_RUNTIME_DIR/linglong`.
pub fn runtime_dir() -> PathBuf {
    xdg_runtime_dir().join("linglong")
}

pub fn app_runtime_dir(app_id: &str) -> PathBuf {
    runtime_dir().join("apps").join(app_id)
}

pub fn bundle_dir(container_id: &str) -> PathBuf {
    runtime_dir().join(container_id)
}

/// Ephemeral UAB mount point, `$XDG_RUNTIME_DIR/linglong/UAB/<uuid>`.
pub fn uab_mount_point(uuid: &str) -> PathBuf {
    runtime_dir().join("UAB").join(uuid)
}

/// `realpath(3)` wrapper that turns failures into our error type, matching
/// `resolveRealPath` in the original `uab` entrypoint.
pub fn resolve_real_path(source: impl AsRef<Path>) -> Result<PathBuf> {
    std::fs::canonicalize(source.as_ref())
        .map_err(|e| Error::syscall(format!("failed to resolve path: {e}")))
}

/// `getpwuid_r`-backed username lookup, matching
/// `linglong::utils::namespace::detail::getUserName`.
pub fn current_user_name(uid: nix::unistd::Uid) -> Result<String> {
    nix::unistd::User::from_uid(uid)
        .map_err(|e| Error::syscall(format!("getpwuid failed: {e}")))?
        .map(|user| user.name)
        .ok_or_else(|| Error::environment(format!("no passwd entry for uid {uid}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_dir_falls_back_to_tmp() {
        let saved = std::env::var_os("XDG_RUNTIME_DIR");
        unsafe { std::env::remove_var("XDG_RUNTIME_DIR") };
        assert_eq!(xdg_runtime_dir(), PathBuf::from("/tmp"));
        if let Some(v) = saved {
            unsafe { std::env::set_var("XDG_RUNTIME_DIR", v) };
        }
    }

    #[test]
    fn uab_mount_point_is_scoped_by_uuid() {
        unsafe { std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000") };
        let mp = uab_mount_point("abc-123");
        assert_eq!(mp, PathBuf::from("/run/user/1000/linglong/UAB/abc-123"));
    }
}

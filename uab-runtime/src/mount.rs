//! Mount-point lifecycle: directory creation (§4.1.5) and the FUSE mount
//! fork+exec (§4.1.6), grounded on `peimage/src/mkfs.rs`'s pattern of
//! shelling out to an external filesystem tool via `std::process::Command`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use linglong_common::dir::{resolve_real_path, uab_mount_point, xdg_runtime_dir};
use linglong_common::{Error, Result};

use crate::cleanup;

/// Resolves `$XDG_RUNTIME_DIR` (or `/tmp`), canonicalizes it, then creates
/// `<runtime>/linglong/UAB/<uuid>` recursively. Marks `createFlag` so
/// cleanup becomes idempotent. Returns the canonical mount point path.
pub fn create_mount_point(uuid: &str) -> Result<PathBuf> {
    let runtime_dir = xdg_runtime_dir();
    if !runtime_dir.exists() {
        return Err(Error::environment(format!(
            "{} does not exist and there is no writable fallback",
            runtime_dir.display()
        )));
    }
    let runtime_dir = resolve_real_path(&runtime_dir)?;

    let mount_point = runtime_dir.join("linglong").join("UAB").join(uuid);
    std::fs::create_dir_all(&mount_point)
        .map_err(|e| Error::syscall(format!("mkdir -p {} failed: {e}", mount_point.display())))?;

    cleanup::mark_created()?;
    cleanup::set_mount_point(&mount_point);

    Ok(mount_point)
}

/// Alternate constructor used only by tests, which need a mount point
/// without going through the real `$XDG_RUNTIME_DIR` resolution.
#[cfg(test)]
pub fn mount_point_under(base: &Path, uuid: &str) -> PathBuf {
    base.join("linglong").join("UAB").join(uuid)
}

/// Forks and execs `erofsfuse --offset=<bundle_offset> <self_path> <mount_point>`,
/// waiting for it to return. Non-zero exit is terminal (§4.1.6). Unless
/// `UAB_EROFSFUSE_VERBOSE` is set, the child's stdout/stderr are redirected
/// to a tmpfile rather than inherited.
pub fn mount_self_bundle(self_path: &Path, bundle_offset: u64, mount_point: &Path) -> Result<()> {
    let mut command = Command::new("erofsfuse");
    command.arg(format!("--offset={bundle_offset}")).arg(self_path).arg(mount_point);

    if std::env::var_os("UAB_EROFSFUSE_VERBOSE").is_none() {
        let sink = tempfile::tempfile()
            .map_err(|e| Error::syscall(format!("failed to open verbosity sink: {e}")))?;
        let sink_err = sink
            .try_clone()
            .map_err(|e| Error::syscall(format!("failed to dup verbosity sink: {e}")))?;
        command.stdout(Stdio::from(sink)).stderr(Stdio::from(sink_err));
    }

    let status = command
        .status()
        .map_err(|e| Error::syscall(format!("failed to exec erofsfuse: {e}")))?;

    if !status.success() {
        return Err(Error::syscall(format!("erofsfuse exited with {status}")));
    }

    cleanup::mark_mounted()?;
    Ok(())
}

/// `$XDG_RUNTIME_DIR/linglong/UAB/<uuid>`, the canonical mount point shape
/// quoted in spec §6.4 — exposed here so callers can predict the path before
/// mounting (e.g. to log it, or in tests).
pub fn expected_mount_point(uuid: &str) -> PathBuf {
    uab_mount_point(uuid)
}

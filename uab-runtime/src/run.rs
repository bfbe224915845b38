//! Argument parsing (§4.1.1), execution-choice dispatch (§4.1.7) and
//! extraction (§4.1.8).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use linglong_common::{Error, Result};

use crate::cleanup;
use crate::meta::Meta;

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    PrintMeta,
    Extract(PathBuf),
    Help,
    Run { loader_args: Vec<String> },
}

/// Parses `argv[1..]` into exactly one of `--extract=PATH`, `--print-meta`,
/// `--help`, or (default) a run with everything after a `--` separator
/// forwarded as loader args. More than one exclusive option is a contract
/// error (§4.1.1).
pub fn parse_args(args: &[String]) -> Result<Action> {
    let mut exclusive: Option<Action> = None;
    let mut loader_args = Vec::new();
    let mut past_separator = false;

    for arg in args {
        if past_separator {
            loader_args.push(arg.clone());
            continue;
        }
        if arg == "--" {
            past_separator = true;
            continue;
        }
        if let Some(path) = arg.strip_prefix("--extract=") {
            set_exclusive(&mut exclusive, Action::Extract(PathBuf::from(path)))?;
        } else if arg == "--print-meta" {
            set_exclusive(&mut exclusive, Action::PrintMeta)?;
        } else if arg == "--help" {
            set_exclusive(&mut exclusive, Action::Help)?;
        } else {
            return Err(Error::contract(format!("unrecognized option {arg}")));
        }
    }

    Ok(exclusive.unwrap_or(Action::Run { loader_args }))
}

fn set_exclusive(slot: &mut Option<Action>, action: Action) -> Result<()> {
    if slot.is_some() {
        return Err(Error::contract("more than one exclusive UAB option given"));
    }
    *slot = Some(action);
    Ok(())
}

pub const USAGE: &str = "\
Usage: uabBundle [options] [-- <loader args>]

  --extract=PATH   mount the bundle and copy its contents to PATH
  --print-meta     print the bundle's metadata JSON and exit
  --help           print this message and exit
  --               everything after this is passed to the embedded loader
";

/// Walks `PATH` looking for an `ll-cli` entry that is `S_IXOTH` (the exact
/// check the original `detectLinglong` makes — not a more permissive
/// executable-by-anyone-including-owner test).
pub fn detect_linglong() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join("ll-cli");
        if let Ok(meta) = std::fs::metadata(&candidate) {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & libc::S_IXOTH as u32 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

#[derive(serde::Deserialize)]
struct LlCliListEntry {
    id: String,
    channel: String,
    version: String,
    arch: Vec<String>,
}

/// `importSelf`: lists installed apps via `ll-cli --json list`, and installs
/// the bundle's own app layer only if its `channel:id/version/arch[0]`
/// reference isn't already present (§4.1.7).
pub fn import_self(ll_cli: &Path, self_path: &Path, meta: &Meta) -> Result<()> {
    let wanted_ref = meta.app_ref()?;

    let output = Command::new(ll_cli)
        .args(["--json", "list"])
        .output()
        .map_err(|e| Error::syscall(format!("failed to exec {}: {e}", ll_cli.display())))?;

    let already_installed = if output.status.success() {
        parse_installed_refs(&output.stdout).contains(&wanted_ref)
    } else {
        false
    };

    if !already_installed {
        let status = Command::new(ll_cli)
            .arg("install")
            .arg(self_path)
            .status()
            .map_err(|e| Error::syscall(format!("failed to exec {}: {e}", ll_cli.display())))?;
        if !status.success() {
            return Err(Error::syscall(format!("{} install exited with {status}", ll_cli.display())));
        }
    }

    Ok(())
}

fn parse_installed_refs(json: &[u8]) -> Vec<String> {
    let Ok(entries) = serde_json::from_slice::<Vec<LlCliListEntry>>(json) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|e| e.arch.first().map(|arch| format!("{}:{}/{}/{}", e.channel, e.id, e.version, arch)))
        .collect()
}

/// Delegation path: `execv`'s `ll-cli run <appID>`, replacing the process
/// image. Does not unmount first — there is nothing left to run cleanup
/// after a successful `exec`. Only returns (with an `Err`) if `exec` itself
/// failed, in which case the caller must still clean up.
pub fn run_app_linglong(ll_cli: &Path, app_id: &str) -> Result<()> {
    let ll_cli_c = CString::new(ll_cli.as_os_str().as_bytes()).expect("path has no NUL bytes");
    let run = CString::new("run").unwrap();
    let app_id_c = CString::new(app_id).expect("appID has no NUL bytes");
    let argv = [ll_cli_c.as_ptr(), run.as_ptr(), app_id_c.as_ptr(), std::ptr::null()];

    unsafe {
        libc::execv(ll_cli_c.as_ptr(), argv.as_ptr());
    }
    Err(Error::from_errno(&format!("execv {} failed", ll_cli.display())))
}

/// Non-delegation path: fork+exec `<mountPoint>/loader <loaderArgs>`, wait,
/// and forward its exit status to `cleanAndExit` (§4.1.7). Never returns.
pub fn run_app_loader(mount_point: &Path, loader_args: &[String]) -> ! {
    let loader_path = mount_point.join("loader");
    let status = Command::new(&loader_path).args(loader_args).status();

    match status {
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            cleanup::clean_and_exit(code);
        }
        Err(e) => {
            log::error!("failed to exec {}: {e}", loader_path.display());
            cleanup::clean_and_exit(-1);
        }
    }
}

/// `--extract=PATH`: copies the mounted bundle's contents into `PATH`,
/// preserving symlinks (§4.1.8). `PATH`'s parent must already exist; `PATH`
/// itself is created if absent and must otherwise be an empty directory.
pub fn extract_bundle(mount_point: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(Error::environment(format!(
            "extract destination's parent {} does not exist",
            parent.display()
        )));
    }

    if destination.exists() {
        if !destination.is_dir() {
            return Err(Error::contract(format!("{} exists and is not a directory", destination.display())));
        }
        let has_entries = std::fs::read_dir(destination)
            .map_err(|e| Error::syscall(format!("readdir {} failed: {e}", destination.display())))?
            .next()
            .is_some();
        if has_entries {
            return Err(Error::contract(format!("{} is not empty", destination.display())));
        }
    } else {
        std::fs::create_dir(destination)
            .map_err(|e| Error::syscall(format!("mkdir {} failed: {e}", destination.display())))?;
    }

    copy_preserving_symlinks(mount_point, destination)
}

fn copy_preserving_symlinks(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)
        .map_err(|e| Error::syscall(format!("readdir {} failed: {e}", src.display())))?
    {
        let entry = entry.map_err(|e| Error::syscall(format!("readdir entry failed: {e}")))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::syscall(format!("lstat {} failed: {e}", entry.path().display())))?;
        let dst_path = dst.join(entry.file_name());

        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map_err(|e| Error::syscall(format!("readlink {} failed: {e}", entry.path().display())))?;
            std::os::unix::fs::symlink(&target, &dst_path)
                .map_err(|e| Error::syscall(format!("symlink {} failed: {e}", dst_path.display())))?;
        } else if file_type.is_dir() {
            std::fs::create_dir(&dst_path)
                .map_err(|e| Error::syscall(format!("mkdir {} failed: {e}", dst_path.display())))?;
            copy_preserving_symlinks(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)
                .map_err(|e| Error::syscall(format!("copy to {} failed: {e}", dst_path.display())))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_print_meta() {
        let args = vec!["--print-meta".to_string()];
        assert_eq!(parse_args(&args).unwrap(), Action::PrintMeta);
    }

    #[test]
    fn parses_extract_with_path() {
        let args = vec!["--extract=/tmp/out".to_string()];
        assert_eq!(parse_args(&args).unwrap(), Action::Extract(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn splits_loader_args_after_separator() {
        let args = vec!["--".to_string(), "--help".to_string(), "foo".to_string()];
        assert_eq!(
            parse_args(&args).unwrap(),
            Action::Run { loader_args: vec!["--help".to_string(), "foo".to_string()] }
        );
    }

    #[test]
    fn rejects_more_than_one_exclusive_option() {
        let args = vec!["--print-meta".to_string(), "--help".to_string()];
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn extract_copies_files_and_symlinks() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("file.txt"), b"hello").unwrap();
        std::os::unix::fs::symlink("file.txt", src.path().join("link.txt")).unwrap();

        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("out");

        extract_bundle(src.path(), &dst).unwrap();

        assert_eq!(std::fs::read(dst.join("file.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read_link(dst.join("link.txt")).unwrap(), PathBuf::from("file.txt"));
    }

    #[test]
    fn extract_rejects_nonempty_destination() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("file.txt"), b"hello").unwrap();

        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join("existing"), b"x").unwrap();

        assert!(extract_bundle(src.path(), dst.path()).is_err());
    }
}

//! subuid/subgid parsing and the `clone(CLONE_NEWUSER|CLONE_NEWNS)` +
//! `newuidmap`/`newgidmap` dance, mirroring
//! `linglong::utils::namespace::{needRunInNamespace, runInNamespace}`.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Command;

use nix::sched::{clone, CloneFlags};
use nix::sys::signal::Signal;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{geteuid, read, write, Uid};

use crate::error::{Error, Result};

/// A single `subuid`/`subgid` range entry: `start` subordinate id, `count`
/// subordinate ids available from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubIdRange {
    pub start: u64,
    pub count: u64,
}

/// Parses `/etc/subuid`-style lines (`name_or_uid:start:count`), keeping only
/// entries whose first field exactly matches `name` or `uid` — a prefix match
/// like `"foo1"` starting with `"foo"` must not count, matching the original
/// `rfind(name + ":", 0) != 0` check.
pub fn parse_subid_ranges(contents: &str, uid: Uid, name: &str) -> Vec<SubIdRange> {
    let uid_str = uid.to_string();
    let mut ranges = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        let (owner, start, count) = match (fields.next(), fields.next(), fields.next()) {
            (Some(o), Some(s), Some(c)) => (o, s, c),
            _ => continue,
        };
        if owner != name && owner != uid_str {
            continue;
        }
        if let (Ok(start), Ok(count)) = (start.parse(), count.parse()) {
            ranges.push(SubIdRange { start, count });
        }
    }

    ranges
}

fn read_subid_file(path: &str, uid: Uid, name: &str) -> Result<Vec<SubIdRange>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::environment(format!("failed to read {path}: {e}")))?;
    Ok(parse_subid_ranges(&contents, uid, name))
}

/// Whether the caller needs to re-exec itself through [`run_in_namespace`]
/// to get a user+mount namespace, i.e. it isn't already privileged enough to
/// set one up directly.
pub fn needs_namespace() -> bool {
    !has_cap_sys_admin()
}

#[cfg(target_os = "linux")]
fn has_cap_sys_admin() -> bool {
    // CAP_SYS_ADMIN is bit 21; read it out of /proc/self/status rather than
    // linking libcap, which nothing in the workspace depends on.
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return false;
    };
    for line in status.lines() {
        if let Some(hex) = line.strip_prefix("CapEff:") {
            if let Ok(mask) = u64::from_str_radix(hex.trim(), 16) {
                return mask & (1 << 21) != 0;
            }
        }
    }
    false
}

#[cfg(not(target_os = "linux"))]
fn has_cap_sys_admin() -> bool {
    false
}

const HANDSHAKE_BYTE: [u8; 1] = [b'1'];

fn run_id_mapping_tool(tool: &str, pid: i32, ranges: &[SubIdRange]) -> Result<()> {
    let mut args = vec![pid.to_string(), "0".to_string(), geteuid().to_string(), "1".to_string()];
    let mut container_id = 1u64;
    for range in ranges {
        args.push(container_id.to_string());
        args.push(range.start.to_string());
        args.push(range.count.to_string());
        container_id += range.count;
    }

    let status = Command::new(tool)
        .args(&args)
        .status()
        .map_err(|e| Error::environment(format!("{tool} not runnable: {e}")))?;

    if !status.success() {
        return Err(Error::syscall(format!("{tool} exited with {status}")));
    }
    Ok(())
}

/// Reads and writes the one-byte handshake used to sequence the clone()'d
/// child against the parent's `newuidmap`/`newgidmap` calls.
fn handshake_read(fd: RawFd) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match read(fd, &mut byte) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(Error::syscall(format!("handshake read failed: {e}"))),
        }
    }
}

fn handshake_write(fd: &OwnedFd) -> Result<()> {
    loop {
        match write(fd, &HANDSHAKE_BYTE) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(Error::syscall(format!("handshake write failed: {e}"))),
        }
    }
}

/// Forks into a new user+mount namespace, maps the calling user's subordinate
/// uid/gid ranges onto it via `newuidmap`/`newgidmap`, then `execvp`s
/// `argv[0]` with the rest of `argv` inside the child. Only returns in the
/// parent, with the child's mapped exit status (normal exit code, or
/// `128 + signum` if it died to a signal).
pub fn run_in_namespace(argv: &[String], current_user: &str) -> Result<i32> {
    let uid = geteuid();

    let uid_ranges = read_subid_file("/etc/subuid", uid, current_user)?;
    let gid_ranges = read_subid_file("/etc/subgid", uid, current_user)?;
    if uid_ranges.is_empty() || gid_ranges.is_empty() {
        return Err(Error::environment(format!(
            "no subordinate id range found for {current_user} ({uid})"
        )));
    }

    let (parent_sock, child_sock) =
        socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())
            .map_err(|e| Error::syscall(format!("socketpair failed: {e}")))?;

    let cstr_argv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).expect("argv has no NUL bytes"))
        .collect();

    let mut stack = vec![0u8; 1024 * 1024];
    let child_sock_fd = child_sock.as_raw_fd();

    let mut child_body = move || -> isize {
        let _ = handshake_write(&child_sock);
        if handshake_read(child_sock_fd).is_err() {
            return 126;
        }

        let Some((prog, rest)) = cstr_argv.split_first() else {
            return 127;
        };
        let mut full_argv = vec![prog.clone()];
        full_argv.extend(rest.iter().cloned());
        match nix::unistd::execvp(prog, &full_argv) {
            Ok(_) => 0,
            Err(_) => 127,
        }
    };

    let child_pid = unsafe {
        clone(
            Box::new(&mut child_body),
            &mut stack,
            CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUSER,
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| Error::syscall(format!("clone failed: {e}")))?;

    handshake_read(parent_sock.as_raw_fd())?;

    run_id_mapping_tool("newuidmap", child_pid.as_raw(), &uid_ranges)?;
    run_id_mapping_tool("newgidmap", child_pid.as_raw(), &gid_ranges)?;

    handshake_write(&parent_sock)?;

    loop {
        match waitpid(child_pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(Error::syscall(format!("waitpid failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_owner_match_only() {
        let contents = "foo:100000:65536\nfoo1:200000:65536\n1000:300000:65536\n";
        let ranges = parse_subid_ranges(contents, Uid::from_raw(1000), "foo");
        assert_eq!(ranges, vec![SubIdRange { start: 100000, count: 65536 }]);

        let by_uid = parse_subid_ranges(contents, Uid::from_raw(1000), "bar");
        assert_eq!(by_uid, vec![SubIdRange { start: 300000, count: 65536 }]);
    }

    #[test]
    fn ignores_blank_and_comment_lines() {
        let contents = "# comment\n\nfoo:100000:65536\n";
        let ranges = parse_subid_ranges(contents, Uid::from_raw(1000), "foo");
        assert_eq!(ranges.len(), 1);
    }
}

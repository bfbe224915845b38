//! Shared diagnostic type for the UAB runtime and the OCI generator pipeline.
//!
//! Mirrors the error-kind taxonomy in the design: malformed input, integrity
//! violations, missing environment, syscall failure, contract violation and
//! permission problems all flow through the same enum so callers can match
//! on `kind()` without caring which subsystem raised it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing ELF section, JSON parse failure, wrong ociVersion.
    Malformed,
    /// SHA-256 digest mismatch between metadata and bundle bytes.
    Integrity,
    /// No XDG_RUNTIME_DIR/writable /tmp, ll-cli absent from PATH, etc.
    Environment,
    /// fork/execv/realpath/stat/mount/sendmsg/recvmsg failed.
    Syscall,
    /// Duplicate env-var emission, stage ran on the wrong ociVersion, etc.
    Contract,
    /// Path exists but isn't owned by / accessible to the current user.
    Permission,
}

#[derive(Debug, thiserror::Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn environment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Environment, message)
    }

    pub fn syscall(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syscall, message)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Contract, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Wraps the last `errno` into a syscall error, the way the original
    /// CLI tacks `strerror(errno)` onto every failed libc call.
    pub fn from_errno(context: &str) -> Self {
        let errno = std::io::Error::last_os_error();
        Self::syscall(format!("{context}: {errno}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::syscall(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

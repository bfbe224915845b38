//! Shared utilities for `uab-runtime` and `oci-gen`: the error type, XDG
//! runtime-dir path helpers, fd-passing over `AF_UNIX`, and subuid/subgid +
//! user-namespace setup.

pub mod dir;
pub mod error;
pub mod idmap;
pub mod ipc;

pub use error::{Error, ErrorKind, Result};

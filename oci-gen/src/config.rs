//! The pipeline's subject value. Spec §3 describes the OCI Config as a
//! structured document with a handful of semantic fields; we keep it as
//! `oci_spec::runtime::Spec` at the boundary (load/save, and the final type
//! handed to the container runtime) but manipulate it internally as
//! `serde_json::Value`, since `10-basics`/`25-host-rootfs` need JSON-Pointer
//! patching and every other stage only ever touches a handful of
//! well-defined fields anyway.

use std::collections::BTreeMap;

use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use linglong_common::{Error, Result};

pub const REQUIRED_OCI_VERSION: &str = "1.0.1";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MountEntry {
    pub destination: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn new(destination: impl Into<String>) -> Self {
        Self { destination: destination.into(), typ: None, source: None, options: Vec::new() }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn typ(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    pub fn options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdMapping {
    #[serde(rename = "containerID")]
    pub container_id: u32,
    #[serde(rename = "hostID")]
    pub host_id: u32,
    pub size: u32,
}

/// The pipeline's subject. Stages get `&mut Config` and either mutate it in
/// place or return an error, per §4.2.1.
pub struct Config {
    value: Value,
}

impl Config {
    pub fn from_spec(spec: &Spec) -> Result<Self> {
        Ok(Self { value: serde_json::to_value(spec)? })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self { value: serde_json::from_str(json)? })
    }

    pub fn to_spec(&self) -> Result<Spec> {
        serde_json::from_value(self.value.clone()).map_err(Error::from)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn oci_version(&self) -> Option<&str> {
        self.value.get("ociVersion").and_then(Value::as_str)
    }

    /// §3 invariant: "ociVersion never changes inside the pipeline; any
    /// stage observing a mismatch rejects without mutating."
    pub fn require_oci_version(&self) -> Result<()> {
        match self.oci_version() {
            Some(v) if v == REQUIRED_OCI_VERSION => Ok(()),
            Some(other) => Err(Error::contract(format!("unexpected ociVersion {other}"))),
            None => Err(Error::contract("config has no ociVersion")),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.value.pointer(&format!("/annotations/{}", escape_pointer_token(key))).and_then(Value::as_str)
    }

    pub fn annotation_is_true(&self, key: &str) -> bool {
        self.annotation(key) == Some("true")
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        let annotations = self
            .value
            .as_object_mut()
            .expect("config root is always an object")
            .entry("annotations")
            .or_insert_with(|| Value::Object(Default::default()));
        annotations
            .as_object_mut()
            .expect("annotations is always an object")
            .insert(key.to_string(), Value::String(value.into()));
    }

    pub fn mounts(&self) -> Vec<MountEntry> {
        self.value
            .get("mounts")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default()
    }

    pub fn push_mount(&mut self, mount: MountEntry) {
        let mounts = self
            .value
            .as_object_mut()
            .expect("config root is always an object")
            .entry("mounts")
            .or_insert_with(|| Value::Array(Vec::new()));
        mounts
            .as_array_mut()
            .expect("mounts is always an array")
            .push(serde_json::to_value(mount).expect("MountEntry always serializes"));
    }

    pub fn env(&self) -> Vec<String> {
        self.value
            .pointer("/process/env")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// §3 invariant: each HOME-family env var is written exactly once;
    /// pre-existing occurrence is a fatal contract error.
    pub fn push_env_unique(&mut self, key: &str, value: &str) -> Result<()> {
        let entries = self
            .value
            .as_object_mut()
            .expect("config root is always an object")
            .entry("process")
            .or_insert_with(|| Value::Object(Default::default()))
            .as_object_mut()
            .expect("process is always an object")
            .entry("env")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("env is always an array");

        let prefix = format!("{key}=");
        if entries.iter().any(|v| v.as_str().is_some_and(|s| s.starts_with(&prefix))) {
            return Err(Error::contract(format!("{key} already present in process.env")));
        }
        entries.push(Value::String(format!("{key}={value}")));
        Ok(())
    }

    pub fn set_uid_mappings(&mut self, mappings: &[IdMapping]) -> Result<()> {
        self.set_linux_field("uidMappings", mappings)
    }

    pub fn set_gid_mappings(&mut self, mappings: &[IdMapping]) -> Result<()> {
        self.set_linux_field("gidMappings", mappings)
    }

    fn set_linux_field(&mut self, field: &str, mappings: &[IdMapping]) -> Result<()> {
        let linux = self
            .value
            .as_object_mut()
            .expect("config root is always an object")
            .entry("linux")
            .or_insert_with(|| Value::Object(Default::default()))
            .as_object_mut()
            .expect("linux is always an object");
        linux.insert(field.to_string(), serde_json::to_value(mappings)?);
        Ok(())
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.value
            .get("annotations")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::from_json_str(
            r#"{"ociVersion":"1.0.1","annotations":{"org.deepin.linglong.appID":""},"mounts":[],"process":{"env":[],"args":["bash"],"cwd":"/"}}"#,
        )
        .unwrap()
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let config = Config::from_json_str(r#"{"ociVersion":"1.0.0"}"#).unwrap();
        assert!(config.require_oci_version().is_err());
    }

    #[test]
    fn env_write_is_exactly_once() {
        let mut config = base_config();
        config.push_env_unique("HOME", "/home/alice").unwrap();
        assert!(config.push_env_unique("HOME", "/home/alice").is_err());
        assert_eq!(config.env(), vec!["HOME=/home/alice".to_string()]);
    }

    #[test]
    fn mounts_round_trip() {
        let mut config = base_config();
        config.push_mount(MountEntry::new("/home").typ("tmpfs").options(["nodev", "nosuid"]));
        let mounts = config.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].destination, "/home");
        assert_eq!(mounts[0].typ.as_deref(), Some("tmpfs"));
    }

    #[test]
    fn annotation_lookup_handles_dotted_keys() {
        let config = base_config();
        assert_eq!(config.annotation("org.deepin.linglong.appID"), Some(""));
    }
}

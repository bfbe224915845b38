//! The `linglong.meta` JSON schema (spec §3) and its load path (§4.1.3).

use std::fs::File;

use linglong_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::digest::digest_file_range;
use crate::elf::require_section;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: String,
    pub channel: String,
    pub version: String,
    pub arch: Vec<String>,
    pub kind: LayerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    App,
    Runtime,
    Base,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub info: LayerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sections {
    pub bundle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub uuid: String,
    pub digest: String,
    pub sections: Sections,
    pub layers: Vec<Layer>,
}

impl Meta {
    /// The single layer with `kind == "app"`. Schema invariant: exactly one
    /// such layer exists; a missing or duplicated one is malformed input.
    pub fn app_layer(&self) -> Result<&Layer> {
        let mut apps = self.layers.iter().filter(|l| l.info.kind == LayerKind::App);
        let first = apps.next().ok_or_else(|| Error::malformed("no app-kind layer in metadata"))?;
        if apps.next().is_some() {
            return Err(Error::malformed("more than one app-kind layer in metadata"));
        }
        Ok(first)
    }

    /// `channel:id/version/arch[0]`, the reference form `importSelf` compares
    /// against `ll-cli --json list`'s output.
    pub fn app_ref(&self) -> Result<String> {
        let layer = self.app_layer()?;
        let arch = layer
            .info
            .arch
            .first()
            .ok_or_else(|| Error::malformed("app layer has no arch entries"))?;
        Ok(format!("{}:{}/{}/{}", layer.info.channel, layer.info.id, layer.info.version, arch))
    }
}

/// Locates `linglong.meta`, reads and parses it — §4.1.3.
pub fn load_meta(self_path: &std::path::Path) -> Result<Meta> {
    let section = require_section(self_path, "linglong.meta")?;
    let mut file = File::open(self_path)
        .map_err(|e| Error::syscall(format!("open {} failed: {e}", self_path.display())))?;

    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(section.offset))
        .map_err(|e| Error::syscall(format!("seek failed: {e}")))?;
    let mut buf = vec![0u8; section.size as usize];
    file.read_exact(&mut buf).map_err(|e| Error::malformed(format!("short metadata read: {e}")))?;

    serde_json::from_slice(&buf).map_err(Error::from)
}

/// Verifies the bundle section's SHA-256 against `meta.digest` — §4.1.4.
/// Returns `Ok(())` on match, `Err` with both digests in the message
/// otherwise (§8 Scenario C requires both to be visible to the caller).
pub fn verify_bundle_digest(self_path: &std::path::Path, meta: &Meta) -> Result<()> {
    let section = require_section(self_path, &meta.sections.bundle)?;
    let mut file = File::open(self_path)
        .map_err(|e| Error::syscall(format!("open {} failed: {e}", self_path.display())))?;

    let actual = digest_file_range(&mut file, section.offset, section.size)?;
    if actual != meta.digest {
        return Err(Error::integrity(format!(
            "bundle digest mismatch: expected {}, got {actual}",
            meta.digest
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(kind_a: &str, kind_b: Option<&str>) -> String {
        let mut layers = format!(
            r#"{{"info":{{"id":"org.app","channel":"main","version":"1.0.0","arch":["x86_64"],"kind":"{kind_a}"}}}}"#
        );
        if let Some(kind_b) = kind_b {
            layers = format!(
                r#"{layers},{{"info":{{"id":"org.runtime","channel":"main","version":"1.0.0","arch":["x86_64"],"kind":"{kind_b}"}}}}"#
            );
        }
        format!(
            r#"{{"uuid":"abc","digest":"00","sections":{{"bundle":"linglong.bundle"}},"layers":[{layers}]}}"#
        )
    }

    #[test]
    fn parses_app_layer_and_builds_ref() {
        let meta: Meta = serde_json::from_str(&sample_meta("app", Some("runtime"))).unwrap();
        assert_eq!(meta.app_ref().unwrap(), "main:org.app/1.0.0/x86_64");
    }

    #[test]
    fn rejects_metadata_without_app_layer() {
        let meta: Meta = serde_json::from_str(&sample_meta("runtime", None)).unwrap();
        assert!(meta.app_layer().is_err());
    }

    #[test]
    fn rejects_metadata_with_two_app_layers() {
        let meta: Meta = serde_json::from_str(&sample_meta("app", Some("app"))).unwrap();
        assert!(meta.app_layer().is_err());
    }
}

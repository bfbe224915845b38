//! `05-initialize`: supplies the base config skeleton (§4.2.2), grounded on
//! `builtins.h`'s literal `initConfig` JSON template.
//!
//! Fields are filled in only where absent, rather than assigned wholesale —
//! lexicographic stage ordering (§4.2.1) runs `00-id-mapping` before this
//! one, and a wholesale overwrite here would silently discard its
//! `uidMappings`/`gidMappings`. Filling in defaults is idempotent regardless
//! of which stage the pipeline runs first.

use linglong_common::Result;
use serde_json::{json, Value};

use crate::{Config, Stage};

pub struct Initialize;

impl Stage for Initialize {
    fn name(&self) -> &'static str {
        "05-initialize"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        let root = config.value_mut().as_object_mut().expect("config root is always an object");

        root.entry("hostname").or_insert_with(|| json!("linglong"));
        root.entry("root").or_insert_with(|| json!({"path": ""}));
        root.entry("mounts").or_insert_with(|| json!([]));

        let annotations =
            root.entry("annotations").or_insert_with(|| Value::Object(Default::default()));
        annotations
            .as_object_mut()
            .expect("annotations is always an object")
            .entry("org.deepin.linglong.appID")
            .or_insert_with(|| json!(""));

        let linux = root.entry("linux").or_insert_with(|| Value::Object(Default::default()));
        linux
            .as_object_mut()
            .expect("linux is always an object")
            .entry("namespaces")
            .or_insert_with(|| {
                json!([{"type": "pid"}, {"type": "mount"}, {"type": "uts"}, {"type": "user"}])
            });

        let process = root.entry("process").or_insert_with(|| Value::Object(Default::default()));
        let process = process.as_object_mut().expect("process is always an object");
        process.entry("cwd").or_insert_with(|| json!("/"));
        process.entry("args").or_insert_with(|| json!(["bash"]));
        let env = process.entry("env").or_insert_with(|| json!([])).as_array_mut().expect("env is an array");
        if !env.iter().any(|v| v.as_str().is_some_and(|s| s.starts_with("LINGLONG_LD_SO_CACHE="))) {
            env.push(json!("LINGLONG_LD_SO_CACHE=/run/linglong/cache/ld.so.cache"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_in_base_skeleton() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"1.0.1"}"#).unwrap();
        Initialize.generate(&mut config).unwrap();

        assert_eq!(config.oci_version(), Some("1.0.1"));
        assert_eq!(config.annotation("org.deepin.linglong.appID"), Some(""));
        assert!(config.env().iter().any(|e| e == "LINGLONG_LD_SO_CACHE=/run/linglong/cache/ld.so.cache"));
    }

    #[test]
    fn does_not_clobber_prior_uid_mappings() {
        let mut config = Config::from_json_str(
            r#"{"ociVersion":"1.0.1","linux":{"uidMappings":[{"containerID":0,"hostID":1000,"size":1}]}}"#,
        )
        .unwrap();
        Initialize.generate(&mut config).unwrap();
        assert!(config.value().pointer("/linux/uidMappings").is_some());
        assert!(config.value().pointer("/linux/namespaces").is_some());
    }

    #[test]
    fn rejects_wrong_oci_version() {
        let mut config = Config::from_json_str(r#"{"ociVersion":"0.9"}"#).unwrap();
        assert!(Initialize.generate(&mut config).is_err());
    }
}

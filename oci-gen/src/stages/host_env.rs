//! `25-host-env`: applies an env-var allowlist/denylist to `process.env`
//! (§2 table — the spec gives this stage only a one-line summary; the exact
//! lists below are a design decision recorded in DESIGN.md).

use linglong_common::Result;

use crate::{Config, Stage};

pub struct HostEnv;

/// Vars copied from the host environment into the container when present
/// there and not already set by an earlier stage.
const ALLOWLIST: &[&str] = &["TERM", "LANG", "LANGUAGE", "TZ", "COLORTERM"];

/// Vars stripped from `process.env` if an earlier stage introduced them —
/// these would let a guest process escape the bundle's own library search
/// path.
const DENYLIST: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "BASH_ENV", "ENV"];

impl Stage for HostEnv {
    fn name(&self) -> &'static str {
        "25-host-env"
    }

    fn generate(&self, config: &mut Config) -> Result<()> {
        config.require_oci_version()?;

        let existing = config.env();
        let has_key = |entries: &[String], key: &str| {
            let prefix = format!("{key}=");
            entries.iter().any(|e| e.starts_with(&prefix))
        };

        for &key in ALLOWLIST {
            if has_key(&existing, key) {
                continue;
            }
            if let Ok(value) = std::env::var(key) {
                config.push_env_unique(key, &value)?;
            }
        }

        if DENYLIST.iter().any(|&key| has_key(&existing, key)) {
            let filtered: Vec<String> = existing
                .into_iter()
                .filter(|e| !DENYLIST.iter().any(|&key| e.starts_with(&format!("{key}="))))
                .collect();
            config
                .value_mut()
                .pointer_mut("/process")
                .and_then(|p| p.as_object_mut())
                .map(|p| p.insert("env".to_string(), serde_json::to_value(filtered).unwrap()));
        }

        Ok(())
    }
}

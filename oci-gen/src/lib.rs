//! The OCI config generator pipeline: an ordered chain of named
//! transformations applied to a base runtime config (spec §4.2).

pub mod config;
pub mod jsonpatch;
pub mod stages;

use linglong_common::Result;

pub use config::Config;

/// One named transformation. `generate` mutating `config` in place and
/// returning `Err` aborts the pipeline — the original's `bool` return
/// becomes a `Result` here so the failing stage can carry a diagnostic
/// (spec §7 "the pipeline driver stops and reports which stage failed").
pub trait Stage {
    fn name(&self) -> &'static str;
    fn generate(&self, config: &mut Config) -> Result<()>;
}

/// The nine stages in their fixed application order — lexicographic by
/// numeric prefix, per §4.2.1.
pub fn builtin_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(stages::id_mapping::IdMapping),
        Box::new(stages::initialize::Initialize),
        Box::new(stages::basics::Basics),
        Box::new(stages::devices::Devices),
        Box::new(stages::host_env::HostEnv),
        Box::new(stages::host_rootfs::HostRootfs),
        Box::new(stages::host_statics::HostStatics),
        Box::new(stages::user_home::UserHome),
        Box::new(stages::host_ipc::HostIpc),
        Box::new(stages::legacy::Legacy),
    ]
}

/// Runs every stage of `stages` against `config` in order, stopping at the
/// first failure. Returns the name of the stage that failed, paired with
/// its error, so callers can report "stage X failed: Y" (§7).
pub fn run_pipeline(config: &mut Config, stages: &[Box<dyn Stage>]) -> std::result::Result<(), (&'static str, linglong_common::Error)> {
    for stage in stages {
        stage.generate(config).map_err(|e| (stage.name(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_stages_are_in_numeric_order() {
        let names: Vec<&str> = builtin_stages().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "00-id-mapping",
                "05-initialize",
                "10-basics",
                "20-devices",
                "25-host-env",
                "25-host-rootfs",
                "25-host-statics",
                "30-user-home",
                "40-host-ipc",
                "90-legacy",
            ]
        );
    }
}

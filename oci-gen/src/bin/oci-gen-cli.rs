//! Thin driver for manually exercising the OCI config generator pipeline
//! outside of a real container launch — feeds in annotations, runs a
//! chosen subset of stages (default: all of them, in order), and prints
//! the resulting config.

use clap::Parser;
use oci_gen::{Config, Stage};

#[derive(Parser, Debug)]
#[command(version, about = "Run the linglong OCI config generator pipeline", long_about = None)]
struct Args {
    /// Path to a base OCI config JSON file; defaults to the 05-initialize skeleton.
    #[arg(long)]
    input: Option<std::path::PathBuf>,

    /// `key=value` annotation to set on the base config before running stages.
    /// May be given multiple times.
    #[arg(long = "annotation", value_parser = parse_annotation)]
    annotations: Vec<(String, String)>,

    /// Stage name to run (e.g. `20-devices`); may be given multiple times.
    /// Defaults to every builtin stage in order.
    #[arg(long = "stage")]
    stages: Vec<String>,
}

fn parse_annotation(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.input {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .unwrap_or_else(|e| fatal(&format!("failed to read {}: {e}", path.display())));
            Config::from_json_str(&contents).unwrap_or_else(|e| fatal(&e.to_string()))
        }
        None => Config::from_json_str(r#"{"ociVersion":"1.0.1"}"#).unwrap_or_else(|e| fatal(&e.to_string())),
    };

    for (key, value) in &args.annotations {
        config.set_annotation(key, value.clone());
    }

    let all_stages = oci_gen::builtin_stages();
    let selected: Vec<Box<dyn Stage>> = if args.stages.is_empty() {
        all_stages
    } else {
        all_stages.into_iter().filter(|s| args.stages.iter().any(|name| name == s.name())).collect()
    };

    if let Err((stage, err)) = oci_gen::run_pipeline(&mut config, &selected) {
        fatal(&format!("stage {stage} failed: {err}"));
    }

    match config.to_spec().and_then(|spec| Ok(serde_json::to_string_pretty(&spec)?)) {
        Ok(json) => println!("{json}"),
        Err(e) => fatal(&format!("failed to serialize result: {e}")),
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

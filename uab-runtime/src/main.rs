use uab_runtime::run::Action;
use uab_runtime::{cleanup, meta, mount, run};

fn main() {
    env_logger::init();
    cleanup::install_signal_handlers();

    let self_path = match std::env::current_exe() {
        Ok(p) => p,
        Err(e) => fatal(&format!("failed to resolve own executable path: {e}")),
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = match run::parse_args(&args) {
        Ok(a) => a,
        Err(e) => fatal(&e.to_string()),
    };

    if action == Action::Help {
        print!("{}", run::USAGE);
        std::process::exit(0);
    }

    let metadata = match meta::load_meta(&self_path) {
        Ok(m) => m,
        Err(e) => fatal(&e.to_string()),
    };

    if action == Action::PrintMeta {
        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => println!("{json}"),
            Err(e) => fatal(&format!("failed to serialize metadata: {e}")),
        }
        std::process::exit(0);
    }

    if let Err(e) = meta::verify_bundle_digest(&self_path, &metadata) {
        eprintln!("{e}");
        cleanup::clean_and_exit(-1);
    }

    let mount_point = match mount::create_mount_point(&metadata.uuid) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            cleanup::clean_and_exit(-1);
        }
    };

    let bundle_section = match uab_runtime::elf::require_section(&self_path, &metadata.sections.bundle) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            cleanup::clean_and_exit(-1);
        }
    };

    if let Err(e) = mount::mount_self_bundle(&self_path, bundle_section.offset, &mount_point) {
        eprintln!("{e}");
        cleanup::clean_and_exit(-1);
    }

    match action {
        Action::Extract(destination) => {
            let status = match run::extract_bundle(&mount_point, &destination) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("{e}");
                    -1
                }
            };
            cleanup::clean_and_exit(status);
        }
        Action::Run { loader_args } => dispatch_run(&self_path, &metadata, &mount_point, loader_args),
        Action::PrintMeta | Action::Help => unreachable!("handled above"),
    }
}

fn dispatch_run(
    self_path: &std::path::Path,
    metadata: &meta::Meta,
    mount_point: &std::path::Path,
    loader_args: Vec<String>,
) -> ! {
    if let Some(ll_cli) = run::detect_linglong() {
        let app_id = match metadata.app_layer() {
            Ok(layer) => layer.info.id.clone(),
            Err(e) => {
                eprintln!("{e}");
                cleanup::clean_and_exit(-1);
            }
        };

        if let Err(e) = run::import_self(&ll_cli, self_path, metadata) {
            eprintln!("{e}");
            cleanup::clean_and_exit(-1);
        }

        // execv replaces this process image on success; cleanup only runs
        // if exec itself failed.
        if let Err(e) = run::run_app_linglong(&ll_cli, &app_id) {
            eprintln!("{e}");
            cleanup::clean_and_exit(-1);
        }
        unreachable!("run_app_linglong only returns on error");
    }

    run::run_app_loader(mount_point, &loader_args)
}

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

//! Binary entry point: parses the CLI, loads configuration, builds a
//! [`agingcore::Core`] and starts every requested project until `ctrl_c`.

use std::sync::Arc;

use clap::Parser;

use agingcore::app::{build_core, init_logging, install_shutdown_handler, load_config, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (function_config, documents) = load_config(&cli)?;
    init_logging(&function_config);

    let core = Arc::new(build_core(&function_config, &documents, &cli)?);
    install_shutdown_handler(Arc::clone(&core))?;

    let names: Vec<String> = if cli.projects.is_empty() { documents.project.keys().cloned().collect() } else { cli.projects.clone() };
    for name in &names {
        core.start(name)?;
        tracing::info!(project = %name, "group started");
    }

    // Park the main thread; the scheduler, dispatch and poll threads do the
    // actual work until `ctrl_c` calls `Core::shutdown_all`.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

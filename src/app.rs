//! Ambient application layer: CLI surface, logging initialization and the
//! wiring that turns on-disk configuration into a running [`crate::Core`].
//!
//! This is the layer a binary entry point calls into; it owns nothing that
//! the library itself needs, so it stays out of [`crate::core`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::archive::{Archive, NullArchive};
use crate::bus::{CanTransport, TestTransport};
use crate::codec::{SignalDatabase, StaticSignalDatabase};
use crate::config::{FunctionConfig, ProjectConfig, ProjectsDocument};
use crate::core::{Core, ProjectDeps};
use crate::diag::transport::mock::{MockScript, MockStackFactory};
use crate::diag::DiagStackFactory;
use crate::error::{ConfigError, CoreError};
use crate::power::{NullPowerSupply, PowerSupply};
use crate::security::unimplemented_algorithm;

/// Command-line surface for the aging-room controller binary.
#[derive(Debug, Parser)]
#[command(name = "aging-core", about = "Industrial aging-room controller core")]
pub struct Cli {
    /// Path to the function-level configuration (CAN interface, UI detail).
    #[arg(long, default_value = "function.toml")]
    pub function_config: PathBuf,

    /// Path to the projects document (`[project.<name>]` sections).
    #[arg(long, default_value = "projects.toml")]
    pub projects_config: PathBuf,

    /// Project(s) to start. Defaults to every project in the document.
    #[arg(long = "project")]
    pub projects: Vec<String>,
}

/// Initializes `tracing` at the level named by `function_config.log_level`
/// (design §6 "Function config ... logging level/path"). Falls back to
/// `info` on an unrecognized level rather than failing startup over a
/// cosmetic setting.
pub fn init_logging(function_config: &FunctionConfig) {
    let filter = EnvFilter::try_new(&function_config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Loads both configuration documents from the paths named on `cli`.
pub fn load_config(cli: &Cli) -> Result<(FunctionConfig, ProjectsDocument), ConfigError> {
    let function_config = FunctionConfig::load(&cli.function_config)?;
    let projects = ProjectsDocument::load(&cli.projects_config)?;
    Ok((function_config, projects))
}

/// Builds the in-memory stand-ins used when no real CAN interface, DBC
/// database or ISO-TP stack is wired up: an in-memory loopback transport, an
/// empty signal database, a mock diagnostic stack and no-op power supply.
/// Production embedders replace this with their own [`ProjectDeps`],
/// typically built from the `socketcan-transport` feature's transport and a
/// real `.dbc`-backed [`SignalDatabase`].
pub fn stub_project_deps(_project: &ProjectConfig) -> ProjectDeps {
    let transport = Arc::new(std::sync::Mutex::new(TestTransport::new()));
    let database: Arc<dyn SignalDatabase> = Arc::new(StaticSignalDatabase::new(Vec::new()));
    let diag_factory: Arc<dyn DiagStackFactory> = Arc::new(MockStackFactory::new(MockScript::new()));
    let power_supply: Arc<dyn PowerSupply> = Arc::new(NullPowerSupply);
    ProjectDeps {
        transport: transport as Arc<std::sync::Mutex<dyn CanTransport>>,
        database,
        diag_factory,
        security_algorithm: unimplemented_algorithm(),
        power_supply,
    }
}

/// Assembles a [`Core`] from the named projects (or every project in the
/// document, if `cli.projects` is empty), using [`stub_project_deps`] for
/// every collaborator a real deployment would supply externally.
pub fn build_core(function_config: &FunctionConfig, documents: &ProjectsDocument, cli: &Cli) -> Result<Core, CoreError> {
    let names: Vec<String> = if cli.projects.is_empty() {
        documents.project.keys().cloned().collect()
    } else {
        cli.projects.clone()
    };

    let mut projects = BTreeMap::new();
    for name in names {
        let project = documents.project(&name)?.clone();
        let deps = stub_project_deps(&project);
        projects.insert(name, (project, deps));
    }

    let archive: Arc<dyn Archive> = Arc::new(NullArchive);
    Core::build(function_config, projects, archive)
}

/// Registers a `ctrl_c` handler that stops every project's group. Returns
/// immediately; the actual shutdown happens on the signal thread.
pub fn install_shutdown_handler(core: Arc<Core>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received, stopping all groups");
        core.shutdown_all();
    })
}

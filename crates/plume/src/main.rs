use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, error, info};

use plume_core::kernel::constants::{APP_NAME, APP_VERSION};
use plume_core::{DefaultPluginManager, HostConfig, KernelError, PluginManager, PluginState, PluginView};

/// Plume: discover, activate and inspect plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Host configuration file (.json, .toml or .yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for plugins; may be repeated. Replaces the configured list.
    #[arg(long = "plugin-dir", global = true)]
    plugin_dirs: Vec<PathBuf>,

    /// Directory holding the plugin cache and the active plugin list
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Loader for descriptors that don't declare one
    #[arg(long, global = true)]
    default_loader: Option<String>,

    /// Don't activate plugins discovered for the first time
    #[arg(long, global = true)]
    no_activate_new: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rescan the plugin directories and report what was found
    Scan,
    /// List known plugins
    List {
        /// Only show active plugins
        #[arg(long)]
        active: bool,
    },
    /// Show everything known about a plugin
    Info {
        id: String,
    },
    /// Activate plugins; they stay active in later runs
    Activate {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Deactivate plugins
    Deactivate {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Open a file with the best matching plugin
    Open {
        path: PathBuf,
    },
    /// Save a file through a plugin's file saver
    Save {
        path: PathBuf,
        /// Format id (`plugin:service`) of the saver to use
        #[arg(long)]
        format: Option<String>,
    },
}

fn load_config(args: &CliArgs) -> Result<HostConfig, KernelError> {
    let mut config = match &args.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    if !args.plugin_dirs.is_empty() {
        config.plugin_dirs = args.plugin_dirs.clone();
    }
    if let Some(state_dir) = &args.state_dir {
        config.state_dir = state_dir.clone();
    }
    if args.default_loader.is_some() {
        config.default_loader = args.default_loader.clone();
    }
    if args.no_activate_new {
        config.activate_new = false;
    }
    if config.locale.is_none() {
        config.locale = std::env::var("LANG").ok().filter(|l| !l.is_empty());
    }
    Ok(config)
}

fn print_plugin(plugin: &PluginView) {
    let version = plugin.version.as_deref().unwrap_or("-");
    let loaded = if plugin.loaded { ", loaded" } else { "" };
    println!("  - {} {} [{}{}] {}", plugin.id, version, plugin.state, loaded, plugin.display_name());
}

fn print_details(plugin: &PluginView) {
    println!("Plugin: {}", plugin.id);
    println!("  Name: {}", plugin.display_name());
    if let Some(description) = plugin.description.as_deref().filter(|d| !d.is_empty()) {
        println!("  Description: {}", description);
    }
    println!("  Version: {}", plugin.version.as_deref().unwrap_or("-"));
    println!("  Directory: {}", plugin.directory.display());
    println!("  State: {}", plugin.state);
    println!("  Loaded: {}", plugin.loaded);
    println!("  Used by: {} active plugin(s)", plugin.use_count);
    if let Some(loader) = &plugin.loader {
        println!("  Loader: {}", loader);
    }
    if plugin.dependencies.is_empty() {
        println!("  Dependencies: none");
    } else {
        println!("  Dependencies:");
        for dep in &plugin.dependencies {
            println!("    - {}", dep);
        }
    }
    if !plugin.services.is_empty() {
        println!("  Services:");
        for service in &plugin.services {
            let state = if service.active { "active" } else { "inactive" };
            println!("    - {} ({}, {})", service.id, service.kind, state);
        }
    }
}

async fn run_command(manager: &DefaultPluginManager, command: Commands) -> Result<(), KernelError> {
    match command {
        Commands::Scan => {
            let plugins = manager.list_plugins().await?;
            let active = plugins.iter().filter(|p| p.state == PluginState::Active).count();
            println!("Found {} plugin(s), {} active", plugins.len(), active);
            for dir in manager.search_dirs() {
                debug!("Searched {}", dir.display());
            }
        }
        Commands::List { active } => {
            let plugins = if active {
                manager.list_active().await?
            } else {
                manager.list_plugins().await?
            };
            if plugins.is_empty() {
                println!("No plugins found.");
            }
            for plugin in &plugins {
                print_plugin(plugin);
            }
        }
        Commands::Info { id } => {
            let plugin = manager.describe_plugin(&id).await?;
            print_details(&plugin);
        }
        Commands::Activate { ids } => {
            manager.activate(&ids).await?;
            println!("Activated: {}", ids.join(", "));
        }
        Commands::Deactivate { ids } => {
            manager.deactivate(&ids).await?;
            println!("Deactivated: {}", ids.join(", "));
        }
        Commands::Open { path } => {
            let format = manager.open_file(&path).await?;
            println!("Opened {} as {}", path.display(), format);
        }
        Commands::Save { path, format } => {
            let used = manager.save_file(&path, format.as_deref()).await?;
            println!("Saved {} as {}", path.display(), used);
        }
    }
    Ok(())
}

fn report(context: &str, err: &KernelError) {
    error!("{}: {}", context, err);
    eprintln!("{}: {}", context, err);
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>().join(", ")
}

#[tokio::main]
async fn main() -> ExitCode {
    // Another logger may already be installed when embedded
    let _ = env_logger::try_init();

    let args = CliArgs::parse();
    info!("{} {} starting", APP_NAME, APP_VERSION);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            report("Failed to load configuration", &e);
            return ExitCode::FAILURE;
        }
    };
    debug!(
        "Plugin directories: {}; state in {}",
        display_dirs(&config.plugin_dirs),
        config.state_dir.display()
    );

    let manager = DefaultPluginManager::new(&config);
    let mut failed = false;

    if let Err(e) = manager.rescan().await {
        report("Some plugins could not be loaded", &e);
        failed = true;
    }

    if let Err(e) = run_command(&manager, args.command).await {
        report("Command failed", &e);
        failed = true;
    }

    if let Err(e) = manager.shutdown().await {
        report("Shutdown reported errors", &e);
        failed = true;
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

//! Tuning Box CLI
//!
//! Manages components, environments and layered resource values in a local
//! SQLite store. Results are printed to stdout as JSON; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Register a component with one resource definition
//! tuning-box component add nova --resource nova.conf
//!
//! # Create an environment with a two-level hierarchy
//! tuning-box env create --component 1 --level cluster --level node
//!
//! # Store values at the root and at one cluster
//! tuning-box put 1 nova.conf '{"debug": false, "workers": 4}'
//! tuning-box put 1 nova.conf --path cluster/eu/ '{"workers": 8}'
//!
//! # Read values as seen from a node
//! tuning-box get 1 nova.conf --positional --path eu/n1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tuning_box::db::{CreateComponentInput, CreateEnvironmentInput, CreateResourceDefinitionInput};
use tuning_box::services::spawn_event_logger;
use tuning_box::{Config, ConfigDb, PathEncoding, ReadMode, ResourceRef, Services};

#[derive(Parser, Debug)]
#[command(name = "tuning-box")]
#[command(about = "Hierarchical configuration store with layered overrides")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "TUNING_BOX_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "TUNING_BOX_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Whether reads create missing nodes (materialize, lookup)
    #[arg(long)]
    read_mode: Option<ReadMode>,

    /// Reject paths deeper than the environment hierarchy
    #[arg(long)]
    strict_path_length: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage components
    #[command(subcommand)]
    Component(ComponentCommands),

    /// Manage environments
    #[command(subcommand)]
    Env(EnvCommands),

    /// Show the level chain of an environment, or create it if names are given
    Levels {
        /// Environment ID
        env: i64,
        /// Level names, least specific first
        names: Vec<String>,
    },

    /// Replace the values of a resource at one scope
    Put {
        /// Environment ID
        env: i64,
        /// Resource definition ID or name
        resource: ResourceRef,
        /// JSON object to store
        json: String,
        /// Level path
        #[arg(short, long, default_value = "")]
        path: String,
        /// Path lists values only, in hierarchy order
        #[arg(long)]
        positional: bool,
    },

    /// Read the merged values of a resource as seen from one scope
    Get {
        /// Environment ID
        env: i64,
        /// Resource definition ID or name
        resource: ResourceRef,
        /// Level path
        #[arg(short, long, default_value = "")]
        path: String,
        /// Path lists values only, in hierarchy order
        #[arg(long)]
        positional: bool,
    },

    /// Show row counts
    Stats,
}

#[derive(Debug, Subcommand)]
enum ComponentCommands {
    /// Register a component
    Add {
        /// Component name
        name: String,
        /// Resource definition names (repeatable)
        #[arg(short, long = "resource")]
        resources: Vec<String>,
        /// Explicit component ID
        #[arg(long)]
        id: Option<i64>,
    },
    /// List components
    List,
    /// Delete a component and everything that references it
    Delete {
        /// Component ID
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
enum EnvCommands {
    /// Create an environment
    Create {
        /// Component IDs (repeatable)
        #[arg(short, long = "component")]
        components: Vec<i64>,
        /// Level names, least specific first (repeatable)
        #[arg(short, long = "level")]
        levels: Vec<String>,
        /// Explicit environment ID
        #[arg(long)]
        id: Option<i64>,
    },
    /// Show one environment
    Show {
        /// Environment ID
        id: i64,
    },
    /// List environments
    List,
    /// Delete an environment with its hierarchy and values
    Delete {
        /// Environment ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs on stderr, JSON results on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tuning_box=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(read_mode) = args.read_mode {
        config.read_mode = read_mode;
    }
    if args.strict_path_length {
        config.strict_path_length = true;
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(ConfigDb::open(&config.db_path(), config.busy_timeout())?);
    let services = Services::new(db, &config);
    let logger = spawn_event_logger(&services.events);

    run(&services, &config, args.command)?;

    // Dropping the bus closes the channel so the logger drains and exits
    drop(services);
    logger.await?;
    Ok(())
}

fn run(services: &Services, config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Component(cmd) => match cmd {
            ComponentCommands::Add { name, resources, id } => {
                let input = CreateComponentInput {
                    id,
                    name,
                    resource_definitions: resources
                        .into_iter()
                        .map(|name| CreateResourceDefinitionInput { id: None, name, content: None })
                        .collect(),
                };
                print_json(&services.registry.create_component(input)?)
            }
            ComponentCommands::List => print_json(&services.registry.list_components()?),
            ComponentCommands::Delete { id } => {
                print_json(&json!({ "deleted": services.registry.delete_component(id)? }))
            }
        },
        Command::Env(cmd) => match cmd {
            EnvCommands::Create { components, levels, id } => {
                let input = CreateEnvironmentInput { id, components, hierarchy_levels: levels };
                print_json(&services.registry.create_environment(input)?)
            }
            EnvCommands::Show { id } => print_json(&services.registry.get_environment(id)?),
            EnvCommands::List => print_json(&services.registry.list_environments()?),
            EnvCommands::Delete { id } => {
                print_json(&json!({ "deleted": services.registry.delete_environment(id)? }))
            }
        },
        Command::Levels { env, names } => {
            if !names.is_empty() {
                services.hierarchy.create_chain(env, &names)?;
            }
            print_json(&services.hierarchy.get_chain(env)?)
        }
        Command::Put { env, resource, json, path, positional } => {
            let payload = match serde_json::from_str::<Value>(&json)? {
                Value::Object(map) => map,
                other => bail!("values must be a JSON object, got {}", other),
            };
            let encoding = path_encoding(config, positional);
            let path = services.hierarchy.parse_path(env, &path, encoding)?;
            let row = services.hierarchy.put_value(env, &resource, &path, payload)?;
            info!(env, resource = %resource, path = %encoding.encode(&path), "Values stored");
            print_json(&row)
        }
        Command::Get { env, resource, path, positional } => {
            let encoding = path_encoding(config, positional);
            let path = services.hierarchy.parse_path(env, &path, encoding)?;
            print_json(&services.hierarchy.get_value(env, &resource, &path)?)
        }
        Command::Stats => print_json(&services.registry.stats()?),
    }
}

fn path_encoding(config: &Config, positional: bool) -> PathEncoding {
    if positional {
        PathEncoding::Positional
    } else {
        config.path_encoding
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! Sigil - compose, snapshot and synchronize multi-container Odoo projects
//!
//! This is the main CLI entry point for Sigil.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_yaml::Value;
use sigil::compose::reload_project;
use sigil::settings::{get_db_name, Project, SettingsStore};
use sigil::snapshot::SnapshotManager;
use sigil::source::{PullOptions, SourceSync};
use tracing_subscriber::EnvFilter;

/// Sigil - odoo project environment tooling
#[derive(Parser)]
#[command(name = "sigil")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Compose, snapshot and synchronize multi-container Odoo projects", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the run directory and the composed docker-compose.yml
    Reload {
        /// Load demo data into fresh databases
        #[arg(long)]
        demo: bool,
        /// Database name
        #[arg(short = 'd', long)]
        db: Option<String>,
        /// Publish the proxy on this port
        #[arg(short = 'p', long)]
        proxy_port: Option<u16>,
        /// Publish the mailclient gui on this port
        #[arg(short = 'm', long)]
        mailclient_gui_port: Option<u16>,
        /// Keep the run directory inside the project tree
        #[arg(short = 'l', long)]
        local: bool,
        /// Project name override
        #[arg(short = 'P', long)]
        project_name: Option<String>,
        /// Server profile: no published ports, mail and proxy enabled
        #[arg(long)]
        headless: bool,
        /// Enable development conveniences
        #[arg(long)]
        devmode: bool,
    },

    /// Print the composed configuration
    Config {
        /// Show only this service
        service_name: Option<String>,
        /// Keep the environment blocks
        #[arg(long)]
        full: bool,
    },

    /// Interactively toggle DEVMODE and the RUN_* flags, then reload
    Toggle,

    /// Manage btrfs snapshots of the postgres volume
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Synchronize the module repositories listed in the manifest
    Src {
        #[command(subcommand)]
        command: SrcCommands,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// List snapshots
    List,
    /// Take a new snapshot
    Save {
        /// Snapshot label
        label: String,
    },
    /// Roll the postgres volume back to a snapshot
    Restore {
        /// Snapshot name; prompts when omitted
        name: Option<String>,
    },
    /// Delete a snapshot
    Remove {
        /// Snapshot name; prompts when omitted
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum SrcCommands {
    /// Fetch and update all module repositories
    Pull {
        /// Restrict the run to one module
        module: Option<String>,
        /// Clone depth for newly added repositories
        #[arg(long)]
        depth: Option<u32>,
        /// Pull serially instead of in parallel
        #[arg(short = 'T', long)]
        not_threaded: bool,
    },
    /// Push all module repositories, then the root pointer commit
    Push,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Reload {
            demo,
            db,
            proxy_port,
            mailclient_gui_port,
            local,
            project_name,
            headless,
            devmode,
        } => {
            if headless && proxy_port.is_some() {
                anyhow::bail!("--headless and --proxy-port are not compatible");
            }
            let project = Project::discover(project_name.as_deref(), local)?;
            println!("Current project name: {}", project.name);

            let forced = forced_values(
                &project.customs,
                demo,
                db.as_deref(),
                proxy_port,
                mailclient_gui_port,
                headless,
                devmode,
            );
            reload_project(&project, &forced)?;
            println!("Built the docker-compose file.");
        }

        Commands::Config { service_name, full } => {
            let project = Project::discover(None, false)?;
            let destination = project.compose_destination();
            let text = std::fs::read_to_string(&destination).with_context(|| {
                format!(
                    "no composed file at {}, run reload first",
                    destination.display()
                )
            })?;
            let mut content: Value = serde_yaml::from_str(&text)?;

            if !full {
                strip_environment(&mut content);
            }
            if let Some(name) = service_name {
                let service = content
                    .get("services")
                    .and_then(|services| services.get(name.as_str()))
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no service named {}", name))?;
                let mut single = serde_yaml::Mapping::new();
                single.insert(Value::from(name), service);
                content = Value::Mapping(single);
            }
            println!("{}", serde_yaml::to_string(&content)?);
        }

        Commands::Toggle => {
            let project = Project::discover(None, false)?;
            let settings = SettingsStore::load(project.settings_file())?;

            let mut choices = vec!["DEVMODE".to_string()];
            let mut run_flags: Vec<String> = settings
                .keys()
                .filter(|key| key.starts_with("RUN_"))
                .map(str::to_string)
                .collect();
            run_flags.sort();
            choices.extend(run_flags);

            let defaults: Vec<usize> = choices
                .iter()
                .enumerate()
                .filter(|(_, key)| settings.get_bool(key))
                .map(|(i, _)| i)
                .collect();

            let message = format!(
                "What services to run? {}/{}",
                project.customs,
                settings.get_or("DBNAME", "")
            );
            let selected = match inquire::MultiSelect::new(&message, choices.clone())
                .with_default(&defaults)
                .prompt()
            {
                Ok(selected) => selected,
                Err(inquire::InquireError::OperationCanceled)
                | Err(inquire::InquireError::OperationInterrupted) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let mut overrides = SettingsStore::load(project.project_settings_file())?;
            for choice in &choices {
                let value = if selected.contains(choice) { "1" } else { "0" };
                overrides.set(choice, value);
            }
            overrides.persist()?;
            println!("Saved {}", project.project_settings_file().display());

            let forced = forced_values(&project.customs, false, None, None, None, false, false);
            reload_project(&project, &forced)?;
            println!("Built the docker-compose file.");
        }

        Commands::Snapshot { command } => {
            let project = Project::discover(None, false)?;
            let settings = SettingsStore::load(project.settings_file())?;
            let manager = SnapshotManager::new(&project, &settings)?;

            match command {
                SnapshotCommands::List => {
                    for snapshot in manager.list()? {
                        match snapshot.taken_at {
                            Some(taken_at) => println!("{}  (taken {})", snapshot.name, taken_at),
                            None => println!("{}", snapshot.name),
                        }
                    }
                }
                SnapshotCommands::Save { label } => {
                    let name = manager.save(&label)?;
                    println!("{}", name);
                }
                SnapshotCommands::Restore { name } => {
                    let name = match name {
                        Some(name) => Some(name),
                        None => pick_snapshot(&manager, "Restore which snapshot?")?,
                    };
                    if let Some(name) = name {
                        manager.restore(&name)?;
                        println!("Restored {}", name);
                    }
                }
                SnapshotCommands::Remove { name } => {
                    let name = match name {
                        Some(name) => Some(name),
                        None => pick_snapshot(&manager, "Remove which snapshot?")?,
                    };
                    if let Some(name) = name {
                        manager.remove(&name)?;
                        println!("Removed {}", name);
                    }
                }
            }
        }

        Commands::Src { command } => {
            let project = Project::discover(None, false)?;
            let sync = SourceSync::new(&project);

            match command {
                SrcCommands::Pull {
                    module,
                    depth,
                    not_threaded,
                } => {
                    sync.pull(&PullOptions {
                        module,
                        depth,
                        threaded: !not_threaded,
                    })?;
                    println!("Source tree is up to date.");
                }
                SrcCommands::Push => {
                    sync.push()?;
                    println!("Pushed all module repositories.");
                }
            }
        }
    }

    Ok(())
}

/// Forced settings derived from the reload flags. These override every
/// settings layer.
fn forced_values(
    customs: &str,
    demo: bool,
    db: Option<&str>,
    proxy_port: Option<u16>,
    mailclient_gui_port: Option<u16>,
    headless: bool,
    devmode: bool,
) -> Vec<(String, String)> {
    let mut forced: Vec<(String, String)> =
        vec![("DBNAME".into(), get_db_name(db.unwrap_or(""), customs))];
    if demo {
        forced.push(("ODOO_DEMO".into(), "1".into()));
    }
    if devmode {
        forced.push(("DEVMODE".into(), "1".into()));
    }
    if headless {
        for (key, value) in [
            ("RUN_PROXY", "1"),
            ("RUN_PROXY_PUBLISHED", "0"),
            ("RUN_SSLPROXY", "0"),
            ("RUN_ROUNDCUBE", "1"),
            ("RUN_MAIL", "1"),
            ("RUN_CUPS", "0"),
        ] {
            forced.push((key.into(), value.into()));
        }
        // headless servers usually run as root, containers must not
        if unsafe { libc::getuid() } == 0 {
            forced.push(("OWNER_UID".into(), "1000".into()));
        }
    }
    if let Some(port) = proxy_port {
        forced.push(("PROXY_PORT".into(), port.to_string()));
    }
    if let Some(port) = mailclient_gui_port {
        forced.push(("ROUNDCUBE_PORT".into(), port.to_string()));
    }
    forced
}

/// Drop every environment block so the output stays readable
fn strip_environment(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            map.remove("environment");
            for (_, child) in map.iter_mut() {
                strip_environment(child);
            }
        }
        Value::Sequence(seq) => {
            for child in seq {
                strip_environment(child);
            }
        }
        _ => {}
    }
}

/// Let the operator pick a snapshot; None when there is nothing to pick
/// or the prompt was cancelled
fn pick_snapshot(manager: &SnapshotManager<'_>, message: &str) -> anyhow::Result<Option<String>> {
    let names: Vec<String> = manager.list()?.into_iter().map(|s| s.name).collect();
    if names.is_empty() {
        println!("No snapshots found.");
        return Ok(None);
    }
    match inquire::Select::new(message, names).prompt() {
        Ok(name) => Ok(Some(name)),
        Err(inquire::InquireError::OperationCanceled)
        | Err(inquire::InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

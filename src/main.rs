use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use configsync::admin::{AdminResponse, SyncReport};
use configsync::config::LoggingConfig;
use configsync::resolver::{parse_interval, ConfigSource};
use configsync::settings::refresh_loop;
use configsync::target::RepoLocator;
use configsync::{
    AdminApi, Collection, Config, ConfigResolver, GitHubContentsStore, SettingKey, Settings,
    StateDb, SyncController, SyncEngine,
};

#[derive(Parser)]
#[command(name = "configsync")]
#[command(about = "Mirror configuration records to a GitHub repository and restore them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic sync in the foreground until interrupted
    Run,

    /// Show whether sync is configured and when it last succeeded
    Status {
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Push all collections once
    Push {
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore all collections from the remote repository
    Pull {
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or change the persisted sync settings
    Settings {
        #[command(subcommand)]
        settings_command: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show persisted settings and the effective configuration
    Show,

    /// Change a setting (credential, destination or interval)
    Set {
        /// Setting name
        key: SettingKey,

        /// New value; an empty string clears it
        value: String,
    },
}

/// Wired-up service objects shared by all commands
struct App {
    db: Arc<StateDb>,
    settings: Arc<Settings>,
    controller: SyncController,
    admin: AdminApi,
    settings_refresh: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config)?;
    init_logging(&config.logging, cli.verbose);
    info!("Starting configsync v{}", env!("CARGO_PKG_VERSION"));

    let app = bootstrap(&config)?;

    match cli.command {
        Commands::Run => cmd_run(&app).await,
        Commands::Status { json } => cmd_status(&app, json).await,
        Commands::Push { json } => {
            let response = app.admin.trigger().await;
            report_sync(response, json)
        }
        Commands::Pull { json } => {
            let response = app.admin.restore().await;
            report_sync(response, json)
        }
        Commands::Settings { settings_command } => cmd_settings(&app, settings_command),
    }
}

/// Initialize logging; RUST_LOG wins over the configured level
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "pretty" => registry
            .with(fmt::layer().pretty().with_ansi(logging.color))
            .init(),
        "full" => registry.with(fmt::layer().with_ansi(logging.color)).init(),
        _ => registry
            .with(fmt::layer().compact().with_ansi(logging.color))
            .init(),
    }
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

fn bootstrap(config: &Config) -> Result<App> {
    let db = Arc::new(StateDb::open_at(Path::new(&config.database_path))?);
    let settings = Arc::new(Settings::load(db.clone())?);

    let remote =
        Arc::new(GitHubContentsStore::from_config(config).context("Failed to build HTTP client")?);
    let engine = SyncEngine::new(db.clone(), remote, config.collections.clone());
    let resolver = ConfigResolver::new(settings.clone(), config);
    let controller = SyncController::new(engine, resolver, config.stop_grace());

    Ok(App {
        db,
        settings,
        admin: AdminApi::new(controller.clone()),
        controller,
        settings_refresh: config.settings_refresh(),
    })
}

/// Run the periodic loop until Ctrl+C
async fn cmd_run(app: &App) -> Result<()> {
    app.controller.register_settings_hook();

    // Picks up `configsync settings set` from other processes
    let refresh_cancel = CancellationToken::new();
    let refresh = tokio::spawn(refresh_loop(
        app.settings.clone(),
        app.settings_refresh,
        refresh_cancel.clone(),
    ));

    if app.controller.start().await {
        println!("🚀 Periodic sync running (Ctrl+C to stop)");
    } else {
        println!("⚠️  Sync is not configured, nothing scheduled");
        println!("   Waiting for 'configsync settings set' or restart with the environment overrides");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Received shutdown signal");
    refresh_cancel.cancel();
    if let Err(e) = refresh.await {
        warn!("Settings refresh ended abnormally: {}", e);
    }
    app.controller.stop().await;
    println!("🛑 Sync stopped");

    Ok(())
}

async fn cmd_status(app: &App, json: bool) -> Result<()> {
    let response = app.admin.status().await;

    if json {
        return print_json(&response);
    }

    println!("📊 configsync Status");
    if let Some(status) = &response.data {
        if status.enabled {
            println!("   🟢 Sync: Enabled");
        } else {
            println!("   🔴 Sync: Not configured");
        }

        match status.last_sync_time {
            Some(time) => println!("   🕒 Last sync: {}", time.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("   🕒 Last sync: never"),
        }
    }

    println!("   📁 Local records:");
    for collection in Collection::ALL {
        println!("      {}: {}", collection, app.db.count(collection)?);
    }

    Ok(())
}

fn report_sync(response: AdminResponse<SyncReport>, json: bool) -> Result<()> {
    if json {
        print_json(&response)?;
        if !response.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let Some(report) = response.data.filter(|_| response.success) else {
        bail!("{}", response.message);
    };

    println!("✅ {}", response.message);
    for collection in &report.collections {
        match (collection.status, collection.replaced) {
            ("absent", _) => println!("   ⏭️  {}: not present remotely", collection.collection),
            (_, Some(replaced)) => println!(
                "   📥 {}: {} inserted, {} replaced",
                collection.collection, collection.records, replaced
            ),
            _ => println!(
                "   📤 {}: {} records",
                collection.collection, collection.records
            ),
        }
    }
    println!("   ⏱️  Duration: {:.2}s", report.duration_secs);

    Ok(())
}

fn cmd_settings(app: &App, command: SettingsCommands) -> Result<()> {
    match command {
        SettingsCommands::Show => {
            let snapshot = app.settings.snapshot();

            println!("⚙️  Persisted settings");
            println!(
                "   credential: {}",
                if snapshot.credential.is_empty() { "not set" } else { "set" }
            );
            println!("   destination: {}", display_or_unset(&snapshot.destination));
            println!("   interval: {}", display_or_unset(&snapshot.interval));

            match app.controller.resolver().resolve() {
                Some(effective) => {
                    let source = match effective.source {
                        ConfigSource::Environment => "environment",
                        ConfigSource::Settings => "persisted settings",
                    };
                    println!("\n🔄 Effective configuration (from {})", source);
                    println!("   destination: {}", effective.target.destination);
                    println!("   interval: {:?}", effective.interval);
                }
                None => println!("\n🔴 Sync is not configured"),
            }
        }

        SettingsCommands::Set { key, value } => {
            let value = value.trim();
            match key {
                SettingKey::LastSyncTime => {
                    bail!("{} is maintained by the sync loop and cannot be set", key)
                }
                SettingKey::Destination if !value.is_empty() => {
                    RepoLocator::parse(value)?;
                }
                SettingKey::Interval if !value.is_empty() && parse_interval(value).is_none() => {
                    bail!("Invalid interval '{}', expected a positive number of seconds", value)
                }
                _ => {}
            }

            app.settings.set(key, value)?;
            println!("✅ Updated {}", key);
        }
    }

    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "not set"
    } else {
        value
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize response")?;
    println!("{}", json);
    Ok(())
}

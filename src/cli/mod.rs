pub mod confirm;
pub mod daemon_path;
pub mod output;
pub mod process;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use confirm::confirm;
use output::{print_counter, print_definitions, print_snapshot};
use process::{daemon_executable, kill_previous_servers, reload_running_server, restart_server};
use tracing::{info, level_filters::LevelFilter, warn};

use crate::{
    daemon::start_daemon,
    engine::CounterEngine,
    storage::{counter_store::SqliteCounterStore, entities::DefinitionInput},
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "hotcount", version, long_about = None)]
#[command(about = "Counts repetitive activities with global hotkeys and weighted points", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Show every counter, the weighted total and progress to the next hundred")]
    Show {},
    #[command(about = "List counter definitions with their hotkeys")]
    List {},
    #[command(about = "Add 1 to a counter")]
    Inc { key: String },
    #[command(about = "Set every counter back to 0")]
    Reset {
        #[arg(long, help = "Don't ask for confirmation")]
        yes: bool,
    },
    #[command(about = "Create a custom counter")]
    Add {
        #[arg(long)]
        label: String,
        #[arg(long, allow_hyphen_values = true)]
        points: String,
        #[arg(long)]
        color: String,
    },
    #[command(about = "Change a counter. Omitted or invalid values fall back to defaults")]
    Edit {
        key: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        points: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    #[command(about = "Remove a custom counter")]
    Delete {
        key: String,
        #[arg(long, help = "Don't ask for confirmation")]
        yes: bool,
    },
    #[command(about = "Bind a hotkey such as ctrl+shift+2 to a counter")]
    Bind { key: String, chord: String },
    #[command(about = "Remove the hotkey of a counter")]
    Unbind { key: String },
    #[command(about = "Starts a daemon for the application")]
    Init {},
    #[command(
        about = "Run a daemon directly in current console. Used for debugging"
    )]
    Serve {},
    #[command(about = "Stop currently running daemon.")]
    Stop {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = resolve_application_path(args.dir)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => {
            restart_server(&dir)?;
            println!("Daemon started");
            Ok(())
        }
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&daemon_executable()?)?;
            println!("Stopped {stopped} daemons");
            Ok(())
        }
        Commands::Serve {} => start_daemon(dir).await,
        command => run_counter_command(&dir, command).await,
    }
}

async fn run_counter_command(dir: &Path, command: Commands) -> Result<()> {
    let mut engine = CounterEngine::open_dir(dir).await?;
    let result = execute(&mut engine, command).await;
    engine.close().await;

    if result? {
        match reload_running_server(dir) {
            Ok(true) => println!("Daemon restarted with the new hotkeys"),
            Ok(false) => info!("No daemon to reload"),
            Err(e) => warn!("Failed to reload daemon {e:?}"),
        }
    }
    Ok(())
}

/// Runs a command against the engine. Returns true when the running daemon has to rebind.
async fn execute(engine: &mut CounterEngine<SqliteCounterStore>, command: Commands) -> Result<bool> {
    match command {
        Commands::Show {} => {
            print_snapshot(&engine.read_all().await?);
            Ok(false)
        }
        Commands::List {} => {
            print_definitions(&engine.definitions(), engine.hotkeys());
            Ok(false)
        }
        Commands::Inc { key } => {
            let snapshot = engine.increment(&key).await?;
            print_counter(&snapshot, &key);
            Ok(false)
        }
        Commands::Reset { yes } => {
            match engine
                .reset(|| yes || confirm("Reset every counter to 0?"))
                .await?
            {
                Some(snapshot) => print_snapshot(&snapshot),
                None => println!("Nothing was reset"),
            }
            Ok(false)
        }
        Commands::Add {
            label,
            points,
            color,
        } => {
            let added = engine
                .add_definition(&DefinitionInput::new(label, points, color))
                .await?;
            println!("Added {} as {}", added.label, added.key);
            Ok(true)
        }
        Commands::Edit {
            key,
            label,
            points,
            color,
        } => {
            let current = engine
                .definition(&key)
                .ok_or_else(|| crate::Error::UnknownCounter(key.clone()))?;
            let input = DefinitionInput::new(
                label.unwrap_or(current.label),
                points.unwrap_or_else(|| current.points.to_string()),
                color.unwrap_or(current.color),
            );
            let edited = engine.edit_definition(&key, &input).await?;
            println!(
                "{} is now {} worth {} points in {}",
                edited.key, edited.label, edited.points, edited.color
            );
            Ok(true)
        }
        Commands::Delete { key, yes } => {
            let question = format!("Delete {key} and its count?");
            if engine
                .delete_definition(&key, || yes || confirm(&question))
                .await?
            {
                println!("Deleted {key}");
                Ok(true)
            } else {
                println!("Nothing was deleted");
                Ok(false)
            }
        }
        Commands::Bind { key, chord } => {
            engine.set_hotkey(&key, &chord).await?;
            println!("Bound {chord} to {key}");
            Ok(true)
        }
        Commands::Unbind { key } => {
            engine.set_hotkey(&key, "").await?;
            println!("Unbound {key}");
            Ok(true)
        }
        Commands::Init {} | Commands::Serve {} | Commands::Stop {} => Ok(false),
    }
}

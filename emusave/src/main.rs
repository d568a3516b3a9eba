//! emusave - command line entry point
//!
//! Backs up pre-classified save records, restores archive versions and keeps
//! the local archive tree in sync with a shared folder.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use emusave::archive::store::ArchiveStore;
use emusave::conflict::{ConflictDetector, Resolution};
use emusave::daemon::{watch, ShutdownCoordinator};
use emusave::models::archive::Archive;
use emusave::models::save_record::SaveRecord;
use emusave::paths::{KnownRoots, PathResolver};
use emusave::plugin::{group_by_game, Detection};
use emusave::sync::SyncResult;
use emusave::{utils, BackupManager, Config, RestoreManager, SyncManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct Game {
    /// Emulator name, e.g. PCSX2
    emulator: String,
    /// Game id, e.g. SLUS-21005
    game: String,
}

#[derive(ClapArgs, Debug)]
struct Version {
    #[command(flatten)]
    game: Game,
    /// Version number as shown by `list` (oldest = 1)
    version: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up save records read from a JSON file
    Backup {
        #[arg(long, value_name = "FILE")]
        records: PathBuf,
    },
    /// List archives of one game, newest first
    List(Game),
    /// List archives of every game
    ListAll,
    /// Keep an archive out of rotation
    Pin {
        #[command(flatten)]
        target: Version,
        #[arg(long)]
        label: Option<String>,
    },
    Unpin(Version),
    /// Delete an archive permanently
    Delete(Version),
    /// Apply the retention limit to one game
    Rotate(Game),
    /// Show what a restore would write
    Preview(Version),
    /// Restore an archive to the live save locations
    Restore {
        #[command(flatten)]
        target: Version,
        /// Overwrite files that are newer than the archived copy
        #[arg(long)]
        force: bool,
    },
    /// Copy the newest local archive to the sync folder
    Push(Game),
    /// Copy the newest shared archive into the local tree
    Pull(Game),
    /// Push and pull every game
    Sync,
    /// Settle a diverged game
    Resolve {
        #[command(flatten)]
        game: Game,
        #[arg(long, value_enum)]
        choice: Choice,
    },
    /// Show the sync state of one game
    Status(Game),
    /// Run `sync` periodically until interrupted
    Watch,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Choice {
    UseLocal,
    UseRemote,
    KeepBoth,
    /// Newer side wins, equal times are skipped
    Auto,
}

struct Engine {
    config: Config,
    backups: BackupManager,
    restore: RestoreManager,
    sync: SyncManager,
}

impl Engine {
    fn new(config: Config) -> Result<Self> {
        let resolver = PathResolver::new(KnownRoots::from_config(&config.paths));
        let backups = BackupManager::new(&config, resolver.clone())?;
        let store = ArchiveStore::new(&config.backup.root);
        let restore = RestoreManager::new(store.clone(), resolver)
            .with_detection(Detection::from_config(&config));
        let sync = SyncManager::new(&config, store);
        Ok(Self {
            config,
            backups,
            restore,
            sync,
        })
    }

    fn archive(&self, target: &Version) -> Result<Archive> {
        let Version { game, version } = target;
        self.backups
            .find_version(&game.emulator, &game.game, *version)
            .ok_or_else(|| {
                anyhow!(
                    "No version {} for {}:{}",
                    version,
                    game.emulator,
                    game.game
                )
            })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match args.config {
        Some(config_path) => Config::from_file(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?,
        None => {
            let default_path = Config::default_path();
            if default_path.is_file() {
                Config::from_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "emusave v{} (machine: {}, backups: {})",
        env!("CARGO_PKG_VERSION"),
        config.machine.id,
        config.backup.root.display()
    );

    let engine = Engine::new(config)?;
    run(engine, args.command).await
}

async fn run(engine: Engine, command: Command) -> Result<()> {
    match command {
        Command::Backup { records } => backup(&engine, &records),
        Command::List(game) => {
            print_archives(&engine.backups.list(&game.emulator, &game.game));
            Ok(())
        }
        Command::ListAll => {
            for (key, archives) in engine.backups.list_all() {
                println!("{}", key);
                print_archives(&archives);
            }
            Ok(())
        }
        Command::Pin { target, label } => {
            let mut archive = engine.archive(&target)?;
            engine.backups.pin(&mut archive, label.as_deref())?;
            println!("Pinned v{} ({})", archive.version, archive.id);
            Ok(())
        }
        Command::Unpin(target) => {
            let mut archive = engine.archive(&target)?;
            engine.backups.unpin(&mut archive)?;
            println!("Unpinned v{} ({})", archive.version, archive.id);
            Ok(())
        }
        Command::Delete(target) => {
            let archive = engine.archive(&target)?;
            engine.backups.delete(&archive)?;
            println!("Deleted v{} ({})", archive.version, archive.id);
            Ok(())
        }
        Command::Rotate(game) => {
            let rotation = engine.backups.rotate(&game.emulator, &game.game);
            println!("Deleted {} old archive(s)", rotation.deleted);
            for err in &rotation.errors {
                eprintln!("{}", err);
            }
            if !rotation.errors.is_empty() {
                bail!("Rotation left {} archive(s) behind", rotation.errors.len());
            }
            Ok(())
        }
        Command::Preview(target) => {
            let archive = engine.archive(&target)?;
            for change in engine.restore.preview(&archive)? {
                let marker = if change.is_newer_locally {
                    " (local is newer)"
                } else if !change.dest_exists {
                    " (new)"
                } else {
                    ""
                };
                println!("{} -> {}{}", change.container_path, change.destination.display(), marker);
            }
            Ok(())
        }
        Command::Restore { target, force } => {
            let archive = engine.archive(&target)?;
            let errors = engine.restore.restore(&archive, force);
            for err in &errors {
                eprintln!("{}", err);
            }
            if errors.is_empty() {
                println!("Restored v{} ({})", archive.version, archive.id);
                Ok(())
            } else {
                bail!("Restore finished with {} error(s)", errors.len())
            }
        }
        Command::Push(game) => report(engine.sync.push(&game.emulator, &game.game)),
        Command::Pull(game) => report(engine.sync.pull(&game.emulator, &game.game)),
        Command::Sync => report(engine.sync.sync_all()),
        Command::Resolve { game, choice } => resolve(&engine, &game, choice),
        Command::Status(game) => {
            println!(
                "{}:{} {}",
                game.emulator,
                game.game,
                engine.sync.status(&game.emulator, &game.game)
            );
            Ok(())
        }
        Command::Watch => watch_mode(engine).await,
    }
}

fn backup(engine: &Engine, records_path: &Path) -> Result<()> {
    let content = std::fs::read(records_path)
        .with_context(|| format!("Failed to read {}", records_path.display()))?;
    let records: Vec<SaveRecord> = serde_json::from_slice(&content)?;

    let mut failed = 0;
    for (key, group) in group_by_game(records) {
        match engine.backups.create(&group) {
            Ok(created) => {
                let archive = &created.archive;
                println!("{} v{} ({})", key, archive.version, archive.id);
                for err in &created.rotation.errors {
                    eprintln!("warning: {}", err);
                }
            }
            Err(e) => {
                eprintln!("{}: {}", key, e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} backup(s) failed", failed);
    }
    Ok(())
}

fn resolve(engine: &Engine, game: &Game, choice: Choice) -> Result<()> {
    let Some(record) = engine.sync.find_conflict(&game.emulator, &game.game) else {
        println!("No conflict for {}:{}", game.emulator, game.game);
        return Ok(());
    };

    let resolution = match choice {
        Choice::UseLocal => Resolution::UseLocal,
        Choice::UseRemote => Resolution::UseRemote,
        Choice::KeepBoth => Resolution::KeepBoth,
        Choice::Auto => ConflictDetector::new().auto_resolve(&record),
    };
    if resolution == Resolution::Skip {
        println!("{}", record);
        println!("Modification times are equal, choose use-local, use-remote or keep-both");
        return Ok(());
    }

    let errors = engine.sync.apply_resolution(&record, resolution);
    if !errors.is_empty() {
        bail!(errors.join("; "));
    }
    println!("Applied {} for {}", resolution, record.unique_key());
    Ok(())
}

async fn watch_mode(engine: Engine) -> Result<()> {
    if !engine.sync.is_configured() {
        bail!(emusave::sync::NOT_CONFIGURED);
    }

    let interval = Duration::from_secs(engine.config.sync.interval_secs);
    let shutdown_coordinator = ShutdownCoordinator::new();
    let sync = Arc::new(engine.sync);
    let watch_handle = tokio::spawn(watch::run(sync, interval, shutdown_coordinator.token()));

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    // A running pass may take a while on large archives
    match tokio::time::timeout(Duration::from_secs(60), watch_handle).await {
        Ok(Ok(stats)) => tracing::info!("Watch finished after {} pass(es)", stats.passes),
        Ok(Err(e)) => tracing::error!("Watch task panicked: {}", e),
        Err(_) => tracing::warn!("Watch shutdown timeout, forcing exit"),
    }
    Ok(())
}

fn print_archives(archives: &[Archive]) {
    for archive in archives {
        let pin = if archive.is_pinned() { "*" } else { " " };
        let label = archive.label();
        println!(
            "  {}v{:<3} {}  {}  {:>10} B  {}{}",
            pin,
            archive.version,
            archive.id.display_time(),
            archive.sidecar.source_machine,
            archive.sidecar.total_size,
            archive.sidecar.title,
            if label.is_empty() {
                String::new()
            } else {
                format!("  [{}]", label)
            }
        );
    }
}

fn report(result: SyncResult) -> Result<()> {
    println!("pushed {}, pulled {}", result.pushed, result.pulled);
    for warning in &result.version_warnings {
        println!("warning: {}", warning);
    }
    for conflict in &result.conflicts {
        println!("conflict: {}", conflict);
    }
    if !result.errors.is_empty() {
        bail!(result.errors.join("; "));
    }
    Ok(())
}

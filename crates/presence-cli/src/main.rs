use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use presence_core::session::{EveryFrame, LogSink};
use presence_core::{DailyRecordStore, IdentityStore, PartitionId, PresenceSession, SessionSummary};
use presence_store::SqliteStore;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod replay;
mod sink;

use config::Config;
use replay::{ReplayRecognizer, ReplaySource};
use sink::JsonSink;

#[derive(Parser)]
#[command(name = "presence", about = "Presence tracking from recognized faces")]
struct Cli {
    /// SQLite database path (overrides PRESENCE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        employee_id: String,
    },
    /// Look up a registered identity by name
    Lookup { name: String },
    /// List registered identities
    Identities,
    /// Show time records for a day
    Records {
        /// Day as MMDDYYYY (default: today)
        #[arg(short, long)]
        day: Option<String>,
    },
    /// Export every table to a timestamped CSV file
    Export {
        /// Output directory (overrides PRESENCE_EXPORT_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Drop every day partition and the identity registry
    Clean {
        /// Confirm the destructive reset
        #[arg(long)]
        yes: bool,
    },
    /// Run a presence session over a recorded detection stream
    Run {
        /// JSON-lines file of recognized frames
        #[arg(long)]
        replay: PathBuf,
        /// Recognize every frame, not only when the face count changes
        #[arg(long)]
        every_frame: bool,
        /// Print deltas as JSON lines on stdout
        #[arg(long)]
        json: bool,
        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Register { name, employee_id } => {
            let store = open_store(&config)?;
            let identity = store.register(&name, &employee_id)?;
            println!("Registered {} ({})", identity.name, identity.employee_id);
        }
        Commands::Lookup { name } => {
            let store = open_store(&config)?;
            match store.lookup(&name)? {
                Some(identity) => println!("{}\t{}", identity.name, identity.employee_id),
                None => bail!("no identity named {name:?}"),
            }
        }
        Commands::Identities => {
            let store = open_store(&config)?;
            for identity in store.list()? {
                println!("{}\t{}", identity.name, identity.employee_id);
            }
        }
        Commands::Records { day } => {
            let partition = match day {
                Some(key) => PartitionId::parse(&key)?,
                None => PartitionId::for_day(chrono::Local::now().date_naive()),
            };
            let store = open_store(&config)?;
            let records = store.find_all(partition.day())?;
            if records.is_empty() {
                println!("No records for {partition}");
            }
            for r in records {
                println!(
                    "{}\t{}\t{}\t{}",
                    r.name,
                    r.employee_id.unwrap_or_default(),
                    r.entry_time.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
                    r.exit_time.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        Commands::Export { dir } => {
            let store = open_store(&config)?;
            let dir = dir.unwrap_or(config.export_dir);
            let path = store.export_csv(&dir, chrono::Local::now().naive_local())?;
            println!("Exported to {}", path.display());
        }
        Commands::Clean { yes } => {
            if !yes {
                bail!("refusing to drop all presence data without --yes");
            }
            let store = open_store(&config)?;
            let dropped = store.clean()?;
            println!("Dropped {dropped} day partition(s) and the identity registry");
        }
        Commands::Run {
            replay,
            every_frame,
            json,
            interval_ms,
        } => {
            config.recognize_every_frame |= every_frame;
            config.notify_json |= json;
            let summary = run_session(config, replay, Duration::from_millis(interval_ms)).await?;
            println!(
                "frames={} recognitions={} entered={} exited={} anomalies={}",
                summary.frames, summary.recognitions, summary.entered, summary.exited, summary.anomalies
            );
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    store.set_busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(store)
}

/// Run the session on a dedicated thread; Ctrl-C raises the stop flag.
async fn run_session(config: Config, replay: PathBuf, interval: Duration) -> Result<SessionSummary> {
    let store = open_store(&config)?;
    let source = ReplaySource::open(&replay)
        .with_context(|| format!("opening replay {}", replay.display()))?
        .with_interval(interval);

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel();

    let thread_stop = stop.clone();
    std::thread::Builder::new()
        .name("presence-session".into())
        .spawn(move || {
            let mut session = PresenceSession::new(source, ReplayRecognizer, store);
            if config.recognize_every_frame {
                session = session.with_change_detector(EveryFrame);
            }
            session = if config.notify_json {
                session.with_sink(JsonSink::new(std::io::stdout()))
            } else {
                session.with_sink(LogSink)
            };
            let _ = done_tx.send(session.run(&thread_stop));
        })
        .context("spawning session thread")?;

    tokio::select! {
        summary = &mut done_rx => summary.context("session thread exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping after current tick");
            stop.store(true, Ordering::Relaxed);
            done_rx.await.context("session thread exited")
        }
    }
}

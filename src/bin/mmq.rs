//! mmq - mmqueue maintenance tool
//!
//! Inspects and operates on a transaction log directory.

use std::process;

use clap::{Parser, Subcommand};
use mmqueue::{Config, MessageType, QueueMessage, Status, SyncStrategy, TransactionLog};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// mmqueue maintenance tool
#[derive(Parser, Debug)]
#[command(name = "mmq")]
#[command(about = "Inspect and operate on an mmqueue transaction log")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./mmqueue_data")]
    data_dir: String,

    /// Page size in bytes (must match the directory's existing pages)
    #[arg(short, long, default_value = "1048576")]
    page_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record counts and page file usage
    Stats,

    /// Print every meta record
    Dump,

    /// Push a message with a fresh UUID
    Push {
        /// Payload text
        payload: String,

        /// Tag the payload as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Lock the oldest available message and print it
    Pop {
        /// Delete the message instead of leaving it locked
        #[arg(long)]
        delete: bool,
    },

    /// Return a locked message to the queue
    Rollback {
        /// UUID of the locked message
        uuid: Uuid,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mmqueue=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .page_size(args.page_size)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();

    let log = match TransactionLog::load(config) {
        Ok(log) => log,
        Err(e) => {
            tracing::error!("Failed to open transaction log: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&log, args.command) {
        tracing::error!("Command failed: {}", e);
        process::exit(1);
    }

    if let Err(e) = log.close() {
        tracing::error!("Failed to close transaction log: {}", e);
        process::exit(1);
    }
}

fn run(log: &TransactionLog, command: Commands) -> mmqueue::Result<()> {
    match command {
        Commands::Stats => {
            let stats = log.storage_stats()?;
            let records = log.meta_records()?;
            let count = |status: Status| {
                records
                    .iter()
                    .filter(|r| !r.is_empty() && r.status == status.tag())
                    .count()
            };
            println!("records:     {}", log.message_count());
            println!("new:         {}", count(Status::New));
            println!("locked:      {}", count(Status::Locked));
            println!("deleted:     {}", count(Status::Deleted));
            println!("meta pages:  {} ({} bytes)", stats.meta_pages, stats.meta_bytes);
            println!("data pages:  {} ({} bytes)", stats.data_pages, stats.data_bytes);
            println!("data cursor: {}", stats.data_cursor);
        }
        Commands::Dump => {
            for (position, record) in log.meta_records()?.iter().enumerate() {
                if record.is_empty() {
                    println!("{:>8}  <empty>", position);
                    continue;
                }
                let status = record
                    .status()
                    .map(|s| format!("{:?}", s))
                    .unwrap_or_else(|_| format!("?{}", record.status));
                println!(
                    "{:>8}  {}  {:<8} offset={} length={} type={}",
                    position,
                    record.uuid(),
                    status,
                    record.offset,
                    record.length,
                    record.kind
                );
            }
        }
        Commands::Push { payload, json } => {
            let kind = if json { MessageType::Json } else { MessageType::String };
            let message = QueueMessage::with_random_uuid(kind, payload.into_bytes());
            if log.push(&message)? {
                println!("{}", message.uuid());
            } else {
                println!("duplicate uuid {}", message.uuid());
            }
        }
        Commands::Pop { delete } => match log.lock_and_pop()? {
            Some(message) => {
                if delete {
                    log.unlock_and_delete(&message.uuid())?;
                }
                println!(
                    "{} {:?} {}",
                    message.uuid(),
                    message.kind(),
                    String::from_utf8_lossy(message.payload())
                );
            }
            None => println!("queue is empty"),
        },
        Commands::Rollback { uuid } => match log.unlock_and_rollback(&uuid)? {
            Some(_) => println!("rolled back {}", uuid),
            None => println!("{} is not locked", uuid),
        },
    }
    Ok(())
}

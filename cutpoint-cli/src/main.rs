//! Cutpoint command-line driver.
//!
//! Runs log administration and the checkpoint-then-truncate flow against
//! an in-process simulated log. Each invocation starts from an empty log
//! service, so every subcommand creates the log it operates on.
//!
//! # Create, write and list
//!
//! ```bash
//! cutpoint create --log retail/orders --segments 4
//! cutpoint write --log retail/orders --segments 2 --events 100
//! cutpoint list --log retail/orders --log retail/returns
//! ```
//!
//! # Checkpoint and truncate
//!
//! ```bash
//! cutpoint truncate --log retail/orders --segments 2 --events 10 \
//!     --checkpoint-after 3 --readers 2 --tail-events 4
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use cutpoint_core::{Limits, LogName, Offset, ReaderGroupId, ReaderId, SegmentId};
use cutpoint_group::{GroupConfig, InMemoryCutStore, ReadEvent, ReaderGroup, TruncationService};
use cutpoint_log::{LogAdmin, PartitionLog, SimulatedPartitionLog};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Name the truncate flow records its checkpoint under.
const CHECKPOINT_NAME: &str = "checkpoint";

/// Consistent stream cuts and safe truncation for partitioned logs.
#[derive(Parser, Debug)]
#[command(name = "cutpoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Seed for the simulated log.
    #[arg(long, global = true, default_value = "42")]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a log.
    Create(LogArgs),
    /// Create a log and write events to it.
    Write(WriteArgs),
    /// Create the given logs and list every log with its segments.
    List(ListArgs),
    /// Create a log and seal it.
    Seal(LogArgs),
    /// Create a log, seal it and delete it.
    Delete(LogArgs),
    /// Write events, checkpoint with a reader group, truncate to the checkpoint.
    Truncate(TruncateArgs),
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Log name in `scope/stream` form.
    #[arg(long, value_parser = parse_log_name)]
    log: LogName,

    /// Number of segments.
    #[arg(long, default_value = "1")]
    segments: u32,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[command(flatten)]
    log: LogArgs,

    /// Events to write, round-robin across segments.
    #[arg(long, default_value = "10")]
    events: u64,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Log names in `scope/stream` form. Repeat for several logs.
    #[arg(long = "log", value_parser = parse_log_name, required = true)]
    logs: Vec<LogName>,

    /// Number of segments per log.
    #[arg(long, default_value = "1")]
    segments: u32,
}

#[derive(Args, Debug)]
struct TruncateArgs {
    #[command(flatten)]
    log: LogArgs,

    /// Events written before reading starts.
    #[arg(long, default_value = "10")]
    events: u64,

    /// Initiate the checkpoint once this many records have been read.
    #[arg(long, default_value = "3")]
    checkpoint_after: u64,

    /// Events written after the checkpoint completes; these survive truncation.
    #[arg(long, default_value = "0")]
    tail_events: u64,

    /// Number of readers in the group.
    #[arg(long, default_value = "1")]
    readers: u64,

    /// Checkpoint round timeout in milliseconds.
    #[arg(long, default_value = "10000")]
    round_timeout_ms: u64,
}

/// Parses a `scope/stream` log name.
fn parse_log_name(s: &str) -> Result<LogName, String> {
    LogName::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; results go to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let log = Arc::new(SimulatedPartitionLog::new(cli.seed));

    match cli.command {
        Command::Create(args) => {
            let segments = log.create_log(&args.log, args.segments).await?;
            println!("created {} with {} segments", args.log, segments.len());
        }
        Command::Write(args) => {
            let events = args.events;
            let name = args.log.log.clone();
            let offsets = run_write(&log, &args).await?;
            println!("wrote {events} events to {name}");
            for (segment_id, offset) in offsets {
                println!("{segment_id}: write offset {offset}");
            }
        }
        Command::List(args) => {
            for listing in run_list(&log, &args).await? {
                println!(
                    "{}: {} segments, sealed {}",
                    listing.name, listing.segments, listing.sealed
                );
            }
        }
        Command::Seal(args) => {
            log.create_log(&args.log, args.segments).await?;
            log.seal_log(&args.log).await?;
            println!("sealed {}: {}", args.log, log.is_sealed(&args.log).await?);
        }
        Command::Delete(args) => {
            log.create_log(&args.log, args.segments).await?;
            if !log.is_sealed(&args.log).await? {
                log.seal_log(&args.log).await?;
            }
            let store = Arc::new(InMemoryCutStore::new(GroupConfig::default().max_cuts));
            TruncationService::new(Arc::clone(&log), store)
                .delete_log(&args.log)
                .await?;
            println!("deleted {}", args.log);
        }
        Command::Truncate(args) => run_truncate(log, args).await?,
    }

    Ok(())
}

/// Writes `count` events round-robin across the log's segments.
async fn populate(
    log: &SimulatedPartitionLog,
    name: &LogName,
    first: u64,
    count: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let segments = log.segments(name).await?;
    for i in first..first + count {
        #[allow(clippy::cast_possible_truncation)]
        let segment = segments[(i % segments.len() as u64) as usize];
        log.append(name, segment, Bytes::from(i.to_string())).await?;
    }
    Ok(())
}

/// Creates the log, writes the events and returns each segment's write offset.
async fn run_write(
    log: &SimulatedPartitionLog,
    args: &WriteArgs,
) -> Result<Vec<(SegmentId, Offset)>, Box<dyn std::error::Error>> {
    let name = &args.log.log;
    log.create_log(name, args.log.segments).await?;
    populate(log, name, 0, args.events).await?;

    let mut offsets = Vec::new();
    for segment_id in log.segments(name).await? {
        offsets.push((segment_id, log.current_write_offset(name, segment_id).await?));
    }
    Ok(offsets)
}

/// One line of `list` output.
#[derive(Debug, PartialEq, Eq)]
struct Listing {
    name: LogName,
    segments: usize,
    sealed: bool,
}

/// Creates the named logs and describes every log, sorted by name.
async fn run_list(
    log: &SimulatedPartitionLog,
    args: &ListArgs,
) -> Result<Vec<Listing>, Box<dyn std::error::Error>> {
    for name in &args.logs {
        log.create_log(name, args.segments).await?;
    }

    let mut names = log.list_logs().await?;
    names.sort_by_key(|name| name.to_string());

    let mut listings = Vec::new();
    for name in names {
        listings.push(Listing {
            segments: log.segments(&name).await?.len(),
            sealed: log.is_sealed(&name).await?,
            name,
        });
    }
    Ok(listings)
}

async fn run_truncate(
    log: Arc<SimulatedPartitionLog>,
    args: TruncateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = args.log.log;
    log.create_log(&name, args.log.segments).await?;
    populate(&log, &name, 0, args.events).await?;

    let config = GroupConfig::from_limits(&Limits::default())
        .with_round_timeout(Duration::from_millis(args.round_timeout_ms));
    let store = Arc::new(InMemoryCutStore::new(config.max_cuts));
    let group = ReaderGroup::create(
        ReaderGroupId::new(1),
        name.clone(),
        Arc::clone(&log),
        store,
        config,
    )
    .await?;

    // Readers run until they have been idle for a while.
    let consumed = Arc::new(AtomicU64::new(0));
    let mut tasks = Vec::new();
    for id in 0..args.readers {
        let mut reader = group.create_reader(ReaderId::new(id)).await?;
        let consumed = Arc::clone(&consumed);
        tasks.push(tokio::spawn(async move {
            while let Ok(Some(event)) = reader.advance_timeout(Duration::from_millis(500)).await {
                match event {
                    ReadEvent::Record(record) => {
                        consumed.fetch_add(1, Ordering::Relaxed);
                        println!(
                            "{}: {}@{} {}",
                            reader.reader_id(),
                            record.segment_id,
                            record.offset,
                            String::from_utf8_lossy(&record.payload)
                        );
                    }
                    ReadEvent::Checkpoint {
                        round_id,
                        segment_id,
                        offset,
                    } => {
                        println!("{}: {round_id} marker {segment_id}@{offset}", reader.reader_id());
                    }
                }
            }
            debug!(reader_id = %reader.reader_id(), "Reader idle; stopping");
        }));
    }

    let target = args.checkpoint_after.min(args.events);
    while consumed.load(Ordering::Relaxed) < target && !tasks.iter().all(|t| t.is_finished()) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    info!(consumed = consumed.load(Ordering::Relaxed), "Initiating checkpoint");

    let cut = group.initiate_checkpoint(CHECKPOINT_NAME).await?;
    println!("checkpoint {CHECKPOINT_NAME}: {cut}");

    populate(&log, &name, args.events, args.tail_events).await?;

    let outcome = group.truncate_to_checkpoint(CHECKPOINT_NAME).await?;
    println!("truncated {} segments", outcome.truncated.len());
    for segment_id in log.segments(&name).await? {
        println!(
            "{segment_id}: truncated below {}, first available {}, retained {}",
            outcome.record.get(segment_id),
            log.first_available_offset(&name, segment_id).await?,
            log.retained_records(&name, segment_id).unwrap_or_default()
        );
    }

    for task in tasks {
        task.await?;
    }
    println!("latest cut: {:?}", group.latest_cut().await?.map(|c| c.to_string()));
    group.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command
    }

    #[tokio::test]
    async fn test_write_spreads_events_over_segments() {
        let Command::Write(args) = parse(&[
            "cutpoint", "write", "--log", "retail/orders", "--segments", "2", "--events", "5",
        ]) else {
            panic!("expected write");
        };

        let log = SimulatedPartitionLog::new(1);
        let offsets = run_write(&log, &args).await.unwrap();
        assert_eq!(
            offsets,
            vec![
                (SegmentId::new(0), Offset::new(3)),
                (SegmentId::new(1), Offset::new(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_shows_every_log() {
        let Command::List(args) = parse(&[
            "cutpoint", "list", "--log", "retail/returns", "--log", "retail/orders",
            "--segments", "3",
        ]) else {
            panic!("expected list");
        };

        let log = SimulatedPartitionLog::new(1);
        let listings = run_list(&log, &args).await.unwrap();
        let names: Vec<String> = listings.iter().map(|l| l.name.to_string()).collect();
        assert_eq!(names, vec!["retail/orders", "retail/returns"]);
        assert!(listings.iter().all(|l| l.segments == 3 && !l.sealed));
    }

    #[test]
    fn test_list_requires_a_log() {
        assert!(Cli::try_parse_from(["cutpoint", "list"]).is_err());
    }
}

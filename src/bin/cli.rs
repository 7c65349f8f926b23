//! RidgeKV CLI
//!
//! Command-line interface for operating on a RidgeKV data directory.

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ridgekv::{
    Config, DeleteOptions, Engine, KeyRange, PutOptions, ReadOptions, TombstonePolicy,
};
use tracing_subscriber::{fmt, EnvFilter};

/// RidgeKV CLI
#[derive(Parser, Debug)]
#[command(name = "ridgekv-cli")]
#[command(about = "Embedded LSM key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ridgekv_data")]
    data_dir: String,

    /// MemTable size limit in KB before flush
    #[arg(short = 'm', long, default_value = "4096")]
    memtable_kb: usize,

    /// Drop tombstones at every compaction instead of only at the last level
    #[arg(long)]
    eager_tombstones: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Expire the value after this many seconds
        #[arg(long)]
        ttl: Option<u64>,

        /// Only write if the key is at this version (0 = absent)
        #[arg(long)]
        expect: Option<u64>,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List live keys in [from, to)
    Scan {
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        /// Only keys starting with this prefix
        #[arg(long, conflicts_with_all = ["from", "to"])]
        prefix: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Flush the memtable to a level-0 SSTable
    Flush,

    /// Run compaction on every level that is due
    Compact,

    /// Print memtable and level statistics
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,ridgekv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let policy = if args.eager_tombstones {
        TombstonePolicy::Eager
    } else {
        TombstonePolicy::LastLevelOnly
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_kb * 1024)
        .tombstone_policy(policy)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&engine, args.command) {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> ridgekv::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(record) => {
                println!("{}", String::from_utf8_lossy(&record.payload));
                println!("  version: {}", record.version);
                if let Some(expire_at) = record.expire_at {
                    println!("  expire_at: {}", expire_at);
                }
            }
            None => println!("(nil)"),
        },

        Commands::Put {
            key,
            value,
            ttl,
            expect,
        } => {
            let options = PutOptions {
                ttl: ttl.map(Duration::from_secs),
                expected_version: expect,
                sync: true,
            };
            let outcome = engine.put(key.as_bytes(), value.as_bytes(), &options)?;
            let verb = if outcome.created { "created" } else { "updated" };
            println!("{} (version {})", verb, outcome.version);
        }

        Commands::Delete { key } => {
            let options = DeleteOptions {
                sync: true,
                ..DeleteOptions::default()
            };
            let outcome = engine.delete(key.as_bytes(), &options)?;
            println!("{}", if outcome.deleted { "deleted" } else { "not found" });
        }

        Commands::Scan {
            from,
            to,
            prefix,
            limit,
        } => {
            let range = match prefix {
                Some(prefix) => KeyRange::prefix(prefix.as_bytes()),
                None => KeyRange {
                    from: from.map(String::into_bytes),
                    to: to.map(String::into_bytes),
                },
            };
            for (key, record) in engine.scan(range, &ReadOptions { limit })? {
                println!(
                    "{} = {} (v{})",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&record.payload),
                    record.version
                );
            }
        }

        Commands::Flush => {
            engine.flush()?;
            println!("flushed; {} SSTables", engine.sstable_count());
        }

        Commands::Compact => {
            let queued = engine.compact()?;
            engine.wait_for_compactions();
            println!("{} levels compacted", queued);
        }

        Commands::Stats => {
            let stats = engine.stats();
            println!("memtable: {} entries, {} bytes", stats.memtable_entries, stats.memtable_bytes);
            for (level, count) in stats.tables_per_level.iter().enumerate() {
                println!("level {}: {} tables", level, count);
            }
            println!("table bytes: {}", stats.total_table_bytes);
            println!("table set version: {}", stats.table_set_version);
        }
    }
    Ok(())
}

//! Telemetry Store Inspector
//!
//! Read-only CLI over a paperbot database: stream counts, time coverage,
//! and the live singleton rows. Useful when the worker and the dashboard
//! disagree about what was recorded.
//!
//! Usage:
//!   cargo run --bin store_inspect -- --db ./data/paperbot.db summary
//!   cargo run --bin store_inspect -- --db ./data/paperbot.db coverage
//!   cargo run --bin store_inspect -- --db ./data/paperbot.db sample --count 5

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OpenFlags};

const STREAMS: &[&str] = &["equity", "ticks", "trades", "events", "deaths"];

#[derive(Parser, Debug)]
#[command(name = "store_inspect")]
#[command(about = "Inspect a paperbot telemetry database")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long)]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Row counts per stream plus the singleton rows
    Summary,

    /// First/last timestamps per stream
    Coverage,

    /// Show the newest rows from each stream
    Sample {
        /// Rows per stream
        #[arg(short, long, default_value = "3")]
        count: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = Connection::open_with_flags(&cli.db, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open {}", cli.db))?;

    println!("=== Store Inspector ===");
    println!("Database: {}", cli.db);
    println!();

    match cli.command {
        Commands::Summary => summary(&conn),
        Commands::Coverage => coverage(&conn),
        Commands::Sample { count } => sample(&conn, count),
    }
}

fn summary(conn: &Connection) -> Result<()> {
    for stream in STREAMS {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", stream), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("count {}", stream))?;
        println!("{:<8} {:>10} rows", stream, count);
    }
    println!();

    let control: Option<(String, String)> = conn
        .query_row(
            "SELECT state, updated_at FROM control WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();
    match control {
        Some((state, updated_at)) => println!("control  state={} updated_at={}", state, updated_at),
        None => println!("control  <missing>"),
    }

    let heartbeat: Option<(String, String, f64)> = conn
        .query_row(
            "SELECT at, status, equity_usd FROM heartbeat WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok();
    match heartbeat {
        Some((at, status, equity)) => {
            println!("heartbeat at={} status={} equity_usd={:.2}", at, status, equity)
        }
        None => println!("heartbeat <never seen>"),
    }

    let pet: Option<(String, f64, f64)> = conn
        .query_row(
            "SELECT stage, health, hunger FROM pet WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok();
    match pet {
        Some((stage, health, hunger)) => {
            println!("pet      stage={} health={:.0} hunger={:.0}", stage, health, hunger)
        }
        None => println!("pet      <never seen>"),
    }

    Ok(())
}

fn coverage(conn: &Connection) -> Result<()> {
    println!(
        "{:<8} {:>10}  {:<25} {:<25}",
        "stream", "rows", "first", "last"
    );
    for stream in STREAMS {
        let row: (i64, Option<i64>, Option<i64>) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), MIN(at_epoch), MAX(at_epoch) FROM {}",
                    stream
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("coverage for {}", stream))?;

        let (count, first, last) = row;
        println!(
            "{:<8} {:>10}  {:<25} {:<25}",
            stream,
            count,
            first.map(fmt_epoch).unwrap_or_else(|| "-".to_string()),
            last.map(fmt_epoch).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn sample(conn: &Connection, count: usize) -> Result<()> {
    for stream in STREAMS {
        println!("--- {} (newest {}) ---", stream, count);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, at FROM {} ORDER BY id DESC LIMIT ?1",
                stream
            ))
            .with_context(|| format!("prepare sample for {}", stream))?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([count as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        if rows.is_empty() {
            println!("  (empty)");
        }
        for (id, at) in rows {
            println!("  #{:<8} {}", id, at);
        }
        println!();
    }
    Ok(())
}

fn fmt_epoch(epoch: i64) -> String {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| epoch.to_string())
}

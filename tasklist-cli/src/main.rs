//! tasklist - keep a task list in a Btrieve-style store
//!
//! The list lives in a local table file or on a store server; `serve` runs
//! such a server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tasklist::{Record, Table, TaskError};
use tasklist_store::{engine, Server};

/// Task list over a local or remote record store
#[derive(Parser, Debug)]
#[command(name = "tasklist")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding engine.toml (created with defaults if missing)
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Table location: a file path or btrv://[user@]host[:port]/db?dbfile=<file>
    #[arg(short, long, default_value = "tasklist.btr")]
    location: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a task and print its id
    Add {
        /// Task title
        title: String,
    },
    /// List all tasks in id order
    List,
    /// Delete the task with the given id
    Delete {
        id: u32,
    },
    /// Serve tables from a data directory
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7419")]
        listen: String,

        /// Data directory for relative paths
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    engine::initialize(&args.config_dir).with_context(|| {
        format!(
            "initializing engine from {}",
            args.config_dir.display()
        )
    })?;

    match args.command {
        Command::Serve { listen, data_dir } => serve(&listen, data_dir),
        Command::Add { title } => add(&open(&args.location)?, title),
        Command::List => list(&open(&args.location)?),
        Command::Delete { id } => delete(&open(&args.location)?, id),
    }
}

fn open(location: &str) -> Result<Table> {
    Table::open_or_create(location).with_context(|| format!("opening table {}", location))
}

fn add(table: &Table, title: String) -> Result<()> {
    let limit = table.title_capacity() - 1;
    if title.len() > limit {
        warn!("Title longer than {} bytes, truncating", limit);
        eprintln!("warning: title truncated to {} bytes", limit);
    }
    let mut cursor = table.cursor()?;
    let task = cursor.insert(&Record::new(title))?;
    cursor.close()?;
    println!("{}", task.id);
    Ok(())
}

fn list(table: &Table) -> Result<()> {
    for task in table.scan()? {
        println!("{:>6}  {}", task.id, task.title);
    }
    Ok(())
}

fn delete(table: &Table, id: u32) -> Result<()> {
    let mut cursor = table.cursor()?;
    let result = cursor.delete_by_id(id);
    cursor.close()?;
    match result {
        Ok(()) => println!("deleted {}", id),
        Err(TaskError::NotFound(_)) => {
            eprintln!("no task with id {}", id);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn serve(listen: &str, data_dir: PathBuf) -> Result<()> {
    let server = Server::bind(listen, &data_dir)
        .with_context(|| format!("binding {}", listen))?;

    info!("Starting tasklist server v{}", env!("CARGO_PKG_VERSION"));
    println!("Listening on {}", server.local_addr()?);
    server.serve()?;
    Ok(())
}

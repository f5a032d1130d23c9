//! colmap command-line tool
//!
//! Inspects the tables of a sled-backed colmap store and runs a scripted
//! demo session against it.

mod demo;
mod formatter;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colmap_sled::{SledConfig, SledStore};
use formatter::{Formatter, OutputFormat};

/// colmap command-line tool
#[derive(Parser, Debug)]
#[command(name = "colmap")]
#[command(version, about = "Inspect colmap stores")]
pub struct Args {
    /// Store directory
    #[arg(short = 'd', long, default_value = "./colmap-data")]
    pub path: PathBuf,

    /// Use a temporary store, deleted on exit
    #[arg(long)]
    pub temporary: bool,

    /// Page cache size in MB
    #[arg(long, default_value_t = 64)]
    pub cache_mb: u64,

    /// Background flush interval in milliseconds (0 disables it)
    #[arg(long, default_value_t = 500)]
    pub flush_every_ms: u64,

    /// Store pages uncompressed
    #[arg(long)]
    pub no_compression: bool,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List tables and their key layout
    Tables,
    /// Print the live rows of a table
    Dump {
        /// Table name
        table: String,
        /// Print at most this many rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Persist, update and remove an order with items, printing every statement
    Demo,
}

impl Args {
    /// Build the store configuration.
    pub fn to_config(&self) -> SledConfig {
        let config = if self.temporary {
            SledConfig::temporary()
        } else {
            SledConfig::new(&self.path)
        };
        let flush_every_ms = (self.flush_every_ms > 0).then_some(self.flush_every_ms);
        config
            .with_cache_capacity(self.cache_mb * 1024 * 1024)
            .with_flush_every_ms(flush_every_ms)
            .with_compression(!self.no_compression)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("colmap=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store = SledStore::open(args.to_config())?;
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Tables => {
            let tables = store
                .table_names()?
                .iter()
                .map(|name| store.table_def(name))
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", formatter.format_tables(&tables));
        }
        Command::Dump { table, limit } => {
            let def = store.table_def(&table)?;
            let mut rows = store.scan(&table)?;
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            println!("{}", formatter.format_rows(&def, &rows));
        }
        Command::Demo => {
            let report = demo::run(store)?;
            print_demo(&*formatter, &report);
        }
    }
    Ok(())
}

fn print_demo(formatter: &dyn Formatter, report: &demo::DemoReport) {
    for step in &report.steps {
        println!("{}", formatter.format_message(step.title));
        println!("{}", formatter.format_statements(&step.statements));
    }
    let total: usize = report.steps.iter().map(|s| s.statements.len()).sum();
    println!(
        "{}",
        formatter.format_message(&format!(
            "{} statement(s), {} prepared template(s)",
            total, report.prepared
        ))
    );
}

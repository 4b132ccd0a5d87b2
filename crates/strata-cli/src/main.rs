//! strata CLI: inspect, import and consolidate tables.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use strata_core::config::EngineConfig;
use strata_exec::Engine;
use strata_storage::consolidate::save_blockwise;
use strata_storage::import::import_csv;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "strata: segmented out-of-core column tables", long_about = None)]
struct Cli {
    /// Worker threads (overrides config)
    #[arg(long, global = true)]
    max_parallel: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a table's schema, row count and segment layout
    Info {
        /// Index file or file:// URL
        index: String,
    },

    /// Print the first rows of a table
    Head {
        index: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        rows: u64,
    },

    /// Copy one column into a single segment file, block by block
    Consolidate {
        index: String,

        /// Column name
        #[arg(long)]
        column: String,

        /// Target segment file
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a CSV file with a header row into a new table
    ImportCsv {
        csv: PathBuf,

        /// Index file to create
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = 1)]
        segments: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(n) = cli.max_parallel {
        config.max_parallel_tasks = n;
    }
    let engine = match Engine::new(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Info { index } => info(&engine, &index),
        Commands::Head { index, rows } => head(&engine, &index, rows),
        Commands::Consolidate { index, column, out } => consolidate(&engine, &index, &column, &out),
        Commands::ImportCsv { csv, out, segments } => import(&engine, &csv, &out, segments),
    };
    engine.shutdown();
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn info(engine: &Engine, index: &str) -> CliResult {
    let table = engine.open_table(index)?;
    println!("Table {index}");
    println!("  Rows: {}", table.num_rows());
    println!("  Segments: {}", table.num_segments());
    println!("  Columns:");
    for col in table.columns() {
        let sizes: Vec<String> = col.segment_sizes().iter().map(u64::to_string).collect();
        println!("    {} ({}) segments [{}]", col.name(), col.data_type(), sizes.join(", "));
    }
    Ok(())
}

fn head(engine: &Engine, index: &str, rows: u64) -> CliResult {
    let table = engine.open_table(index)?;
    let batch = table.head(rows)?;
    println!("{}", table.column_names().join("\t"));
    for r in 0..batch.num_rows() {
        let row: Vec<String> = batch.row(r).iter().map(|v| v.to_string()).collect();
        println!("{}", row.join("\t"));
    }
    Ok(())
}

fn consolidate(engine: &Engine, index: &str, column: &str, out: &Path) -> CliResult {
    let table = engine.open_table(index)?;
    let col = table
        .column_by_name(column)
        .ok_or_else(|| format!("no column '{column}' in {index}"))?;
    let copied = save_blockwise(col, out)?;
    println!("✓ Wrote {} rows of '{column}' to {}", copied.len(), out.display());
    Ok(())
}

fn import(engine: &Engine, csv: &Path, out: &Path, segments: usize) -> CliResult {
    let table = import_csv(engine.store(), csv, out, segments, true)?;
    println!(
        "✓ Imported {} rows, {} columns into {}",
        table.num_rows(),
        table.num_columns(),
        out.display()
    );
    Ok(())
}

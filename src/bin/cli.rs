//! FolioDB CLI
//!
//! Command-line interface over a local FolioDB data directory.

use std::fs;
use std::ops::Bound;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use foliodb::{Config, KeyType, Result, Table};
use tracing_subscriber::{fmt, EnvFilter};

/// FolioDB CLI
#[derive(Parser, Debug)]
#[command(name = "folio-cli")]
#[command(about = "Embedded page-oriented storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./foliodb_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "16")]
    memtable_mb: usize,

    /// Skip fsync when flushing
    #[arg(long)]
    no_sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a table
    Create {
        table: String,

        /// Schema definition, e.g. "name: String!, age: Int"
        #[arg(long, conflicts_with = "schema_file")]
        schema: Option<String>,

        /// File holding the schema definition
        #[arg(long)]
        schema_file: Option<PathBuf>,
    },

    /// Insert or replace a record
    Insert {
        table: String,
        key: String,
        /// Value (a JSON object for schema tables)
        value: String,
    },

    /// Get a record by key
    Get { table: String, key: String },

    /// List every record
    Scan { table: String },

    /// Create a secondary index on a column
    CreateIndex {
        table: String,
        column: String,

        #[arg(short = 't', long = "type", value_enum)]
        key_type: KeyTypeArg,
    },

    /// Query an indexed column by range
    Range {
        table: String,
        column: String,

        /// Lower bound
        #[arg(long)]
        from: Option<String>,

        /// Upper bound
        #[arg(long)]
        to: Option<String>,

        /// Exclude the bounds themselves
        #[arg(long)]
        exclusive: bool,
    },

    /// List records ordered by an indexed column
    Sorted { table: String, column: String },

    /// Print table and index statistics as JSON
    Stats { table: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyTypeArg {
    Int,
    Float,
    Text,
    Bool,
}

impl From<KeyTypeArg> for KeyType {
    fn from(arg: KeyTypeArg) -> Self {
        match arg {
            KeyTypeArg::Int => KeyType::Int,
            KeyTypeArg::Float => KeyType::Float,
            KeyTypeArg::Text => KeyType::Text,
            KeyTypeArg::Bool => KeyType::Bool,
        }
    }
}

fn main() {
    // Logs go to stderr so stdout carries only results
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,foliodb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .sync_on_flush(!args.no_sync)
        .build();

    if let Err(e) = run(args.command, config) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Create {
            table,
            schema,
            schema_file,
        } => {
            let schema = match schema_file {
                Some(path) => Some(fs::read_to_string(path)?),
                None => schema,
            };
            Table::create(&table, config, schema.as_deref())?.close()?;
            println!("created {}", table);
        }

        Commands::Insert { table, key, value } => {
            let table = Table::open(&table, config)?;
            table.insert(&key, &value)?;
            table.close()?;
            println!("OK");
        }

        Commands::Get { table, key } => {
            let table = Table::open(&table, config)?;
            match table.find(&key)? {
                Some(value) => println!("{}", value),
                None => println!("(nil)"),
            }
            table.close()?;
        }

        Commands::Scan { table } => {
            let table = Table::open(&table, config)?;
            print_rows(&table.select_all()?);
            table.close()?;
        }

        Commands::CreateIndex {
            table,
            column,
            key_type,
        } => {
            let table = Table::open(&table, config)?;
            table.create_index_of_type(&column, key_type.into())?;
            table.close()?;
            println!("indexed {}", column);
        }

        Commands::Range {
            table,
            column,
            from,
            to,
            exclusive,
        } => {
            let table = Table::open(&table, config)?;
            let key_type = table.indexes().key_type(&column).ok_or_else(|| {
                foliodb::FolioError::IndexNotFound {
                    column: column.clone(),
                }
            })?;
            let bound = |text: Option<String>| -> Result<Bound<foliodb::IndexValue>> {
                Ok(match text {
                    Some(text) if exclusive => Bound::Excluded(key_type.parse(&text)?),
                    Some(text) => Bound::Included(key_type.parse(&text)?),
                    None => Bound::Unbounded,
                })
            };
            let rows = table.query_index(&column, bound(from)?, bound(to)?)?;
            print_rows(&rows);
            table.close()?;
        }

        Commands::Sorted { table, column } => {
            let table = Table::open(&table, config)?;
            print_rows(&table.select_all_sorted(&column)?);
            table.close()?;
        }

        Commands::Stats { table } => {
            let table = Table::open(&table, config)?;
            println!("{}", serde_json::to_string_pretty(&table.stats())?);
            table.close()?;
        }
    }
    Ok(())
}

fn print_rows(rows: &[(String, String)]) {
    for (key, value) in rows {
        println!("{}\t{}", key, value);
    }
}

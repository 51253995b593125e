use anyhow::Context as AnyhowContext;
use dash_sync::memory::MemoryStore;
use dash_sync::{
    csv, env_flag, BatchUploader, ConnectionProvider, RangeReader, StoreConfig, UploadOptions,
};
use dash_types::{Scalar, Table, TabularStore};
use indicatif::{ProgressBar, ProgressStyle};
use log_error::LogError;
use std::env;
use std::io::Write;
use std::sync::Arc;

const USAGE: &str = "\
usage: dash-sync [--dry-run] <command>

commands:
  upload <table> <file.csv>              upsert a CSV export into <table>
  fetch <table> <field> <low> <high>     print rows with low <= field <= high as JSON lines
  purge <table> <field> <low> <high>     delete rows with low <= field <= high

tables: sales_facts, ad_spend_facts, service_facts, app_config, products";

enum Command {
    Upload { table: Table, path: String },
    Fetch { table: Table, field: String, low: Scalar, high: Scalar },
    Purge { table: Table, field: String, low: Scalar, high: Scalar },
}

fn parse_args(args: &[String]) -> Result<Command, anyhow::Error> {
    let table = |s: &String| s.parse::<Table>().map_err(anyhow::Error::from);
    match args {
        [cmd, t, path] if cmd == "upload" => Ok(Command::Upload {
            table: table(t)?,
            path: path.clone(),
        }),
        [cmd, t, field, low, high] if cmd == "fetch" || cmd == "purge" => {
            let (table, field) = (table(t)?, field.clone());
            let (low, high) = (csv::parse_cell(low), csv::parse_cell(high));
            Ok(if cmd == "fetch" {
                Command::Fetch { table, field, low, high }
            } else {
                Command::Purge { table, field, low, high }
            })
        }
        _ => Err(anyhow::anyhow!("{USAGE}")),
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    match ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos:>7}/{len:7} {msg}") {
        Ok(style) => pb.set_style(style.progress_chars("=-")),
        Err(err) => log::warn!("Unable to initialize progress bar: {err}"),
    }
    pb
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let mut args: Vec<String> = env::args().skip(1).collect();
    let dry_run = env_flag("DRY_RUN", false) || args.iter().any(|a| a == "--dry-run");
    args.retain(|a| a != "--dry-run");
    let command = parse_args(&args)?;

    let store: Arc<dyn TabularStore> = if dry_run {
        log::info!("Dry run: using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        ConnectionProvider::new(StoreConfig::from_env()?).connect()?
    };

    match command {
        Command::Upload { table, path } => {
            let records = csv::read_records(&path)
                .await
                .with_context(|| format!("Unable to read {path}"))?;
            let pb = progress_bar();
            pb.set_message(table.to_string());
            let uploader = BatchUploader::new(store, UploadOptions::from_env());
            let res = uploader
                .upload(table, records, |written, total| {
                    pb.set_length(total as u64);
                    pb.set_position(written as u64);
                })
                .await;
            pb.finish();
            let report = res?;
            log::info!(
                "Uploaded {} records into {} ({} batches, {} retries, final batch size {})",
                report.written,
                report.table,
                report.batches,
                report.retries,
                report.final_chunk_size
            );
        }
        Command::Fetch {
            table,
            field,
            low,
            high,
        } => {
            let rows = RangeReader::new(store)
                .fetch_range(table, &field, &low, &high)
                .await;
            let mut out = std::io::stdout().lock();
            for row in rows.iter() {
                if let Some(line) = serde_json::to_string(row).log_error("Unable to encode row") {
                    writeln!(out, "{line}")?;
                }
            }
            log::info!("Fetched {} rows from {table}", rows.len());
        }
        Command::Purge {
            table,
            field,
            low,
            high,
        } => {
            RangeReader::new(store)
                .purge_range(table, &field, &low, &high)
                .await?;
        }
    }
    Ok(())
}

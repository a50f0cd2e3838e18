//! qix-search - query a running indexing service from the command line.
//!
//! Prints one full path per result, or the whole response as JSON.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use qix::config::ClientConfig;
use qix::ipc::{IpcClient, ResultFields, SearchResponse, SortDirection, SortField};
use qix::QixError;

#[derive(Parser)]
#[command(name = "qix-search", about = "Search a running file-indexing service")]
#[command(version, long_about = None)]
struct Cli {
    /// Search text, in the service's query syntax
    query: Vec<String>,

    /// Maximum number of results
    #[arg(short = 'n', long)]
    max: Option<u32>,

    /// Skip this many results
    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Sort key: name, path, size, extension, type, date_created, date_modified,
    /// date_accessed, attributes, run_count, date_run or date_recently_changed
    #[arg(short, long, default_value = "name")]
    sort: SortField,

    #[arg(short, long)]
    descending: bool,

    /// Case-sensitive matching
    #[arg(short = 'c', long)]
    case: bool,

    #[arg(short = 'w', long)]
    whole_word: bool,

    /// Treat the query as a regular expression
    #[arg(short, long)]
    regex: bool,

    /// Match against full paths, not only names
    #[arg(short = 'p', long)]
    match_path: bool,

    /// Output fields, comma separated (name, path, full_path_and_name, extension,
    /// size, date_modified, run_count, highlighted_path, ...)
    #[arg(short, long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Reply deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Named service instance
    #[arg(long)]
    instance: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the response as JSON
    #[arg(long)]
    json: bool,

    /// Print service version and database status instead of searching
    #[arg(long)]
    info: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(instance) = &cli.instance {
        config.endpoint.instance = Some(instance.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.query.timeout_ms = timeout_ms;
    }

    let _guard = qix::logging::init(&config.logging);
    debug!("Using endpoint class '{}'", config.endpoint.class_name);

    let client = IpcClient::from_config(&config).context("Failed to set up the IPC client")?;

    if cli.info {
        return print_info(&client, cli.json).await;
    }

    let text = cli.query.join(" ");
    let mut builder = config
        .request_builder(text)?
        .match_case(cli.case)
        .whole_word(cli.whole_word)
        .regex(cli.regex)
        .match_path(cli.match_path)
        .offset(cli.offset)
        .sort(
            cli.sort,
            if cli.descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            },
        );
    if let Some(max) = cli.max {
        builder = builder.max_count(max);
    }
    if !cli.fields.is_empty() {
        builder = builder.fields(ResultFields::from_names(&cli.fields)?);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    let request = builder.build()?;

    let response = client.query(request).await.map_err(explain)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_paths(&response);
    }
    Ok(())
}

async fn print_info(client: &IpcClient, json: bool) -> Result<()> {
    let version = client.version().await.map_err(explain)?;
    let loaded = client.is_database_loaded().await.map_err(explain)?;

    if json {
        let info = serde_json::json!({
            "version": version,
            "database_loaded": loaded,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Service version: {}", version);
        println!("Database loaded: {}", if loaded { "yes" } else { "no" });
    }
    Ok(())
}

fn print_paths(response: &SearchResponse) {
    for record in &response.records {
        if let Some(path) = record.full_path() {
            println!("{}", path);
        }
    }
    if response.has_more() {
        eprintln!(
            "({} of {} matches shown)",
            response.len(),
            response.total_matches
        );
    }
}

/// Attach a hint for the errors a user can act on.
fn explain(err: QixError) -> anyhow::Error {
    let hint = match &err {
        QixError::ServiceUnavailable(_) => Some("start the indexing service and retry"),
        QixError::Timeout(_) => Some("the service may be busy; retry or raise --timeout-ms"),
        QixError::ProtocolMismatch(_) => Some("client and service versions may differ"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

//! Distributed inner equi-join between two sharded JSON-lines datasets.
//!
//! Spawns an in-process cohort (one peer per shard), joins the selected
//! rows of the two inputs on the given key columns, and writes a new
//! sharded dataset. Existing output data is overwritten.
//!
//! ## Usage:
//! ```bash
//! shardlines-merge --output ./joined --left ./users --right ./orders \
//!     --on user_id --right-columns total,ts \
//!     --left-filter '{">": [{"var": "keys.age"}, 17]}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error};
use shardlines::{
    discover_shard_count, run_join, JoinArgs, JoinOutcome, JoinSpec, LocalCohort, ShardInput,
};

#[derive(Parser)]
#[command(name = "shardlines-merge")]
#[command(about = "Inner-join two sharded JSON-lines datasets on key columns")]
#[command(version = "1.0.0")]
struct Cli {
    /// Output dataset directory (existing data is overwritten)
    #[arg(long)]
    output: PathBuf,

    /// Left input dataset directory
    #[arg(long)]
    left: PathBuf,

    /// Right input dataset directory
    #[arg(long)]
    right: PathBuf,

    /// Join columns applied to both sides (overruled by the per-side lists)
    #[arg(long, value_delimiter = ',')]
    on: Vec<String>,

    /// Join columns for the left side
    #[arg(long, value_delimiter = ',')]
    left_on: Vec<String>,

    /// Join columns for the right side
    #[arg(long, value_delimiter = ',')]
    right_on: Vec<String>,

    /// Projection list for the left side (default: all columns)
    #[arg(long, value_delimiter = ',')]
    left_columns: Vec<String>,

    /// Projection list for the right side (default: all columns)
    #[arg(long, value_delimiter = ',')]
    right_columns: Vec<String>,

    /// Join variant (only "inner" is implemented)
    #[arg(long, default_value = "inner")]
    how: String,

    /// JSON selection predicate applied to the left input
    #[arg(long)]
    left_filter: Option<String>,

    /// JSON selection predicate applied to the right input
    #[arg(long)]
    right_filter: Option<String>,

    /// Cohort size (default: detected from the input shard layout)
    #[arg(long)]
    peers: Option<u32>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => println!("{summary}"),
        Err(message) => {
            error!("{message}");
            eprintln!("{message}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<String, String> {
    let left_filter = parse_filter(cli.left_filter.as_deref(), "--left-filter")?;
    let right_filter = parse_filter(cli.right_filter.as_deref(), "--right-filter")?;

    let peers = match cli.peers {
        Some(peers) => peers,
        None => detect_peers(&cli.left, &cli.right)?,
    };
    debug!("running merge with a cohort of {peers} peers");

    let mut left = ShardInput::new(cli.left);
    left.filter = left_filter;
    let mut right = ShardInput::new(cli.right);
    right.filter = right_filter;

    let args = Arc::new(JoinArgs {
        output: cli.output,
        left,
        right,
        spec: JoinSpec {
            on: cli.on,
            left_on: cli.left_on,
            right_on: cli.right_on,
            left_columns: cli.left_columns,
            right_columns: cli.right_columns,
            how: cli.how,
        },
    });

    let outcomes = LocalCohort::run(peers, |mut peer| {
        let args = Arc::clone(&args);
        async move { run_join(&mut peer, &args).await }
    })
    .await
    .map_err(|e| format!("cohort failed: {e}"))?;

    summarize(outcomes)
}

fn parse_filter(raw: Option<&str>, flag: &str) -> Result<Option<serde_json::Value>, String> {
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| format!("{flag} is not valid JSON: {e}")),
    }
}

fn detect_peers(left: &std::path::Path, right: &std::path::Path) -> Result<u32, String> {
    let left_shards =
        discover_shard_count(left).map_err(|e| format!("cannot inspect left dataset: {e}"))?;
    let right_shards =
        discover_shard_count(right).map_err(|e| format!("cannot inspect right dataset: {e}"))?;
    Ok(left_shards.max(right_shards).max(1))
}

fn summarize(
    outcomes: Vec<Result<JoinOutcome, shardlines::JoinError>>,
) -> Result<String, String> {
    let mut summary = None;
    let mut first_failure = None;
    let mut error_code = 0;

    for outcome in outcomes {
        let outcome = outcome.map_err(|e| format!("peer aborted: {e}"))?;
        error_code = error_code.max(outcome.error_code);
        if first_failure.is_none() {
            first_failure = outcome.failure;
        }
        if outcome.summary.is_some() {
            summary = outcome.summary;
        }
    }

    if error_code != 0 {
        return Err(first_failure
            .or(summary)
            .unwrap_or_else(|| format!("a peer failed (error code {error_code}).")));
    }
    summary.ok_or_else(|| "cohort produced no summary".to_string())
}

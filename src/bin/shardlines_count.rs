//! Count selected records across a sharded JSON-lines dataset.
//!
//! ## Usage:
//! ```bash
//! shardlines-count --input ./orders --filter '{">": [{"var": "keys.total"}, 100]}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::error;
use shardlines::{
    discover_shard_count, run_count, CountArgs, JoinMessage, LocalCohort, ShardInput,
};

#[derive(Parser)]
#[command(name = "shardlines-count")]
#[command(about = "Count selected records across a sharded JSON-lines dataset")]
#[command(version = "1.0.0")]
struct Cli {
    /// Input dataset directory
    #[arg(long)]
    input: PathBuf,

    /// JSON selection predicate
    #[arg(long)]
    filter: Option<String>,

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
    let filter = match cli.filter.as_deref() {
        None => None,
        Some(text) => Some(
            serde_json::from_str(text).map_err(|e| format!("--filter is not valid JSON: {e}"))?,
        ),
    };

    let peers = match cli.peers {
        Some(peers) => peers,
        None => discover_shard_count(&cli.input)
            .map_err(|e| format!("cannot inspect dataset: {e}"))?
            .max(1),
    };

    let mut input = ShardInput::new(cli.input);
    input.filter = filter;
    let args = Arc::new(CountArgs { input });

    let outcomes = LocalCohort::run(peers, |mut peer| {
        let args = Arc::clone(&args);
        async move { run_count::<JoinMessage, _>(&mut peer, &args).await }
    })
    .await
    .map_err(|e| format!("cohort failed: {e}"))?;

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
            .unwrap_or_else(|| format!("a peer failed (error code {error_code}).")));
    }
    summary.ok_or_else(|| "cohort produced no summary".to_string())
}

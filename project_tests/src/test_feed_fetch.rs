//! # Results Feed Live Fetch
//!
//! Fetches the simplified-results feed once through `lib_tally` and prints the
//! aggregation view subscribers would receive.

use chrono::Utc;
use clap::Parser;
use lib_tally::core::AggregationView;
use lib_tally::election::calendar::DEFAULT_FEED_URL;
use lib_tally::election::snapshot::Snapshot;
use lib_tally::election::ProjectionPolicy;
use lib_tally::ingestors::{HttpResultsSource, ResultsSource};

#[derive(Parser, Debug)]
#[clap(about = "Fetch the results feed once and print the projection")]
struct Args {
    /// Feed URL.
    #[clap(long, default_value = DEFAULT_FEED_URL)]
    url: String,

    /// Retries for transient failures.
    #[clap(long, default_value_t = 2)]
    retries: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let source = HttpResultsSource::new(&args.url, args.retries)?;

    println!("[*] Requesting {} ...", args.url);

    match source.fetch().await {
        Ok(raw) => {
            let snapshot = Snapshot::from_raw(raw, ProjectionPolicy::default())?;
            let now = Utc::now();
            let view = AggregationView::from_snapshot(&snapshot, now)?;

            println!("\n[SUCCESS] Snapshot captured at {}", snapshot.captured_at);
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(&view)?);
            println!("-----------------------------------------------");
            println!("[INFO] Expected total valid votes: {}", snapshot.expected_total_valid_votes(now));
            println!("[INFO] Tabulation complete: {}", snapshot.is_tabulation_complete());
        }
        Err(e) => {
            eprintln!("\n[ERROR] Feed retrieval failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

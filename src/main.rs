//! mniam - stream MongoDB query results
//!
//! Runs a find or aggregate and prints each document as a relaxed extended
//! JSON line, with bounded concurrency.
//!
//! # Usage
//!
//! ```bash
//! mniam mongodb://localhost:27017/shop find --collection orders --filter '{"status": "paid"}'
//! mniam mongodb://localhost:27017/shop aggregate --collection orders \
//!     --pipeline '[{"$group": {"_id": "$customer"}}]' --concurrency 1
//! ```

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mniam::Result;
use mniam::cli::CliInterface;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Wire Ctrl+C to the cancellation token
/// 4. Run the subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ctrl_c_token.cancel(),
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let result = cli.execute(cancel_token).await;
    ctrl_c_handle.abort();
    result
}

/// Initialize logging system based on verbosity level
///
/// `RUST_LOG` takes precedence over the configured level.
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}

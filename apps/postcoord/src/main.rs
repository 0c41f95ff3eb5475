//! # Postcoord - Expression Repository CLI
//!
//! The binary for the post-coordinated expression repository.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/postcoord (THE BINARY)        │
//! │                                               │
//! │   ┌─────────────┐        ┌────────────────┐   │
//! │   │    CLI      │        │  TOML config   │   │
//! │   │   (clap)    │        │    (serde)     │   │
//! │   └──────┬──────┘        └───────┬────────┘   │
//! │          └───────────┬───────────┘            │
//! │                      ▼                        │
//! │              ┌────────────────┐               │
//! │              │ postcoord-core │               │
//! │              │  (THE LOGIC)   │               │
//! │              └────────────────┘               │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! postcoord init
//! postcoord create "71388002 |Procedure| : 405813007 = 15497006"
//! postcoord create -f expressions.txt
//! postcoord lookup "71388002 : 405813007 = 15497006"
//! postcoord --json-mode list
//! ```

use clap::Parser;
use postcoord::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // POSTCOORD_LOG_FORMAT=json enables machine-parseable output. Logs go to
    // stderr so stdout stays parseable in --json-mode.
    let log_format = std::env::var("POSTCOORD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "postcoord=info,postcoord_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner to stderr.
fn print_banner() {
    eprintln!(
        "postcoord v{} - post-coordinated expression repository",
        env!("CARGO_PKG_VERSION")
    );
}

//! # losh - Open-Hardware Catalog Tool
//!
//! The command-line front end of the catalog entity-graph engine.
//!
//! ## Usage
//!
//! ```bash
//! # Create a database and import a crawled product tree
//! losh init
//! losh import -f product.json
//!
//! # Preview the write order of a tree without saving it
//! losh order -f product.json
//!
//! # Export a stored product and everything it references
//! losh export --kind product --alt github.com/o/r -o product.json
//! losh status
//! ```

use clap::Parser;
use losh::cli;
use losh::config::{LogFormat, LoshConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    let config = match LoshConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    // Initialize tracing — LOSH_LOG_FORMAT=json enables machine-parseable output.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter.as_str().into());

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli, config) {
        tracing::error!(retryable = e.is_retryable(), "Error: {}", e);
        std::process::exit(1);
    }
}

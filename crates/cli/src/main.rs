//! Solehaus CLI - database migrations and order maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! sole-cli migrate
//!
//! # Cancel expired pending orders (run from cron)
//! sole-cli orders expire
//!
//! # List orders flagged for manual reconciliation
//! sole-cli orders reconcile
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sole-cli")]
#[command(author, version, about = "Solehaus CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Order maintenance
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Cancel pending orders whose checkout window has closed
    Expire {
        /// Maximum number of orders to cancel in one run
        #[arg(short, long, default_value_t = 500)]
        limit: i64,
    },
    /// List orders flagged for manual reconciliation
    Reconcile,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Orders { action } => match action {
            OrdersAction::Expire { limit } => commands::orders::expire(limit).await?,
            OrdersAction::Reconcile => commands::orders::reconcile().await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_expire_limit_defaults() {
        let cli = Cli::parse_from(["sole-cli", "orders", "expire"]);
        assert!(matches!(
            cli.command,
            Commands::Orders { action: OrdersAction::Expire { limit: 500 } }
        ));
    }
}

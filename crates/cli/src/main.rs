//! mnemo CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive or single-message chat over the CLI channel
//! - `health`   — Check memory layers, providers and the session store
//! - `maintain` — Run one memory maintenance pass
//! - `config`   — Show the configuration or write a starter file

use clap::{Parser, Subcommand};

mod channel;
mod commands;

#[derive(Parser)]
#[command(
    name = "mnemo",
    about = "mnemo — conversational agent with long-term memory",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// User the conversation belongs to
        #[arg(short, long, env = "MNEMO_USER", default_value = "local")]
        user: String,
    },

    /// Check the health of every component
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run decay, consolidation, pattern pruning and stream trimming once
    Maintain,

    /// Show the effective configuration
    Config {
        /// Write a starter config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat { message, user } => commands::chat::run(message, user).await?,
        Commands::Health { json } => commands::health::run(json).await?,
        Commands::Maintain => commands::maintain::run().await?,
        Commands::Config { init, force } => commands::config_cmd::run(init, force).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_accepts_single_message() {
        let cli = Cli::try_parse_from(["mnemo", "chat", "-m", "hello", "--user", "alice"]).unwrap();
        let Commands::Chat { message, user } = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(message.as_deref(), Some("hello"));
        assert_eq!(user, "alice");
    }

    #[test]
    fn force_requires_init() {
        assert!(Cli::try_parse_from(["mnemo", "config", "--force"]).is_err());
        assert!(Cli::try_parse_from(["mnemo", "config", "--init", "--force"]).is_ok());
    }
}

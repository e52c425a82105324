//! campaign-auth - sign in, sign up, and manage your profile from the terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::debug;

/// campaign-auth - Manage your campaign platform account.
#[derive(Parser)]
#[command(name = "campaign-auth")]
#[command(about = "Sign in, sign up, and manage your campaign platform profile")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    SignIn {
        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account and its profile
    SignUp(commands::SignUpArgs),

    /// Sign out and clear local state
    SignOut,

    /// Show session and profile
    Status,

    /// Refresh the session and reload the profile
    Refresh,

    /// Update profile fields, e.g. `update email=a@b.co follower_count=5000`
    Update {
        /// Fields as key=value
        #[arg(value_parser = commands::parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Fetch the profile again after a failure
    Retry,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    auth_config_and_utils::init_logging(&cli.log_level);
    debug!("campaign-auth starting");

    let result = match cli.command {
        Commands::SignIn { email } => commands::sign_in(email, &cli.format).await,
        Commands::SignUp(args) => commands::sign_up(args, &cli.format).await,
        Commands::SignOut => commands::sign_out(&cli.format).await,
        Commands::Status => commands::status(&cli.format).await,
        Commands::Refresh => commands::refresh(&cli.format).await,
        Commands::Update { fields } => commands::update(fields, &cli.format).await,
        Commands::Retry => commands::retry(&cli.format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e), &cli.format);
        std::process::exit(1);
    }
}

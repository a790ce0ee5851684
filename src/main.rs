//! # Identity Graph CLI (`idg`)
//!
//! The `idg` binary is the primary interface for the identity graph. It
//! provides commands for database initialization, one-shot identity
//! resolution, and starting the HTTP identity service.
//!
//! ## Usage
//!
//! ```bash
//! idg --config ./config/idg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `idg init` | Create the SQLite database and the contacts schema |
//! | `idg identify --email X --phone Y` | Resolve one observation into its cluster |
//! | `idg serve` | Start the HTTP identity service |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! idg init --config ./config/idg.toml
//!
//! # Resolve an observation with both identifiers
//! idg identify --email lorraine@hillvalley.edu --phone 123456
//!
//! # Email-only and phone-only observations are valid
//! idg identify --email lorraine@hillvalley.edu
//! idg identify --phone 123456
//!
//! # Start the HTTP service
//! idg serve --config ./config/idg.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use identity_graph::{config, identify, migrate, server};

/// Identity Graph CLI — reconciles partial contact observations into one
/// clustered identity graph.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "idg",
    about = "Identity Graph — reconcile overlapping contact records into canonical identities",
    version,
    long_about = "Identity Graph links partial, overlapping contact observations (an email \
    and/or a phone number) into clusters, each owned by one canonical primary contact. \
    Repeated appearances of the same customer under different details are unified under \
    that primary, with all other matching records kept as secondaries pointing at it."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/idg.toml`. Database, server, and resolver
    /// settings are read from this file.
    #[arg(long, global = true, default_value = "./config/idg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the contacts table with its
    /// lookup indexes. This command is idempotent — running it multiple
    /// times is safe.
    Init,

    /// Resolve one (email, phone) observation.
    ///
    /// Reconciles the supplied values against the stored contact graph and
    /// prints the resulting cluster: canonical primary id, every known
    /// email and phone number, and the secondary member ids. At least one
    /// of `--email` / `--phone` is required.
    Identify {
        /// Email address observed for the customer.
        #[arg(long)]
        email: Option<String>,

        /// Phone number observed for the customer.
        #[arg(long)]
        phone: Option<String>,
    },

    /// Start the HTTP identity service.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /identify` and `GET /health`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Identify { email, phone } => {
            identify::run_identify(&cfg, email, phone).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

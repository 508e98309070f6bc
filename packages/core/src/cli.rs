use clap::Parser;

/// CityGuard CLI arguments. Flags override the matching environment variables.
#[derive(Debug, Parser)]
#[command(
    name = "cityguard",
    version,
    about = "Local incident monitoring: weather and news, classified and delivered"
)]
pub struct Cli {
    /// Comma-separated locations to monitor (overrides LOCATIONS)
    #[arg(long)]
    pub locations: Option<String>,

    /// Polling interval in seconds (overrides POLL_INTERVAL_SECONDS)
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// HTTP port (overrides SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite connection URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run one ingestion cycle for every location, then exit
    #[arg(long)]
    pub once: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
}

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the four stages on a fixed interval until interrupted.
    Run(RunArgs),
    /// Run one full cycle and exit.
    Once(PipelineArgs),
    /// Stage 1: walk the paginated title list.
    Discover(PipelineArgs),
    /// Stage 2: fetch title details and chapter lists.
    Details(PipelineArgs),
    /// Stage 3: fetch image lists for chapters that have none.
    Images(PipelineArgs),
    /// Stage 4: rebuild the catalog and statistics.
    Assemble(PipelineArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Seconds to sleep between cycles.
    #[arg(long, env = "MANGAPIPE_INTERVAL_SECS", default_value_t = 2 * 60 * 60)]
    pub interval_secs: u64,

    /// Stop after this many cycles (default: run until interrupted).
    #[arg(long)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Site root (must be http/https).
    #[arg(long, env = "MANGAPIPE_BASE_URL", default_value = "https://manhuaus.com")]
    pub base_url: String,

    /// Directory holding the title list, per-title documents and catalog.
    #[arg(long, env = "MANGAPIPE_DATA_DIR", default_value = ".")]
    pub data_dir: String,

    /// Status document path (default: `<data-dir>/scraper_status.json`).
    #[arg(long, env = "MANGAPIPE_STATUS_FILE")]
    pub status_file: Option<String>,

    /// Maximum concurrent HTTP requests.
    #[arg(long, env = "MANGAPIPE_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Attempts per URL before giving up.
    #[arg(long, env = "MANGAPIPE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Delay between attempts.
    #[arg(long, env = "MANGAPIPE_RETRY_DELAY_MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    /// Per-request timeout.
    #[arg(long, env = "MANGAPIPE_TIMEOUT_SECS", default_value_t = 15)]
    pub timeout_secs: u64,

    /// Probe cover URLs with HEAD and only keep ones serving images.
    #[arg(long, env = "MANGAPIPE_VALIDATE_COVERS")]
    pub validate_covers: bool,

    /// Abort the cycle when a detail/image/assembly unit fails.
    #[arg(long, env = "MANGAPIPE_STRICT")]
    pub strict: bool,
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::cli::PipelineArgs;
use crate::fetch::RetryPolicy;
use crate::store::StorePaths;

pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: Url,
    pub paths: StorePaths,
    pub status_file: PathBuf,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub cycle_interval: Duration,
    pub validate_covers: bool,
    pub strict: bool,
}

impl PipelineConfig {
    pub fn from_args(args: &PipelineArgs) -> anyhow::Result<Self> {
        let base_url = Url::parse(args.base_url.trim()).context("parse --base-url")?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("--base-url must be http/https: {base_url}");
        }

        let data_dir = PathBuf::from(&args.data_dir);
        let status_file = match &args.status_file {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => data_dir.join("scraper_status.json"),
        };

        Ok(Self {
            base_url,
            paths: StorePaths::under(&data_dir),
            status_file,
            concurrency: args.concurrency.max(1),
            retry: RetryPolicy::new(args.max_retries, Duration::from_millis(args.retry_delay_ms)),
            request_timeout: Duration::from_secs(args.timeout_secs.max(1)),
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            validate_covers: args.validate_covers,
            strict: args.strict,
        })
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// `<base>/page/<n>/`.
    pub fn list_page_url(&self, page: u32) -> anyhow::Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!("page/{page}/"))
            .with_context(|| format!("build list page url for page {page}"))
    }
}

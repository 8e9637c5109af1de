//! What every stage runner shares.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::app::status::{LocalFsStatusStore, StatusReporter};
use crate::config::PipelineConfig;
use crate::fetch::Fetcher;
use crate::formats::CompletedStage;
use crate::pool::UnitFailure;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    Details,
    Images,
    Assemble,
}

impl Stage {
    /// Cycle order.
    pub const ALL: [Stage; 4] = [Self::Discover, Self::Details, Self::Images, Self::Assemble];

    pub fn name(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Details => "details",
            Self::Images => "images",
            Self::Assemble => "assemble",
        }
    }

    pub async fn run(self, ctx: &StageContext) -> anyhow::Result<StageReport> {
        match self {
            Self::Discover => crate::discover::run(ctx).await,
            Self::Details => crate::details::run(ctx).await,
            Self::Images => crate::images::run(ctx).await,
            Self::Assemble => crate::assemble::run(ctx).await,
        }
    }
}

#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub fetcher: Fetcher,
    pub store: Store,
    pub status: Arc<StatusReporter>,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub async fn new(config: PipelineConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let fetcher = Fetcher::new(config.request_timeout, config.retry)?;
        let store = Store::new(config.paths.clone());
        let status_store = Arc::new(LocalFsStatusStore::new(config.status_file.clone()));
        let status = Arc::new(StatusReporter::resume(status_store).await);
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            store,
            status,
            cancel,
        })
    }
}

/// Outcome of one stage whose own control flow completed.
///
/// A stage that could not complete returns `Err` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub succeeded: usize,
    pub failures: Vec<String>,
}

impl StageReport {
    pub fn from_failures<U>(
        succeeded: usize,
        failures: &[UnitFailure<U>],
        label: impl Fn(&U) -> String,
    ) -> Self {
        Self {
            succeeded,
            failures: failures
                .iter()
                .map(|f| format!("{}: {}", label(&f.unit), f.error))
                .collect(),
        }
    }

    /// Unit failures only escalate when running strict.
    pub fn aborts_cycle(&self, strict: bool) -> bool {
        strict && !self.failures.is_empty()
    }
}

/// Folds a stage result into the status entry recorded for it.
pub fn completed_stage(
    name: &str,
    result: &anyhow::Result<StageReport>,
    strict: bool,
) -> CompletedStage {
    let (exit_code, failures) = match result {
        Ok(report) => (i32::from(report.aborts_cycle(strict)), report.failures.clone()),
        Err(err) => (1, vec![format!("{err:#}")]),
    };
    CompletedStage {
        name: name.to_owned(),
        exit_code,
        completed_at: Utc::now(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_strictness() {
        let clean = Ok(StageReport {
            succeeded: 3,
            failures: Vec::new(),
        });
        let partial = Ok(StageReport {
            succeeded: 2,
            failures: vec!["solo-leveling: GET failed".to_owned()],
        });
        let fatal: anyhow::Result<StageReport> = Err(anyhow::anyhow!("page 1 unreachable"));

        assert_eq!(completed_stage(Stage::Details.name(), &clean, true).exit_code, 0);
        assert_eq!(completed_stage(Stage::Details.name(), &partial, false).exit_code, 0);
        assert_eq!(completed_stage(Stage::Details.name(), &partial, true).exit_code, 1);

        let entry = completed_stage(Stage::Discover.name(), &fatal, false);
        assert_eq!(entry.exit_code, 1);
        assert_eq!(entry.failures, ["page 1 unreachable"]);
    }

    #[test]
    fn unit_failures_are_labelled_by_unit() {
        let failures = vec![UnitFailure {
            unit: "tower-of-god",
            error: "GET https://site/tog failed".to_owned(),
        }];
        let report = StageReport::from_failures(4, &failures, |slug| slug.to_string());
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures, ["tower-of-god: GET https://site/tog failed"]);
    }
}

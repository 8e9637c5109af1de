use anyhow::Context as _;
use chrono::Utc;

use crate::stage::{Stage, StageContext, completed_stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// A stage failed hard (or, when strict, had unit failures).
    Aborted { stage: Stage },
    /// Shutdown was requested between stages.
    Interrupted,
}

/// Runs the stages in order, one cycle at a time, publishing status as it goes.
pub struct Orchestrator {
    ctx: StageContext,
}

impl Orchestrator {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Runs one stage and records it as completed. An `Err` means the stage's
    /// exit code was non-zero.
    pub async fn run_stage(&self, stage: Stage) -> anyhow::Result<()> {
        let ctx = &self.ctx;
        let name = stage.name();
        ctx.status.begin_stage(name).await;
        tracing::info!(stage = name, "stage started");

        let result = stage.run(ctx).await;
        let completed = completed_stage(name, &result, ctx.config.strict);
        let exit_code = completed.exit_code;
        match &result {
            Ok(report) => tracing::info!(
                stage = name,
                succeeded = report.succeeded,
                failed = report.failures.len(),
                exit_code,
                "stage finished"
            ),
            Err(err) => tracing::error!(stage = name, ?err, "stage failed"),
        }
        ctx.status.finish_stage(completed).await;

        match result {
            Err(err) => Err(err).with_context(|| format!("stage {name}")),
            Ok(report) if exit_code != 0 => Err(anyhow::anyhow!(
                "stage {name}: {} unit(s) failed",
                report.failures.len()
            )),
            Ok(_) => Ok(()),
        }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle = self.ctx.status.begin_cycle().await;
        tracing::info!(cycle, "cycle started");

        for stage in Stage::ALL {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!(cycle, stage = stage.name(), "shutdown requested; skipping remaining stages");
                return CycleOutcome::Interrupted;
            }
            if let Err(err) = self.run_stage(stage).await {
                tracing::error!(cycle, ?err, "cycle aborted");
                return CycleOutcome::Aborted { stage };
            }
        }

        tracing::info!(cycle, "cycle completed");
        CycleOutcome::Completed
    }

    /// Runs one cycle and leaves the status idle with no next run.
    pub async fn run_once(&self) -> CycleOutcome {
        let outcome = self.run_cycle().await;
        self.ctx.status.stopped().await;
        outcome
    }

    /// Cycles until cancelled, or until `max_cycles` cycles have run. An
    /// aborted cycle is followed by the normal sleep and another attempt.
    pub async fn run_forever(&self, max_cycles: Option<u64>) -> anyhow::Result<()> {
        let interval = self.ctx.config.cycle_interval;
        let cancel = &self.ctx.cancel;
        let mut cycles = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.run_cycle().await;
            cycles += 1;
            tracing::debug!(cycles, ?outcome, "cycle outcome");

            if cancel.is_cancelled() || max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            let next_run_at = Utc::now()
                + chrono::Duration::from_std(interval).context("cycle interval out of range")?;
            self.ctx.status.end_cycle(Some(next_run_at)).await;
            tracing::info!(%next_run_at, "sleeping until next cycle");

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        self.ctx.status.stopped().await;
        tracing::info!(cycles, "pipeline stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::cli::PipelineArgs;
    use crate::config::PipelineConfig;

    async fn orchestrator(temp: &tempfile::TempDir, cancel: CancellationToken) -> Orchestrator {
        let args = PipelineArgs {
            base_url: "http://127.0.0.1:9".to_owned(),
            data_dir: temp.path().display().to_string(),
            status_file: None,
            concurrency: 2,
            max_retries: 1,
            retry_delay_ms: 1,
            timeout_secs: 1,
            validate_covers: false,
            strict: false,
        };
        let config = PipelineConfig::from_args(&args).expect("config");
        Orchestrator::new(StageContext::new(config, cancel).await.expect("context"))
    }

    #[tokio::test]
    async fn cancelled_pipeline_runs_no_stage_and_stops_idle() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = orchestrator(&temp, cancel).await;

        orchestrator.run_forever(None).await?;

        let status = orchestrator.context().status.snapshot().await;
        assert!(!status.running);
        assert_eq!(status.cycle_number, 0);
        assert!(status.completed_stages.is_empty());
        assert_eq!(status.next_run_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_site_aborts_cycle_in_discovery() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let orchestrator = orchestrator(&temp, CancellationToken::new()).await;

        let outcome = orchestrator.run_once().await;
        assert_eq!(outcome, CycleOutcome::Aborted { stage: Stage::Discover });

        let status = orchestrator.context().status.snapshot().await;
        assert_eq!(status.completed_stages.len(), 1);
        assert_eq!(status.completed_stages[0].name, "discover");
        assert_eq!(status.completed_stages[0].exit_code, 1);
        assert!(!status.running);
        Ok(())
    }
}

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

use mangapipe::app::orchestrator::{CycleOutcome, Orchestrator};
use mangapipe::app::shutdown;
use mangapipe::cli::{Cli, Command, PipelineArgs};
use mangapipe::config::PipelineConfig;
use mangapipe::stage::{Stage, StageContext};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    mangapipe::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    let listener = shutdown::cancel_on_signal(cancel.clone());
    let result = dispatch(cli.command, cancel.clone()).await;
    cancel.cancel();
    let _ = listener.await;
    result
}

async fn dispatch(command: Command, cancel: CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => {
            let config = PipelineConfig::from_args(&args.pipeline)?
                .with_cycle_interval(Duration::from_secs(args.interval_secs));
            let orchestrator = Orchestrator::new(StageContext::new(config, cancel).await?);
            orchestrator.run_forever(args.max_cycles).await.context("run")?;
        }
        Command::Once(args) => {
            let orchestrator = orchestrator(&args, cancel).await?;
            match orchestrator.run_once().await {
                CycleOutcome::Completed | CycleOutcome::Interrupted => {}
                CycleOutcome::Aborted { stage } => {
                    anyhow::bail!("cycle aborted in stage {}", stage.name());
                }
            }
        }
        Command::Discover(args) => run_single(&args, cancel, Stage::Discover).await?,
        Command::Details(args) => run_single(&args, cancel, Stage::Details).await?,
        Command::Images(args) => run_single(&args, cancel, Stage::Images).await?,
        Command::Assemble(args) => run_single(&args, cancel, Stage::Assemble).await?,
    }

    Ok(())
}

async fn orchestrator(args: &PipelineArgs, cancel: CancellationToken) -> anyhow::Result<Orchestrator> {
    let config = PipelineConfig::from_args(args)?;
    Ok(Orchestrator::new(StageContext::new(config, cancel).await?))
}

async fn run_single(args: &PipelineArgs, cancel: CancellationToken, stage: Stage) -> anyhow::Result<()> {
    let orchestrator = orchestrator(args, cancel).await?;
    let result = orchestrator.run_stage(stage).await;
    orchestrator.context().status.stopped().await;
    result
}

use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    histoslide::logging::init().context("init logging")?;

    let cli = histoslide::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut config = histoslide::config::load(cli.config.as_deref()).context("load config")?;
    if let Some(data_root) = cli.data_root {
        config.data_root = data_root;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        histoslide::cli::Command::Run => {
            histoslide::pipeline::run(&config, &cancel)
                .await
                .context("run")?;
        }
        histoslide::cli::Command::Index(args) => {
            histoslide::pipeline::index(&config, args.force, &cancel)
                .await
                .context("index")?;
        }
        histoslide::cli::Command::Discover(args) => {
            histoslide::pipeline::discover(&config, args.force, &cancel)
                .await
                .context("discover")?;
        }
        histoslide::cli::Command::Merge => {
            histoslide::pipeline::merge(&config, &cancel)
                .await
                .context("merge")?;
        }
    }

    Ok(())
}

//! Berth CLI binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use berth_cli::cli::{Cli, Commands};
use berth_cli::commands::{ServicesCommand, UpCommand};
use berth_cli::output::OutputFormat;
use berth_core::{BerthConfig, DockerRuntime, RuntimeGateway};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("berth=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let registry = berth_cli::default_registry(&config)?;
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Services => {
            ServicesCommand::new(&registry).execute(&mut stdout, &format)?;
        }
        Commands::Up(args) => {
            let cmd = UpCommand::new(&registry, &config);
            // Resolve before touching Docker so bad references fail fast.
            cmd.prepare(args)?;

            let gateway = connect(&config).await?;
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let shutdown = cancel.clone();
            cmd.execute(
                &mut stdout,
                &format,
                args,
                gateway,
                cancel,
                async move { shutdown.cancelled().await },
            )
            .await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<BerthConfig> {
    let config = match &cli.config {
        Some(path) => BerthConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BerthConfig::default(),
    };
    Ok(config.with_env_overrides())
}

async fn connect(config: &BerthConfig) -> anyhow::Result<Arc<dyn RuntimeGateway>> {
    let docker = match &config.runtime.docker_host {
        Some(url) => DockerRuntime::connect_with_url(url),
        None => DockerRuntime::connect(),
    }
    .context("connecting to Docker")?;
    docker.ping().await.context("Docker daemon is not responding")?;
    Ok(Arc::new(docker))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        cancel.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_cli::cli::Format;

    #[test]
    fn test_default_config_without_flag() {
        let cli = Cli::parse_from(["berth", "services"]);
        let config = load_config(&cli).expect("config");
        assert_eq!(config.startup.attempts, 1);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli::parse_from(["berth", "-c", "/nonexistent/berth.toml", "services"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_format_flag() {
        let cli = Cli::parse_from(["berth", "-f", "json", "services"]);
        assert_eq!(cli.format, Format::Json);
    }

    #[tokio::test]
    async fn test_up_unknown_service_fails_before_docker() {
        let cli = Cli::parse_from(["berth", "up", "oracle"]);
        let err = run(cli).await.expect_err("unsupported");
        assert!(err.to_string().contains("oracle"));
    }
}

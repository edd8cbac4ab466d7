mod cli;

use clap::Parser;
use cli::{Cli, Commands, ListArgs, RunArgs, ValidateArgs};
use gridfetch::collector::CredentialProvider;
use gridfetch::config::Config;
use gridfetch::error::PipelineError;
use gridfetch::observability::init_tracing;
use gridfetch::pipeline::{PipelineOrchestrator, select_endpoints};
use gridfetch::shutdown::ShutdownSignal;
use gridfetch::storage::{ObjectStorage, StorageClient};
use std::process::ExitCode;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<ExitCode, BoxError> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate(args) => validate(args).await,
        Commands::List(args) => list(args).await,
    }
}

async fn run(args: RunArgs) -> Result<ExitCode, BoxError> {
    let config = Config::load(args.config)?;
    let specs = select_endpoints(&config.endpoints, &args.endpoints)?;

    let client = StorageClient::from_config(&config.storage)?;
    client
        .verify_access(&config.storage.root_prefix)
        .await
        .map_err(PipelineError::from)?;
    let storage: Arc<dyn ObjectStorage> = Arc::new(client);

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    let orchestrator = PipelineOrchestrator::from_config(
        &config,
        CredentialProvider::default(),
        storage,
        shutdown,
    )?;

    let summary = orchestrator.run_pipeline(&specs).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn validate(args: ValidateArgs) -> Result<ExitCode, BoxError> {
    let config = Config::load(args.config)?;
    tracing::info!(endpoints = config.endpoints.len(), "Configuration is valid");

    if !args.offline {
        StorageClient::from_config(&config.storage)?
            .verify_access(&config.storage.root_prefix)
            .await
            .map_err(PipelineError::from)?;
    }

    println!("{}", toml::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}

async fn list(args: ListArgs) -> Result<ExitCode, BoxError> {
    let config = Config::load(args.config)?;
    let prefix = args.prefix.unwrap_or_else(|| config.storage.root_prefix.clone());

    let objects = StorageClient::from_config(&config.storage)?
        .list(&prefix, args.format)
        .await?;
    println!("{}", serde_json::to_string_pretty(&objects)?);
    Ok(ExitCode::SUCCESS)
}

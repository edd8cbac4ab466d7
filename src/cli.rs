use clap::{Parser, Subcommand};
use gridfetch::format::DataFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridfetch")]
#[command(about = "Collect energy-market data from HTTP APIs and persist it to object storage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one collection pass and print the run summary as JSON
    Run(RunArgs),
    /// Load and validate configuration, then print the effective settings
    Validate(ValidateArgs),
    /// List stored objects as JSON
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Configuration file (defaults to $GRIDFETCH_CONFIG or config/gridfetch.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Only run the named endpoint; repeat for several
    #[arg(long = "endpoint", short)]
    pub endpoints: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file (defaults to $GRIDFETCH_CONFIG or config/gridfetch.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Skip the bucket access check
    #[arg(long)]
    pub offline: bool,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Configuration file (defaults to $GRIDFETCH_CONFIG or config/gridfetch.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Key prefix to list (defaults to storage.root_prefix)
    #[arg(long, short)]
    pub prefix: Option<String>,

    /// Only objects whose extension maps to this format (csv, json, parquet, ...)
    #[arg(long, short)]
    pub format: Option<DataFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_endpoints() {
        let cli = Cli::parse_from([
            "gridfetch",
            "run",
            "--config",
            "prod.toml",
            "-e",
            "fuel-mix",
            "--endpoint",
            "lmp",
        ]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, Some(PathBuf::from("prod.toml")));
                assert_eq!(args.endpoints, ["fuel-mix", "lmp"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from(["gridfetch", "validate"]);
        assert!(matches!(
            cli.command,
            Commands::Validate(ValidateArgs {
                config: None,
                offline: false
            })
        ));

        let cli = Cli::parse_from(["gridfetch", "validate", "--offline"]);
        assert!(matches!(
            cli.command,
            Commands::Validate(ValidateArgs { offline: true, .. })
        ));
    }

    #[test]
    fn test_parse_list_with_format() {
        let cli = Cli::parse_from(["gridfetch", "list", "-p", "raw/iso_ne", "--format", "csv"]);
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.prefix.as_deref(), Some("raw/iso_ne"));
                assert_eq!(args.format, Some(DataFormat::Csv));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["gridfetch", "list", "--format", "xlsx"]).is_err());
    }
}

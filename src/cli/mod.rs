//! CLI module for Kiln
//!
//! - `serve`: run the HTTP server (default)
//! - `submit` / `status`: talk to a running server
//! - `config`: inspect the effective configuration

use clap::{Parser, Subcommand};

pub mod client;
pub mod config;

/// Kiln image build service
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Container image build and publish service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Submit a build to a running server
    Submit(client::SubmitArgs),
    /// Show the status of a build
    Status {
        /// Build ID
        id: String,
        /// Server base URL
        #[arg(long, default_value = client::DEFAULT_SERVER)]
        server: String,
    },
    /// Inspect configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) | None => crate::server::run().await,
        Some(Commands::Submit(args)) => client::submit(args).await,
        Some(Commands::Status { id, server }) => client::status(&server, &id).await,
        Some(Commands::Config(cmd)) => config::run(cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_parses() {
        let cli = Cli::try_parse_from(["kiln"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_submit_args() {
        let cli = Cli::try_parse_from([
            "kiln",
            "submit",
            "acme/widgets",
            "--ref",
            "main",
            "--tag",
            "v1",
            "--tag",
            "latest",
            "--registry",
            "registry.example.com/acme/widgets",
            "--build-arg",
            "MODE=release",
        ])
        .unwrap();

        let Some(Commands::Submit(args)) = cli.command else {
            panic!("expected submit");
        };
        let body = args.to_request().unwrap();
        assert_eq!(body.source_repo, "acme/widgets");
        assert_eq!(body.git_ref, "main");
        assert_eq!(body.tags, vec!["v1", "latest"]);
        assert_eq!(body.push.registry_repo, "registry.example.com/acme/widgets");
        assert_eq!(body.build_args.get("MODE").map(String::as_str), Some("release"));
        assert!(body.push.object_storage.is_none());
    }

    #[test]
    fn test_submit_object_storage_args() {
        let cli = Cli::try_parse_from([
            "kiln",
            "submit",
            "acme/widgets",
            "--bucket",
            "images",
            "--region",
            "us-west-2",
            "--key-prefix",
            "builds",
        ])
        .unwrap();

        let Some(Commands::Submit(args)) = cli.command else {
            panic!("expected submit");
        };
        let body = args.to_request().unwrap();
        let storage = body.push.object_storage.unwrap();
        assert_eq!(storage.bucket, "images");
        assert_eq!(storage.region, "us-west-2");
        assert_eq!(storage.key_prefix, "builds");
    }

    #[test]
    fn test_malformed_build_arg_rejected() {
        let cli =
            Cli::try_parse_from(["kiln", "submit", "acme/widgets", "--build-arg", "NOVALUE"])
                .unwrap();
        let Some(Commands::Submit(args)) = cli.command else {
            panic!("expected submit");
        };
        assert!(args.to_request().is_err());
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use enclave_deploy::{config, pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Deploy applications into attested TEE instances",
    long_about = None
)]
struct Cli {
    /// Directory where deployment contexts are persisted
    #[arg(long, default_value = ".enclave-deploy")]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt, submit, attest and provision an application
    Deploy {
        /// Path to the application TOML configuration
        #[arg(long, default_value = "app.toml")]
        config: PathBuf,
    },

    /// Re-verify the attestation of a deployed instance
    Verify {
        /// Instance id of a previous deployment
        id: Uuid,

        #[arg(long, default_value = "app.toml")]
        config: PathBuf,
    },

    /// Show the remote status of a deployed instance
    Status {
        id: Uuid,

        #[arg(long, default_value = "app.toml")]
        config: PathBuf,
    },

    /// Stop a deployed instance
    Stop {
        id: Uuid,

        #[arg(long, default_value = "app.toml")]
        config: PathBuf,
    },

    /// Remove the persisted context of an instance
    Clean {
        id: Uuid,

        /// Do not fail if nothing is persisted for this id
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,enclave_deploy=info,deploy_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy { config } => {
            let conf = config::load_app_conf(&config)?;
            let id = pipeline::deploy(&conf, &cli.config_root).await?;
            println!("{id}");
        }
        Commands::Verify { id, config } => {
            let conf = config::load_app_conf(&config)?;
            pipeline::verify(&conf, &cli.config_root, id).await?;
        }
        Commands::Status { id, config } => {
            let conf = config::load_app_conf(&config)?;
            pipeline::status(&conf, &cli.config_root, id).await?;
        }
        Commands::Stop { id, config } => {
            let conf = config::load_app_conf(&config)?;
            pipeline::stop(&conf, &cli.config_root, id).await?;
        }
        Commands::Clean { id, force } => {
            pipeline::clean(&cli.config_root, id, force)?;
        }
    }

    Ok(())
}

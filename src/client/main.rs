// src/client/main.rs

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use gocbt_license::client::license::LicenseClient;
use gocbt_license::config::ClientConfig;
use gocbt_license::errors::LicenseResult;
use gocbt_license::hardware::{get_machine_fingerprint, FingerprintSource};

/// GO CBT license tool
/// Activates and checks this computer's GO CBT license
#[derive(Parser)]
#[command(name = "gocbt_license")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activation server URL (overrides GOCBT_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Activate this computer with a payment reference
    #[command(alias = "a")]
    Activate {
        /// Email used for the payment
        #[arg(long)]
        email: String,
        /// Payment reference from the receipt
        #[arg(long)]
        reference: String,
    },

    /// Check whether this computer is licensed
    #[command(alias = "c")]
    Check {
        /// Ask the server even when a cached activation exists
        #[arg(long)]
        online: bool,
    },

    /// Release this computer and remove the saved activation
    Deactivate,

    /// Remove the saved activation without contacting the server
    Clear,

    /// Show the saved activation state
    #[command(alias = "s")]
    Status,

    /// Print this computer's machine fingerprint
    Fingerprint,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            log::debug!("failure kind: {:?}", e.kind());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> LicenseResult<()> {
    if let Commands::Fingerprint = cli.command {
        let fp = get_machine_fingerprint();
        println!("{}", fp.id);
        if fp.source == FingerprintSource::Fallback {
            eprintln!("warning: machine attributes unavailable, fingerprint is random");
        }
        return Ok(());
    }

    let mut config = ClientConfig::load()?;
    if let Some(server) = cli.server {
        config.server_url = server.trim_end_matches('/').to_string();
        config.validate()?;
    }
    if let Commands::Check { online: true } = cli.command {
        config.revalidate_online = true;
    }
    let client = LicenseClient::new(config)?;

    match cli.command {
        Commands::Activate { email, reference } => {
            let result = client.activate(&reference, &email, None).await?;
            println!("Activated. License key: {}", result.license_key);
        }
        Commands::Check { .. } => {
            let result = client.check().await?;
            let source = if result.offline { "cached" } else { "server" };
            println!("Licensed ({source}).");
            if let Some(warning) = result.warning {
                eprintln!("note: {warning}");
            }
        }
        Commands::Deactivate => {
            let result = client.deactivate().await?;
            if result.server_acknowledged {
                println!("Deactivated.");
            } else {
                println!("Local activation removed (server not reached).");
            }
        }
        Commands::Clear => {
            client.clear().await?;
            println!("Local activation removed.");
        }
        Commands::Status => {
            let status = client.status().await;
            println!("machine:  {}", client.machine_id());
            println!("state:    {}", client.store().path().display());
            println!("status:   {status}");
        }
        Commands::Fingerprint => {}
    }

    Ok(())
}

//! Baton CLI - compile, encode, and deploy workflow compositions.
//!
//! Reads a serialized composition document and either pretty-prints it,
//! emits its conductor source, or publishes it under a name through the
//! management API.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

use baton::compose::Composition;
use baton::deploy::{conductor_source, encode, DeployClient, DeployConfig};

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Composition compiler and conductor for serverless workflows", long_about = None)]
struct Cli {
    /// Path to a serialized composition document (JSON)
    source: PathBuf,

    /// Compile and publish the composition under this name
    #[arg(long, value_name = "NAME", conflicts_with = "encode")]
    deploy: Option<String>,

    /// Emit the conductor source for the composition
    #[arg(long)]
    encode: bool,

    /// Management API host (default: $BATON_APIHOST)
    #[arg(long)]
    apihost: Option<String>,

    /// Authorization key, user:password (default: $BATON_AUTH)
    #[arg(long)]
    auth: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.source)?;
    let composition: Composition = serde_json::from_str(&text)?;

    if let Some(name) = cli.deploy {
        let encoded = encode(composition, Some(&name))?;
        let config = DeployConfig::resolve(cli.apihost, cli.auth, cli.insecure)?;
        let client = DeployClient::new(config)?;
        client.deploy(encoded.actions())?;
        println!("deployed {}", name);
    } else if cli.encode {
        println!("{}", conductor_source(&composition)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&composition)?);
    }

    Ok(())
}

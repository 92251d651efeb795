//! CLI entry point for the mediagrab tool.

use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use mediagrab_core::{Credentials, Orchestrator, Site};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let Some(site) = Site::parse(&args.site) else {
        anyhow::bail!(
            "unknown site '{}'; expected one of tiktok, twitter, instagram, \
             pinterest, gallery, chapter, upscale",
            args.site
        );
    };

    // The environment is read exactly once here; core modules only ever see
    // the explicit configuration value.
    let config = args.to_config(credentials_from_env());
    let orchestrator = Orchestrator::new(config);

    info!(%site, "starting job");
    let envelope = if args.chapter_list {
        orchestrator.run_chapter_list(&args.input).await
    } else if site == Site::Upscale {
        let image = tokio::fs::read(&args.input).await?;
        orchestrator.run_upscale(&image).await
    } else {
        orchestrator.run(site, &args.input).await
    };

    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if !envelope.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolves per-site credentials from the process environment.
fn credentials_from_env() -> HashMap<String, Credentials> {
    let mut credentials = HashMap::new();
    if let (Ok(email), Ok(password)) = (
        std::env::var("PINTEREST_EMAIL"),
        std::env::var("PINTEREST_PASSWORD"),
    ) {
        credentials.insert("pinterest".to_string(), Credentials::new(email, password));
    }
    credentials
}

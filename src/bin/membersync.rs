//! membersync CLI: migrate, serve webhooks, clean up.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use membersync::access::{BrivoAuthenticator, BrivoClient};
use membersync::config::Config;
use membersync::drivers::cleanup::{self, CleanupScope};
use membersync::drivers::webhook::{self, WebhookState};
use membersync::drivers::{Provisioning, migrate};
use membersync::engine::{Orchestrator, OrchestratorSettings};
use membersync::membership::MindbodyClient;
use membersync::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "membersync", about = "Mirror membership records into access control")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update an access-control user for every member
    Migrate {
        /// Where to write the run report
        #[arg(long, default_value = migrate::DEFAULT_REPORT)]
        report: PathBuf,
    },
    /// Receive membership webhooks
    Serve {
        /// Listen port (defaults to PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Delete access-control users and their credentials
    Clean {
        /// Every user and credential, not only the member group
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// Where to write the run report
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    match cli.command {
        Command::Migrate { report } => cmd_migrate(&config, report).await,
        Command::Serve { port } => cmd_serve(&config, port.unwrap_or(config.port)).await,
        Command::Clean { all, yes, report } => cmd_clean(&config, all, yes, report).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<Orchestrator> {
    let api = Arc::new(BrivoClient::new(&config.brivo)?);
    let authenticator = Arc::new(BrivoAuthenticator::new(&config.brivo)?);
    let orchestrator = Orchestrator::connect(
        api,
        authenticator,
        OrchestratorSettings::from_config(config),
    )
    .await
    .context("failed to authenticate with the access-control system")?;
    Ok(orchestrator)
}

async fn cmd_migrate(config: &Config, report: PathBuf) -> anyhow::Result<()> {
    let directory = MindbodyClient::new(&config.mindbody, config.debug)?;
    let orchestrator = connect(config).await?;
    let provisioning = Provisioning::from_config(config);

    let summary = migrate::run(&orchestrator, &directory, &provisioning, &report).await?;
    println!(
        "Migration complete: {} succeeded, {} failed. Report written to {}",
        summary.success_count,
        summary.failure_count(),
        report.display()
    );
    Ok(())
}

async fn cmd_serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let signing_key = config
        .mindbody
        .webhook_key
        .clone()
        .context("MINDBODY_WEBHOOK_KEY is required to receive webhooks")?;
    let orchestrator = connect(config).await?;
    let state = WebhookState::new(orchestrator, Provisioning::from_config(config), signing_key);
    webhook::serve(state, port).await?;
    Ok(())
}

async fn cmd_clean(
    config: &Config,
    all: bool,
    yes: bool,
    report: Option<PathBuf>,
) -> anyhow::Result<()> {
    let target = if all {
        "ALL users and credentials"
    } else {
        "all users in the member group and their credentials"
    };
    if !yes && !confirm(&format!("This will delete {target}. Continue?"))? {
        println!("Aborted.");
        return Ok(());
    }

    let orchestrator = connect(config).await?;
    let scope = CleanupScope {
        member_group_id: config.brivo.member_group_id,
        barcode_field_id: config.brivo.barcode_field_id,
        all,
    };
    let summary = cleanup::run(&orchestrator, scope, report.as_deref()).await?;
    println!(
        "Cleanup complete: {} deleted, {} failed.",
        summary.success_count,
        summary.failure_count()
    );
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

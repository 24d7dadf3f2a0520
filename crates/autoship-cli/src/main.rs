//! Autoship - Automated Change-Request Pipeline CLI
//!
//! The `autoship` command drives a natural-language change request
//! through the full pipeline against a GitHub repository.
//!
//! ## Commands
//!
//! - `submit`: Run a change request through the pipeline end to end
//! - `checks`: Show the aggregate verification state of a proposal
//! - `feature-key`: Derive the feature key and branch for a request

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use autoship_agents::{AgentEndpointConfig, HttpStageCapability};
use autoship_core::{
    ChangeRequest, DeployTrigger, Disposition, HostGateway, OutcomeKind, Pipeline, PipelineConfig,
    Priority, ProposalRef, RunStatus,
};
use autoship_github::{GithubConfig, GithubGateway};

#[derive(Parser)]
#[command(name = "autoship")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated change-request pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a change request through the pipeline end to end
    Submit {
        /// Short title of the requested change
        title: String,

        /// Full request text
        description: String,

        /// Priority hint (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Base branch proposals target
        #[arg(short, long, default_value = "main")]
        base: String,

        /// Agent service base URL (default: AUTOSHIP_AGENT_URL)
        #[arg(long)]
        agent_url: Option<String>,

        /// Print the final run record as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Show the aggregate verification state of an open proposal
    Checks {
        /// Proposal (pull request) number
        proposal: String,
    },

    /// Derive the feature key and branch name for a request
    FeatureKey {
        /// Short title of the requested change
        title: String,

        /// Full request text
        description: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autoship_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Submit {
            title,
            description,
            priority,
            base,
            agent_url,
            output_json,
        } => {
            cmd_submit(
                &title,
                &description,
                &priority,
                &base,
                agent_url.as_deref(),
                output_json,
            )
            .await
        }
        Commands::Checks { proposal } => cmd_checks(&proposal).await,
        Commands::FeatureKey { title, description } => cmd_feature_key(&title, &description),
    }
}

fn parse_priority(value: &str) -> Result<Priority> {
    match value.to_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        other => anyhow::bail!("unknown priority: {other} (expected low, normal, or high)"),
    }
}

fn github_gateway() -> Result<Arc<GithubGateway>> {
    let config = GithubConfig::from_env();
    if config.owner.is_empty() || config.repo.is_empty() {
        anyhow::bail!("AUTOSHIP_GITHUB_OWNER and AUTOSHIP_GITHUB_REPO must be set");
    }
    let gateway = GithubGateway::new(config).context("failed to build GitHub client")?;
    Ok(Arc::new(gateway))
}

/// Run a change request through the pipeline end to end
async fn cmd_submit(
    title: &str,
    description: &str,
    priority: &str,
    base: &str,
    agent_url: Option<&str>,
    output_json: bool,
) -> Result<()> {
    let priority = parse_priority(priority)?;
    let request = ChangeRequest::new(title, description).with_priority(priority);
    let feature_key = request.feature_key();

    let gateway = github_gateway()?;
    let agent_config = match agent_url {
        Some(url) => AgentEndpointConfig::new(url),
        None => AgentEndpointConfig::from_env(),
    };
    let capability =
        HttpStageCapability::new(agent_config).context("failed to build agent client")?;

    let pipeline = Pipeline::new(
        Arc::clone(&gateway) as Arc<dyn HostGateway>,
        gateway as Arc<dyn DeployTrigger>,
        Arc::new(capability),
        PipelineConfig::default().with_base_branch(base),
    );

    println!("Feature: {}", feature_key);
    println!("Branch:  {}", feature_key.branch_name());
    println!();

    let handle = pipeline.submit(request).context("submit failed")?;
    let run_id = handle.run_id;
    let disposition = handle.wait().await?;
    let status = pipeline.status(run_id)?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        render_status(&status);
    }

    match disposition {
        Disposition::Merged => Ok(()),
        Disposition::Rejected => anyhow::bail!(
            "request rejected: {}",
            status.reason.as_deref().unwrap_or("no reason recorded")
        ),
        Disposition::Aborted => anyhow::bail!(
            "run aborted: {}",
            status.reason.as_deref().unwrap_or("no reason recorded")
        ),
        Disposition::Pending => anyhow::bail!("run finished without a terminal disposition"),
    }
}

fn render_status(status: &RunStatus) {
    for outcome in &status.outcomes {
        let marker = match outcome.kind {
            OutcomeKind::Success => "✓",
            OutcomeKind::Failure => "✗",
            OutcomeKind::NeedsInput => "?",
        };
        match &outcome.reason {
            Some(reason) => println!("  {} {} ({})", marker, outcome.stage, reason),
            None => println!("  {} {}", marker, outcome.stage),
        }
    }

    println!();
    println!("Run:    {}", status.run_id);
    println!("State:  {}", status.state);
    if let Some(proposal) = &status.proposal {
        println!("PR:     #{}", proposal);
    }
    if let Some(branch) = &status.branch {
        println!("Branch: {}", branch);
    }
}

/// Show the aggregate verification state of an open proposal
async fn cmd_checks(proposal: &str) -> Result<()> {
    let gateway = github_gateway()?;
    let state = gateway
        .verification_state(&ProposalRef(proposal.to_string()))
        .await
        .context(format!("failed to read checks for proposal #{proposal}"))?;

    println!("Proposal #{}: {}", proposal, state);
    Ok(())
}

/// Derive the feature key and branch name for a request
fn cmd_feature_key(title: &str, description: &str) -> Result<()> {
    let request = ChangeRequest::new(title, description);
    let key = request.feature_key();

    println!("Feature: {}", key);
    println!("Branch:  {}", key.branch_name());
    Ok(())
}

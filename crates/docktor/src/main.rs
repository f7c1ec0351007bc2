//! Docktor CLI
//!
//! Investigates the Warning events of the current cluster and writes a
//! `cluster-analysis-*.md` report.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use docktor::config::StrategyKind;
use docktor::gateway::KubectlGateway;
use docktor::report::summary_line;
use docktor::synthesizer::AnthropicSynthesizer;
use docktor::{write_report, DocktorConfig, DocktorError, Pipeline};

/// Kubernetes incident triage - investigates Warning events and writes a root-cause report
#[derive(Parser)]
#[command(name = "docktor")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON); defaults apply when it does not exist
    #[arg(long, default_value = "docktor.json")]
    config: PathBuf,

    /// Directory the report is written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// How diagnostic commands are chosen
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Maximum diagnostic steps per problem group
    #[arg(long)]
    max_steps: Option<usize>,

    /// Problem groups investigated concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// kubeconfig file to use
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Model used for analysis
    #[arg(long)]
    model: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<DocktorConfig> {
        let mut config = DocktorConfig::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;

        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(strategy) = self.strategy {
            config.planner.strategy = strategy;
        }
        if let Some(max_steps) = self.max_steps {
            config.planner.max_steps = max_steps;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(context) = &self.context {
            config.gateway.context = Some(context.clone());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            config.gateway.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(model) = &self.model {
            config.synthesis.model.clone_from(model);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "docktor=debug" } else { "docktor=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config()?;

    let api_key = std::env::var("ANTHROPIC_API_KEY").ok();
    if api_key.is_none() {
        eprintln!(
            "{}",
            "ANTHROPIC_API_KEY is not set; analyses will be placeholders".yellow()
        );
    }
    let synthesizer = AnthropicSynthesizer::new(&config.synthesis, api_key)
        .context("Failed to create analysis client")?;
    let gateway = KubectlGateway::new(config.gateway.clone());
    let output_dir = config.output_dir.clone();

    let pipeline = Pipeline::new(Arc::new(gateway), Arc::new(synthesizer), config);

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupted, finishing in-flight commands and writing a partial report".yellow()
            );
            cancel.cancel();
        }
    });

    println!("{}", "Collecting cluster Warning events...".cyan());
    let outcome = match pipeline.run().await {
        Ok(outcome) => outcome,
        Err(e @ (DocktorError::Connectivity(_) | DocktorError::EventListing(_))) => {
            error!(error = %e, "Event collection failed");
            eprintln!("{} {e}", "✗".red());
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let path = write_report(&outcome.report, &output_dir)
        .with_context(|| format!("Failed to write report to {}", output_dir.display()))?;
    info!(path = %path.display(), "Report written");

    println!("{}", summary_line(&outcome.report));
    match &outcome.fatal {
        None => println!(
            "{}",
            format!("✓ Report written to {}", path.display()).green()
        ),
        Some(condition) => {
            println!(
                "{}",
                format!("⚠ Partial report written to {}", path.display()).yellow()
            );
            eprintln!("{} {condition}", "✗".red());
        }
    }

    std::process::exit(outcome.exit_code());
}

//! Logwarden CLI
//!
//! Command-line entry point for the Logwarden alert engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use logwarden::alerting::{LogNotifier, MemoryAlertStore, Notifier, SnsNotifier};
use logwarden::query::CloudWatchLogsBackend;
use logwarden::{Config, CycleReport, Engine};

/// Logwarden - threshold alerting for CloudWatch Logs
#[derive(Parser)]
#[command(name = "logwarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "LOGWARDEN_CONFIG", default_value = "logwarden.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate all rules every run interval until interrupted
    Run {
        /// Log notifications instead of publishing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single cycle and exit
    Check {
        /// Log notifications instead of publishing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file and list its rules
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return ExitCode::SUCCESS;
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Error loading configuration");
            return ExitCode::FAILURE;
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run { dry_run } => run_loop(config, dry_run).await,
        Commands::Check { dry_run } => run_check(config, dry_run, cli.format).await,
        Commands::Validate => run_validate(&config, cli.format),
        Commands::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_engine(config: &Config, dry_run: bool) -> Engine {
    let sdk_config = logwarden::aws::sdk_config(config.general.aws_region.as_deref()).await;

    let notifier: Arc<dyn Notifier> = if dry_run {
        info!("Dry run: notifications will be logged, not published");
        Arc::new(LogNotifier)
    } else {
        Arc::new(SnsNotifier::new(&sdk_config))
    };

    Engine::from_config(
        config,
        Arc::new(CloudWatchLogsBackend::new(&sdk_config)),
        Arc::new(MemoryAlertStore::new()),
        notifier,
    )
}

async fn run_loop(config: Config, dry_run: bool) -> anyhow::Result<()> {
    let rules = config.rules();
    let engine = build_engine(&config, dry_run).await;

    info!(
        rules = rules.len(),
        run_interval = %humantime::format_duration(config.general.run_interval),
        "Starting Logwarden"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let cycles = engine.run(&rules, config.general.run_interval, shutdown).await;
    info!(cycles, "Logwarden stopped");
    Ok(())
}

async fn run_check(config: Config, dry_run: bool, format: OutputFormat) -> anyhow::Result<()> {
    let rules = config.rules();
    let engine = build_engine(&config, dry_run).await;

    let report = engine.run_cycle(&rules).await;
    print_report(&report, format)
}

fn print_report(report: &CycleReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!("Cycle {}", report.id);
            println!("  Rules:      {}", report.rules);
            println!("  Results:    {}", report.results);
            println!("  Alerts:     {}", report.alerts);
            println!("  Recoveries: {}", report.recoveries);
            println!("  Delivered:  {}", report.delivered);
            println!("  Failed:     {}", report.failed);
            println!("  Elapsed:    {:?}", report.elapsed);
        }
    }
    Ok(())
}

fn run_validate(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let rules = config.rules();

    match format {
        OutputFormat::Json => {
            let rules: Vec<_> = rules.iter().map(|r| r.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        OutputFormat::Text => {
            println!("Configuration OK: {} rule(s)", rules.len());
            for rule in &rules {
                println!(
                    "  {:<24} {} >= {} in {} -> {}{}",
                    rule.name,
                    rule.log_group,
                    rule.num_events,
                    humantime::format_duration(rule.timeframe),
                    rule.target,
                    if rule.notify_ok { " (notify ok)" } else { "" },
                );
            }
        }
    }
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "logwarden", &mut io::stdout());
}

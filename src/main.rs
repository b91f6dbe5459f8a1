//! Retrieval Eval CLI
//!
//! Indexes reference PDFs into the vector-search service and scores filtered
//! retrieval against ground truth.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use retrieval_eval::{
    client::ColivaraClient,
    config::Config,
    evaluate::{Accuracy, ResultLog},
    fixtures::Fixtures,
    membership::MembershipEncoding,
    runner::RunDriver,
    sync::UploadMode,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Retrieval Eval - filtered retrieval benchmark against a hosted vector-search API
#[derive(Parser)]
#[command(name = "retrieval-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync sources and evaluate retrieval for each question
    Run(RunArgs),

    /// Index the sources of the selected questions without searching
    Sync(RunArgs),

    /// Summarize the result log
    Summary {
        /// Result log to read (defaults to the configured one)
        #[arg(long)]
        results: Option<PathBuf>,

        /// Count every record instead of only the latest per question
        #[arg(long)]
        all: bool,
    },

    /// Show configuration and test the service connection
    Check,
}

#[derive(Args)]
struct RunArgs {
    /// Question ids to evaluate (comma-separated); defaults to the configured set
    #[arg(long, value_delimiter = ',')]
    qids: Vec<u32>,

    /// Only process the first N questions
    #[arg(long)]
    limit: Option<usize>,

    /// Number of results to request per search
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Upload whole documents or rendered pages
    #[arg(long, value_enum)]
    mode: Option<UploadMode>,

    /// Metadata encoding used for membership filtering
    #[arg(long, value_enum)]
    encoding: Option<MembershipEncoding>,

    /// Count repeated hits of the same document separately
    #[arg(long)]
    no_dedupe: bool,

    /// Directory containing questions.json and ground_truths.json
    #[arg(long)]
    dataset_dir: Option<PathBuf>,

    /// Root of the reference documents ({source_dir}/{category}/{id}.pdf)
    #[arg(long)]
    source_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Fold command-line overrides into `config`; returns the qids to process.
    fn apply(&self, config: &mut Config) -> Vec<u32> {
        if let Some(top_k) = self.top_k {
            config.eval.top_k = Some(top_k);
        }
        if let Some(mode) = self.mode {
            config.eval.mode = mode;
        }
        if let Some(encoding) = self.encoding {
            config.eval.encoding = encoding;
        }
        if self.no_dedupe {
            config.eval.dedupe = false;
        }
        if let Some(dir) = &self.dataset_dir {
            config.paths = config.paths.clone().with_dataset_dir(dir);
        }
        if let Some(dir) = &self.source_dir {
            config.paths.source_dir = dir.clone();
        }

        let mut qids = if self.qids.is_empty() {
            config.eval.qids.clone()
        } else {
            self.qids.clone()
        };
        if let Some(limit) = self.limit {
            qids.truncate(limit);
        }
        qids
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => cmd_run(config, args).await,
        Commands::Sync(args) => cmd_sync(config, args).await,
        Commands::Summary { results, all } => cmd_summary(config, results, all),
        Commands::Check => cmd_check(config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_fixtures(config: &Config) -> Result<Fixtures> {
    let fixtures = Fixtures::load(&config.paths.questions, &config.paths.ground_truths)
        .context("Failed to load fixtures")?;
    println!(
        "Fixtures: {} questions, {} ground truths",
        fixtures.questions.len(),
        fixtures.ground_truths.len()
    );
    Ok(fixtures)
}

async fn cmd_run(mut config: Config, args: RunArgs) -> Result<()> {
    let qids = args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let fixtures = load_fixtures(&config)?;
    println!(
        "Mode: {:?}, encoding: {:?}, top-k: {}, dedupe: {}",
        config.eval.mode,
        config.eval.encoding,
        config.eval.effective_top_k(),
        config.eval.dedupe
    );

    let client =
        ColivaraClient::new(config.service.clone()).context("Failed to build HTTP client")?;
    let driver = RunDriver::new(&client, &fixtures, &config);
    let summary = driver.run(&qids).await;

    summary.print_summary();
    println!("Results appended to: {}", config.paths.results_log.display());

    Ok(())
}

async fn cmd_sync(mut config: Config, args: RunArgs) -> Result<()> {
    let qids = args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let fixtures = load_fixtures(&config)?;
    let client =
        ColivaraClient::new(config.service.clone()).context("Failed to build HTTP client")?;
    let driver = RunDriver::new(&client, &fixtures, &config);

    let start = Instant::now();
    let (report, failed) = driver.sync_only(&qids).await;

    println!("\nSync finished in {:.2?}", start.elapsed());
    println!("  Upserted: {}", report.upserted.len());
    println!("  Skipped:  {}", report.skipped.len());
    println!("  Failed:   {}", report.failed.len());
    for (key, reason) in &report.failed {
        println!("    {}: {}", key, reason);
    }
    for (qid, reason) in &failed {
        println!("    Q{}: {}", qid, reason);
    }

    Ok(())
}

fn cmd_summary(config: Config, results: Option<PathBuf>, all: bool) -> Result<()> {
    let path = results.unwrap_or(config.paths.results_log);
    let log = ResultLog::new(&path);

    let accuracy = if all {
        Accuracy::from_records(&log.read_all().context("Failed to read result log")?)
    } else {
        let latest = log.latest_by_qid().context("Failed to read result log")?;
        Accuracy::from_records(latest.values())
    };

    println!("Result Log Summary");
    println!("{}", "─".repeat(40));
    println!("  Log:       {}", path.display());
    println!("  Evaluated: {}", accuracy.total);
    println!(
        "  Correct:   {} ({:.1}%)",
        accuracy.correct,
        accuracy.ratio() * 100.0
    );
    if !accuracy.misses.is_empty() {
        println!("  Misses:    {:?}", accuracy.misses);
    }

    Ok(())
}

async fn cmd_check(config: Config) -> Result<()> {
    println!("Configuration:");
    println!("  API Base:    {}", config.service.api_base);
    let key_prefix: String = config.service.api_key.chars().take(8).collect();
    println!("  API Key:     {}...", key_prefix);
    println!("  Timeout:     {}s", config.service.timeout_secs);
    println!("  Questions:   {}", config.paths.questions.display());
    println!("  Sources:     {}", config.paths.source_dir.display());
    println!("  Index log:   {}", config.paths.index_log.display());
    println!("  Results log: {}", config.paths.results_log.display());
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = ColivaraClient::new(config.service).context("Failed to build HTTP client")?;

    println!("Checking service health...");
    match client.health().await {
        Ok(()) => {
            println!("Connection successful!");
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use feedpipe::config::{Config, DEFAULT_CONFIG_FILE};
use feedpipe::feed::RssFeed;
use feedpipe::job::{CommandJob, FeedJob, JobRunner};
use feedpipe::pipeline::{Pipeline, RunReport};
use feedpipe::prepare::CommandPreparer;
use feedpipe::publish::{GitStore, Identity, Publisher, PushTarget};
use feedpipe::schedule::{Schedule, Trigger};
use feedpipe::sink::HttpCollectionSink;
use feedpipe::store::LocalDataStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "feedpipe=info";

#[derive(Parser, Debug)]
#[command(name = "feedpipe", version, about = "Scheduled feed collection with versioned publishing")]
struct Cli {
    /// Config file
    #[arg(long, env = "FEEDPIPE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write logs here instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once (manual trigger)
    Run {
        /// Leave changes uncommitted
        #[arg(long)]
        no_publish: bool,
        /// Exit with 2 when the commit or push did not go through
        #[arg(long)]
        strict_publish: bool,
    },
    /// Stay resident and run on the configured cron cadence
    Schedule {
        #[arg(long)]
        no_publish: bool,
    },
    /// Print upcoming scheduled runs
    Next {
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Validate the config and exit
    Check,
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Wire config into a pipeline. `publish` false leaves the working tree uncommitted.
fn build_pipeline(config: &Config, publish: bool) -> Result<Pipeline> {
    let mut store_cfg = config.store.clone();
    store_cfg.repo_dir = std::fs::canonicalize(&config.store.repo_dir)
        .with_context(|| format!("store.repo_dir not found: {}", config.store.repo_dir.display()))?;
    let repo_dir = store_cfg.repo_dir.clone();

    let store = LocalDataStore::new(store_cfg.data_root(), store_cfg.placeholder.clone());
    let preparer = CommandPreparer::from_config(&config.prepare, repo_dir.clone());

    let job: Box<dyn JobRunner> = match &config.job.command {
        Some(argv) => Box::new(CommandJob::new(
            argv.clone(),
            repo_dir.clone(),
            Duration::from_secs(config.job.timeout_s),
        )),
        None => {
            let source = RssFeed::new(&config.feeds).context("Failed to build feed HTTP client")?;
            let mut job = FeedJob::new(Box::new(source), &config.feeds);
            if let Some(sink_cfg) = &config.sink {
                let sink = HttpCollectionSink::new(sink_cfg, config.sink_token().as_ref())
                    .context("Failed to build sink client")?;
                tracing::info!(url = %sink_cfg.url, "item sink enabled");
                job = job.with_sink(Box::new(sink));
            }
            Box::new(job)
        }
    };

    let mut pipeline = Pipeline::new(preparer, job, store)
        .with_lock(store_cfg.lock_path(), Duration::from_secs(config.schedule.lock_stale_after_s))
        .with_messages(&config.publish.commit_message, &config.publish.bootstrap_message);

    if publish && config.publish.enabled {
        let token = config.publish_token();
        if token.is_none() {
            tracing::info!(env = %config.publish.token_env, "no push token set, using ambient git credentials");
        }
        let git = GitStore::new(repo_dir, &config.publish.git_bin);
        pipeline = pipeline.with_publisher(Publisher::new(
            Arc::new(git),
            store_cfg.data_dir.clone(),
            Identity {
                name: config.publish.author_name.clone(),
                email: config.publish.author_email.clone(),
            },
            PushTarget {
                remote: config.publish.remote.clone(),
                branch: config.publish.branch.clone(),
            },
            token,
        ));
    } else {
        tracing::info!("publishing disabled");
    }

    Ok(pipeline)
}

fn print_report(report: &RunReport) {
    println!(
        "{} run: {} new item(s), {} changed path(s), {}",
        report.trigger,
        report.job.new_items,
        report.changes.len(),
        report.publish
    );
    if report.job.feeds_failed > 0 {
        println!("  {} of {} feed(s) failed", report.job.feeds_failed, report.job.feeds_total);
    }
    if let Some(delivery) = report.job.delivery {
        println!("  sink: {} sent, {} failed", delivery.sent, delivery.failed);
    }
}

async fn run_once(config: &Config, no_publish: bool, strict_publish: bool) -> Result<i32> {
    let pipeline = build_pipeline(config, !no_publish)?;
    match pipeline.run(Trigger::Manual).await {
        Ok(report) => {
            print_report(&report);
            Ok(report.exit_code(strict_publish))
        }
        // Already logged with its stage.
        Err(e) => {
            eprintln!("run failed: {}", e);
            Ok(1)
        }
    }
}

async fn run_scheduled(config: &Config, no_publish: bool) -> Result<i32> {
    let schedule = Schedule::parse(&config.schedule.cron)?;
    let pipeline = build_pipeline(config, !no_publish)?;
    tracing::info!(cron = %schedule.expr(), "scheduler started");

    loop {
        let now = Utc::now();
        let Some(tick) = schedule.next_after(now) else {
            anyhow::bail!("cron expression {:?} has no upcoming ticks", schedule.expr());
        };
        let wait = (tick - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(next = %tick.to_rfc3339(), wait_s = wait.as_secs(), "waiting for next tick");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                return Ok(0);
            }
        }

        // Failures are logged by the pipeline; the daemon waits for the next tick.
        if let Ok(report) = pipeline.run(Trigger::Scheduled { tick }).await {
            print_report(&report);
        }
    }
}

fn print_next(config: &Config, count: usize) -> Result<i32> {
    let schedule = Schedule::parse(&config.schedule.cron)?;
    println!("  cron: {} (UTC)", schedule.expr());
    for tick in schedule.upcoming(Utc::now(), count) {
        println!("  {}", tick.to_rfc3339());
    }
    Ok(0)
}

fn print_check(config: &Config, path: &Path) -> Result<i32> {
    println!("  Config OK: {}", path.display());
    println!("  schedule:  {}", config.schedule.cron);
    match &config.job.command {
        Some(argv) => println!("  job:       command `{}`", argv.join(" ")),
        None => println!("  job:       built-in feeds ({} url(s))", config.feeds.urls.len()),
    }
    println!("  data dir:  {}", config.store.data_root().display());
    println!(
        "  publish:   {} ({}/{}, token {})",
        if config.publish.enabled { "enabled" } else { "disabled" },
        config.publish.remote,
        config.publish.branch,
        if config.publish_token().is_some() { "set" } else { "not set" },
    );
    if let Some(sink) = &config.sink {
        println!("  sink:      {}", sink.url);
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before tracing, so RUST_LOG may come from .env. Real env vars take precedence.
    let env_file = Config::load_env_file();
    init_tracing(cli.log_file.as_deref())?;
    match env_file {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded env file"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    let config = Config::load(&cli.config)?;

    let code = match cli.command {
        Command::Run {
            no_publish,
            strict_publish,
        } => run_once(&config, no_publish, strict_publish).await?,
        Command::Schedule { no_publish } => run_scheduled(&config, no_publish).await?,
        Command::Next { count } => print_next(&config, count)?,
        Command::Check => print_check(&config, &cli.config)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

use clap::Parser;
use skin_dl::{Config, Event, Harvester, IdRange, RunSummary, cancel_on_signal};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Exit status used when the run was interrupted
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "skin-dl", version)]
#[command(about = "Download every texture in an ID range from a Blessing Skin server", long_about = None)]
#[command(allow_negative_numbers = true)]
struct Args {
    /// First texture ID (inclusive)
    #[arg(long)]
    start: i64,

    /// Last texture ID (inclusive)
    #[arg(long)]
    end: i64,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Retries per request after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Spacing between requests of one worker, and between retries, in milliseconds
    #[arg(long = "delay-ms")]
    delay_ms: Option<u64>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Base URL of the skin server
    #[arg(long)]
    base_url: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file (always written at debug level)
    #[arg(long, default_value = "skin-dl.log")]
    log_file: PathBuf,

    /// Console log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> skin_dl::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if let Some(delay_ms) = self.delay_ms {
            let delay = Duration::from_millis(delay_ms);
            config.request_delay = delay;
            config.retry.initial_delay = delay;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(
    log_file: &Path,
    log_level: &str,
) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new("skin_dl=debug,warn"));

    let stdout_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)?,
    };
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .compact()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(guard)
}

fn print_banner(config: &Config, range: &IdRange) {
    println!("\n{}", "=".repeat(60));
    println!("  skin-dl v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", "=".repeat(60));
    println!("  Server:   {}", config.api.base_url);
    println!("  Range:    {} ({} IDs)", range, range.len());
    println!("  Workers:  {}", config.workers);
    println!(
        "  Retries:  {} (delay {} ms)",
        config.retry.max_attempts,
        config.retry.initial_delay.as_millis()
    );
    println!("  Output:   {}", config.output_dir.display());
    println!("{}\n", "=".repeat(60));
}

/// Render progress events as a single `\r`-refreshed line
fn spawn_progress_printer(mut events: broadcast::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::Progress(s)) => {
                    print!(
                        "\r[{:>6.2}%] {}/{} | ok {} | failed {} | skipped {} | {}s",
                        s.percent(),
                        s.attempted,
                        s.total,
                        s.succeeded,
                        s.failed,
                        s.skipped,
                        s.elapsed.as_secs()
                    );
                    std::io::stdout().flush().ok();
                }
                Ok(Event::CancelRequested) => {
                    println!("\nInterrupted, waiting for in-flight downloads to finish...");
                }
                Ok(Event::Finished { .. }) => {
                    println!();
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(summary: &RunSummary, output_dir: &Path) {
    let absolute = std::fs::canonicalize(output_dir).unwrap_or_else(|_| output_dir.to_path_buf());

    println!("\n{}", "=".repeat(60));
    if summary.cancelled {
        println!("  Harvest interrupted");
    } else {
        println!("  Harvest complete");
    }
    println!("{}", "=".repeat(60));
    println!("  Processed:    {}", summary.attempted);
    println!("  Downloaded:   {}", summary.succeeded);
    println!("  Failed:       {}", summary.failed);
    println!("  Skipped:      {}", summary.skipped);
    println!("  Success rate: {:.2}%", summary.success_rate());
    println!("  Elapsed:      {:.1}s", summary.elapsed.as_secs_f64());
    if let Some(rest) = &summary.not_attempted {
        println!("  Not attempted: {} ({} IDs)", rest, rest.len());
    }
    println!("  Output:       {}", absolute.display());
    println!("{}", "=".repeat(60));
}

async fn run(args: &Args) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let range = IdRange::new(args.start, args.end)?;
    let config = args.load_config()?;
    let output_dir = config.output_dir.clone();

    print_banner(&config, &range);

    let harvester = Harvester::new(config)?;
    tokio::spawn(cancel_on_signal(harvester.cancellation_token()));
    let printer = spawn_progress_printer(harvester.subscribe());

    let summary = harvester.run(range).await?;
    printer.await.ok();

    print_summary(&summary, &output_dir);

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(path, json).await?;
        tracing::info!(path = %path.display(), "Wrote run summary");
    }

    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match init_logging(&args.log_file, &args.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialise logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&args).await {
        Ok(summary) if summary.cancelled => ExitCode::from(EXIT_CANCELLED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Harvest failed");
            eprintln!("\nerror: {}", e);
            ExitCode::FAILURE
        }
    }
}

//! qcast-publish - Publish the next queued media item
//!
//! Runs one orchestration pass: picks the next pending item, publishes it to
//! every enabled platform and moves it to posted when all of them succeed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use libqueuecast::logging::{LogFormat, LoggingConfig};
use libqueuecast::poll::CancelFlag;
use libqueuecast::queue::open_queue;
use libqueuecast::transport::ReqwestTransport;
use libqueuecast::{
    create_platforms, Config, Credentials, EnvCredentialSource, PassOutcome, PassReport,
    QueuePoster, QueuecastError, Result,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "qcast-publish")]
#[command(version)]
#[command(about = "Publish the next queued media item to every configured platform")]
#[command(long_about = "\
qcast-publish - Publish the next queued media item

DESCRIPTION:
    Selects the lexicographically first media file under <queue root>/post/,
    reads its caption from the companion .txt file, and publishes it to
    Facebook, Instagram, X and LinkedIn concurrently. The item moves to
    <queue root>/posted/ only when every enabled platform succeeded;
    otherwise it stays pending for the next run.

    Secrets are read from the environment (or a .env file in the working
    directory): FB_APP_SECRET, FB_LONG_LIVED_USER_TOKEN, FB_PAGE_TOKEN,
    IG_PAGE_TOKEN, X_API_KEY, X_API_SECRET, X_ACCESS_TOKEN,
    X_ACCESS_TOKEN_SECRET.

CONFIGURATION:
    Configuration file: ~/.config/queuecast/config.toml (or QUEUECAST_CONFIG)

    [queue]
    root = \"~/queuecast\"
    media_base_url = \"https://media.example.com\"

    # or an S3-compatible bucket; without media_base_url the platforms
    # get presigned URLs valid for url_expiry
    # backend = \"s3\"
    # bucket = \"media-queue\"
    # url_expiry = \"1h\"

    [platforms]
    enabled = [\"facebook\", \"instagram\", \"x\", \"linkedin\"]

EXIT CODES:
    0 - Item published everywhere, nothing pending, or dry run
    1 - At least one platform failed, or the item could not be moved
    2 - Configuration error
    3 - Invalid input
    130 - Interrupted by a second SIGINT/SIGTERM
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Select and describe the next item without publishing or moving it
    #[arg(long)]
    dry_run: bool,

    /// Summary format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Log format (text, json or pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(QueuecastError::InvalidInput(format!(
                "Invalid format '{}'. Must be 'text' or 'json'",
                other
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }

    match run(cli).await {
        Ok(report) if report.is_success() => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = &cli.log_format {
        logging.format = format
            .parse::<LogFormat>()
            .map_err(QueuecastError::InvalidInput)?;
    }
    logging.init();
    Ok(())
}

async fn run(cli: Cli) -> Result<PassReport> {
    let format = OutputFormat::parse(&cli.format)?;

    let config = match &cli.config {
        Some(path) => Config::load_explicit(path)?,
        None => Config::load()?,
    };

    let cancel = CancelFlag::new();
    setup_signal_handlers(&cancel)?;

    let credentials = Credentials::load(&EnvCredentialSource);
    let transport = Arc::new(ReqwestTransport::new(config.polling.http_timeout)?);
    let platforms = create_platforms(&config, &credentials, transport, &cancel)?;
    let (queue, resolver) = open_queue(&config)?;

    let poster = QueuePoster::new(queue, resolver, platforms)
        .with_default_caption(config.defaults.caption.clone())
        .with_dry_run(cli.dry_run || config.defaults.dry_run);

    let report = poster.run_once().await?;
    print_report(&report, format)?;
    Ok(report)
}

/// Exit status after a forced shutdown (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Stop polling and let in-flight requests finish
    Cancel,
    /// Leave immediately
    Exit,
}

/// What the `count`-th shutdown signal does
fn signal_action(count: usize) -> SignalAction {
    if count <= 1 {
        SignalAction::Cancel
    } else {
        SignalAction::Exit
    }
}

/// The first SIGINT/SIGTERM cancels in-flight polling; a second one exits
#[cfg(unix)]
fn setup_signal_handlers(cancel: &CancelFlag) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| QueuecastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    let cancel = cancel.clone();
    std::thread::spawn(move || {
        for (index, signal) in signals.forever().enumerate() {
            match signal_action(index + 1) {
                SignalAction::Cancel => {
                    info!(
                        "Received signal {}, cancelling pending polls (send again to exit now)",
                        signal
                    );
                    cancel.cancel();
                }
                SignalAction::Exit => {
                    warn!("Received signal {} again, exiting without waiting", signal);
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_cancel: &CancelFlag) -> Result<()> {
    Ok(())
}

fn print_report(report: &PassReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).map_err(|e| {
                QueuecastError::InvalidInput(format!("Failed to serialize summary: {}", e))
            })?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            match &report.outcome {
                PassOutcome::NoPendingItem => println!("No pending media"),
                PassOutcome::DryRun { key } => println!("{}: dry run", key),
                PassOutcome::Posted { key, posted_key } => println!("{} -> {}", key, posted_key),
                PassOutcome::Failed { key } => println!("{}: left pending", key),
                PassOutcome::MoveFailed { key, error } => println!("{}: not moved: {}", key, error),
            }
            if let Some(url) = &report.media_url {
                println!("  media: {}", url);
            }
            for result in &report.results {
                match (&result.platform_post_id, &result.failure) {
                    (Some(id), _) => println!("  {:<10} ok      {}", result.platform, id),
                    (None, Some(kind)) => println!(
                        "  {:<10} failed  {}: {}",
                        result.platform,
                        kind,
                        result.error.as_deref().unwrap_or("")
                    ),
                    (None, None) => println!("  {:<10} failed", result.platform),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels_second_exits() {
        assert_eq!(signal_action(1), SignalAction::Cancel);
        assert_eq!(signal_action(2), SignalAction::Exit);
        assert_eq!(signal_action(5), SignalAction::Exit);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("yaml").unwrap_err().exit_code(), 3);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use sharkwatch::detection::{DetectionOutcome, Detector, ModelKind};
use sharkwatch::features::table::format_timestamp;
use sharkwatch::models::config::AppConfig;
use sharkwatch::models::history::HistoryStatus;
use sharkwatch::models::request::CaptureSource;
use sharkwatch::utils::logging;
use sharkwatch::AppContext;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Time-series anomaly detection over packet captures")]
struct Args {
    /// TOML configuration file
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run detection on a capture file and print the result
    Analyze {
        /// pcap or pcapng file
        #[clap(short, long)]
        file: PathBuf,

        #[clap(flatten)]
        detection: DetectionArgs,

        #[clap(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Print the windowed feature table of a capture as JSON records
    Features {
        #[clap(short, long)]
        file: PathBuf,

        /// Window width in seconds
        #[clap(long)]
        window_size: Option<f64>,
    },

    /// Create analysis jobs for capture files or URLs
    Submit {
        /// JSON history file (overrides queue.store_path)
        #[clap(long)]
        store: Option<PathBuf>,

        #[clap(flatten)]
        detection: DetectionArgs,

        /// Capture paths or http(s) URLs
        #[clap(required = true)]
        captures: Vec<String>,
    },

    /// Recover and process every pending job, then exit
    Run {
        /// JSON history file (overrides queue.store_path)
        #[clap(long)]
        store: Option<PathBuf>,
    },

    /// Print the default configuration
    GenerateConfig,
}

#[derive(clap::Args, Debug)]
struct DetectionArgs {
    /// Comma-separated models: isolation_forest, arima, sarima, prophet
    #[clap(short, long)]
    models: Option<String>,

    /// Column the forecasting models run on
    #[clap(long)]
    target_col: Option<String>,

    /// Share of windows used for fitting
    #[clap(long)]
    train_ratio: Option<f64>,

    /// Comma-separated isolation-forest input columns
    #[clap(long)]
    feature_cols: Option<String>,

    /// Window width in seconds
    #[clap(long)]
    window_size: Option<f64>,
}

impl DetectionArgs {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        let defaults = &mut config.detection.defaults;
        if let Some(models) = &self.models {
            defaults.models = ModelKind::parse_list(models)?;
        }
        if let Some(target_col) = &self.target_col {
            defaults.target_col = target_col.clone();
        }
        if let Some(train_ratio) = self.train_ratio {
            defaults.train_ratio = train_ratio;
        }
        if let Some(cols) = &self.feature_cols {
            defaults.feature_cols = Some(
                cols.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            );
        }
        if let Some(window_size) = self.window_size {
            config.capture.window_size = window_size;
        }
        config.validate()?;
        Ok(())
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::GenerateConfig = args.command {
        print!("{}", AppConfig::generate_default());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    logging::init_logger(
        logging::get_log_level(&level),
        config.logging.filters.as_deref(),
    );
    info!("Starting sharkwatch v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Analyze {
            file,
            detection,
            output,
        } => {
            detection.apply(&mut config)?;
            analyze(&config, &file, output).await
        }
        Command::Features { file, window_size } => {
            if let Some(window_size) = window_size {
                config.capture.window_size = window_size;
            }
            features(&config, &file).await
        }
        Command::Submit {
            store,
            detection,
            captures,
        } => {
            detection.apply(&mut config)?;
            if let Some(store) = store {
                config.queue.store_path = store;
            }
            submit(config, &captures).await
        }
        Command::Run { store } => {
            if let Some(store) = store {
                config.queue.store_path = store;
            }
            run(config).await
        }
        Command::GenerateConfig => Ok(()),
    }
}

async fn analyze(config: &AppConfig, file: &Path, output: OutputFormat) -> Result<()> {
    if !file.exists() {
        bail!("capture file not found: {}", file.display());
    }
    let detector = Detector::from_config(config)?;
    let outcome = detector
        .detect(
            &CaptureSource::Path(file.to_path_buf()),
            &config.detection.defaults,
        )
        .await
        .with_context(|| format!("detection failed for {}", file.display()))?;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome.to_json()?)?);
        }
        OutputFormat::Text => print_report(file, &outcome)?,
    }
    Ok(())
}

async fn features(config: &AppConfig, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("capture file not found: {}", file.display());
    }
    let detector = Detector::from_config(config)?;
    let conversion = detector
        .convert(&CaptureSource::Path(file.to_path_buf()))
        .await?;
    info!(
        "{} frames, {} decoded, {} decode errors, {} rows",
        conversion.stats.frames_read,
        conversion.stats.packets_decoded,
        conversion.stats.decode_errors,
        conversion.table.len()
    );
    println!("{}", serde_json::to_string_pretty(&conversion.table)?);
    Ok(())
}

async fn submit(config: AppConfig, captures: &[String]) -> Result<()> {
    let options = config.detection.defaults.clone();
    let ctx = AppContext::with_file_store(config)?;
    for reference in captures {
        let history = ctx
            .service
            .create(CaptureSource::from_reference(reference), Some(options.clone()))
            .await?;
        println!("{}  {}", history.id, history.capture);
    }
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let ctx = AppContext::with_file_store(config)?;
    ctx.start().await.context("startup recovery failed")?;

    tokio::select! {
        _ = ctx.queue.wait_idle() => info!("All jobs processed"),
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping queue"),
    }
    ctx.shutdown().await;

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    for (status, color) in [
        (HistoryStatus::Done, Color::Green),
        (HistoryStatus::Error, Color::Red),
        (HistoryStatus::Created, Color::Yellow),
    ] {
        let records = ctx.store.get_all_by_status(status).await?;
        stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        write!(stdout, "{:<10}", status)?;
        stdout.reset()?;
        writeln!(stdout, " {}", records.len())?;
        if status == HistoryStatus::Error {
            for history in records {
                writeln!(
                    stdout,
                    "  {} {}: {}",
                    history.id,
                    history.capture,
                    history.error.unwrap_or_default()
                )?;
            }
        }
    }
    Ok(())
}

fn print_report(file: &Path, outcome: &DetectionOutcome) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    writeln!(stdout, "{}", file.display())?;

    let results = match outcome {
        DetectionOutcome::NoResult { data, .. } => {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
            writeln!(
                stdout,
                "No result: {} window(s), at least 2 are needed",
                data.len()
            )?;
            stdout.reset()?;
            return Ok(());
        }
        DetectionOutcome::Models(results) => results,
    };

    for (kind, result) in results {
        let flagged = result.anomaly_count();
        stdout.set_color(ColorSpec::new().set_bold(true))?;
        write!(stdout, "{:<17}", kind.as_str())?;
        stdout.reset()?;

        let color = if flagged > 0 { Color::Red } else { Color::Green };
        stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
        write!(stdout, "{}/{} anomalous", flagged, result.anomalies.len())?;
        stdout.reset()?;
        match result.threshold {
            Some(threshold) => writeln!(stdout, " (threshold {:.4})", threshold)?,
            None => writeln!(stdout)?,
        }

        let timestamps = result.predictions.as_ref().map(|p| &p.timestamps);
        for (i, (anomaly, score)) in result
            .anomalies
            .iter()
            .zip(&result.anomaly_scores)
            .enumerate()
        {
            if !anomaly {
                continue;
            }
            match timestamps.and_then(|ts| ts.get(i)) {
                Some(ts) => writeln!(stdout, "  {}  score {:.4}", format_timestamp(*ts), score)?,
                None => writeln!(stdout, "  test window {}  score {:.4}", i, score)?,
            }
        }
    }
    Ok(())
}

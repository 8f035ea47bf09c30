use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use leaf_area::analysis::format_area;
use leaf_area::{
    AnalysisKind, AnalyzerService, AppError, Configuration, ProcessChannelFactory, RequestOrigin,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};

const USAGE: &str = "Usage: leaf-area [--config <file>] <image>...";

struct CliArgs {
    config: Option<PathBuf>,
    images: Vec<PathBuf>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, AppError> {
        let mut config = None;
        let mut images = Vec::new();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args.next().ok_or_else(missing_config_value)?;
                    config = Some(PathBuf::from(value));
                }
                "-h" | "--help" => return Err(AppError::Usage(USAGE.to_string())),
                _ => images.push(PathBuf::from(arg)),
            }
        }
        if images.is_empty() {
            return Err(AppError::Usage(USAGE.to_string()));
        }
        Ok(Self { config, images })
    }
}

fn missing_config_value() -> AppError {
    AppError::Usage(format!("--config requires a value\n{USAGE}"))
}

fn init_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = CliArgs::parse(std::env::args().skip(1))?;
    let configuration = Configuration::load(args.config.as_deref())?;
    init_logging(&configuration.log_level);

    let factory = Arc::new(ProcessChannelFactory::new(&configuration));
    let analyzer = AnalyzerService::spawn(&configuration, factory);

    let mut notices = analyzer.subscribe_notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => warn!("Notice: {}", notice.message()),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} notices", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    analyzer.wait_until_ready().await?;
    info!(
        "Vision engine ready, measuring {} images",
        args.images.len()
    );

    // Keep at most a queue's worth of images in front of the engine.
    let mut measurements = stream::iter(args.images)
        .map(|image| {
            let analyzer = analyzer.clone();
            async move {
                let outcome = analyzer
                    .measure(
                        image.clone().into(),
                        AnalysisKind::Area,
                        RequestOrigin::Capture,
                    )
                    .await;
                (image, outcome)
            }
        })
        .buffered(configuration.max_queue_size.max(1));

    while let Some((image, outcome)) = measurements.next().await {
        match outcome {
            Ok(outcome) => println!(
                "{}\t{}\t{} contour points",
                image.display(),
                format_area(outcome.area_cm2),
                outcome.contour_count
            ),
            Err(e) => error!("Failed to measure {}: {}", image.display(), e),
        }
    }

    analyzer.shutdown();
    Ok(())
}

//! platewatch - diagnostic scanner
//!
//! Runs the full detection pipeline over a captured still image, the way
//! field engineers debug a problem frame: same chain, same gates, same
//! lookup as the UI host, minus the UI.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use platewatch::camera::StillCamera;
use platewatch::config::{self, AppConfig};
use platewatch::lookup::HttpVehicleLookup;
use platewatch::scanner::ScanOrchestrator;
use platewatch::vision::ocr::NoopRecognizer;

/// platewatch - run the plate-detection pipeline over a still frame
#[derive(Parser, Debug)]
#[command(name = "platewatch")]
#[command(about = "Diagnostic scanner for the license-plate detection pipeline")]
struct Args {
    /// Image file to scan
    #[arg(short, long)]
    image: PathBuf,

    /// Configuration file (TOML); defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep scanning the frame on the configured interval instead of a
    /// single capture (exercises the continuous loop; Ctrl-C to stop)
    #[arg(long)]
    watch: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_or_default(args.config.as_deref());

    info!("platewatch diagnostic scanner starting");
    if config::vision_api_key().is_none() {
        warn!(
            "{} not set; the remote vision strategy will be skipped",
            config::VISION_API_KEY_VAR
        );
    }

    let camera = StillCamera::from_path(&args.image)?;
    let chain = platewatch::build_chain(&config, Arc::new(NoopRecognizer));
    let lookup = HttpVehicleLookup::new(config.lookup.clone(), config::lookup_api_key())?;

    let mut orchestrator = ScanOrchestrator::new(
        Box::new(camera),
        chain,
        Arc::new(lookup),
        config.scan.clone(),
        config.thresholds,
    );
    info!("scan session {}", orchestrator.session_id());

    if args.watch {
        let handle = orchestrator.handle();
        let outcomes = orchestrator.outcomes();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("stop requested");
            handle.stop();
        });

        let printer = std::thread::spawn(move || {
            for outcome in outcomes.iter() {
                println!("{}", serde_json::to_string(&outcome).unwrap_or_default());
            }
        });

        orchestrator.run().await?;
        drop(orchestrator);
        let _ = printer.join();
    } else {
        orchestrator.start().await?;
        let outcome = orchestrator.capture().await?;
        orchestrator.stop();

        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    info!("platewatch shutdown complete");
    Ok(())
}

/// Load configuration from the given path, or fall back to defaults.
fn load_or_default(path: Option<&std::path::Path>) -> AppConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                warn!("Failed to load {:?}: {e}; using defaults", path);
            }
        }
    }
    AppConfig::default()
}
